//! Control service: the RPC-facing operations.
//!
//! Every operation answers with a [`PortMappingResponse`]; errors are
//! reported as `success = false` plus a message and never escape as
//! transport errors.

use std::net::Ipv4Addr;
use std::sync::Arc;

use portmap_common::{CancellationToken, CommandRunner, PortMapError, PortMapResult};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn, Level};

use crate::port_mapping_mgr::PortMappingMgr;

/// Outcome of a control operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMappingResponse {
    pub success: bool,
    pub message: String,
}

impl PortMappingResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

fn parse_internal_ip(internal_ip: &str) -> PortMapResult<Ipv4Addr> {
    internal_ip.trim().parse().map_err(|_| {
        PortMapError::invalid_argument(
            "internal_ip",
            format!("'{}' is not an IPv4 address", internal_ip),
        )
    })
}

fn parse_mapped_port(mapped_port: i32) -> PortMapResult<u16> {
    match u16::try_from(mapped_port) {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(PortMapError::invalid_argument(
            "mapped_port",
            format!("{} is outside 1-65535", mapped_port),
        )),
    }
}

/// Command failures are logged at error, everything else at warn.
fn failure_level(error: &PortMapError) -> Level {
    if error.is_command_error() {
        Level::ERROR
    } else {
        Level::WARN
    }
}

/// Port mapping control service
pub struct PortMappingService<R> {
    mgr: Arc<PortMappingMgr<R>>,
}

impl<R> Clone for PortMappingService<R> {
    fn clone(&self) -> Self {
        Self {
            mgr: Arc::clone(&self.mgr),
        }
    }
}

impl<R: CommandRunner> PortMappingService<R> {
    pub fn new(mgr: PortMappingMgr<R>) -> Self {
        Self { mgr: Arc::new(mgr) }
    }

    pub fn manager(&self) -> &PortMappingMgr<R> {
        &self.mgr
    }

    /// EnablePortMapping(internal_ip, mapped_port)
    pub async fn enable_port_mapping(
        &self,
        internal_ip: &str,
        mapped_port: i32,
        cancel: &CancellationToken,
    ) -> PortMappingResponse {
        info!(internal_ip, mapped_port, "EnablePortMapping");

        let result = async {
            let ip = parse_internal_ip(internal_ip)?;
            let port = parse_mapped_port(mapped_port)?;
            let mapping = self.mgr.mapping_for(port, ip);
            self.mgr.install(&mapping, cancel).await
        }
        .await;

        match result {
            Ok(_) => PortMappingResponse::ok("port mapping enabled"),
            Err(e) => {
                if failure_level(&e) == Level::ERROR {
                    error!(internal_ip, mapped_port, error = %e, "Failed to enable port mapping");
                } else {
                    warn!(internal_ip, mapped_port, error = %e, "Failed to enable port mapping");
                }
                PortMappingResponse::failed(format!("failed to enable port mapping: {}", e))
            }
        }
    }

    /// DisablePortMapping(mapped_port)
    pub async fn disable_port_mapping(
        &self,
        mapped_port: i32,
        cancel: &CancellationToken,
    ) -> PortMappingResponse {
        info!(mapped_port, "DisablePortMapping");

        let result = async {
            let port = parse_mapped_port(mapped_port)?;
            self.mgr.remove(port, cancel).await
        }
        .await;

        match result {
            Ok(_) => PortMappingResponse::ok("port mapping disabled"),
            Err(e) => {
                if failure_level(&e) == Level::ERROR {
                    error!(mapped_port, error = %e, "Failed to disable port mapping");
                } else {
                    warn!(mapped_port, error = %e, "Failed to disable port mapping");
                }
                PortMappingResponse::failed(format!("failed to disable port mapping: {}", e))
            }
        }
    }

    /// ListPortMappings(): the raw chain listing as the message
    pub async fn list_port_mappings(&self, cancel: &CancellationToken) -> PortMappingResponse {
        match self.mgr.list(cancel).await {
            Ok(listing) => PortMappingResponse::ok(listing),
            Err(e) => {
                error!(error = %e, "Failed to list port mappings");
                PortMappingResponse::failed(format!("failed to list port mappings: {}", e))
            }
        }
    }

    /// Connectivity probe; the message is the nft version on success.
    pub async fn health(&self, cancel: &CancellationToken) -> PortMappingResponse {
        match self.mgr.test_connection(cancel).await {
            Ok(version) => PortMappingResponse::ok(version),
            Err(e) => PortMappingResponse::failed(e.to_string()),
        }
    }
}
