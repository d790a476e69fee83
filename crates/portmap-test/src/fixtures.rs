//! Test fixtures for common port mapping scenarios
//!
//! Provides reusable requests and seeded rule text for manager and
//! service tests.

use std::net::Ipv4Addr;

/// Table used by the default daemon configuration.
pub const TEST_TABLE: &str = "ip nat";
/// Dedicated chain used by the default daemon configuration.
pub const TEST_CHAIN: &str = "PHONE_PORT_MAPPING";
/// Outer chain used by the default daemon configuration.
pub const TEST_OUTER_CHAIN: &str = "OUTPUT";
/// Chain that receives masquerade rules.
pub const TEST_ROUTING_CHAIN: &str = "POSTROUTING";
/// External IP used across tests.
pub const TEST_EXTERNAL_IP: Ipv4Addr = Ipv4Addr::new(206, 119, 108, 2);
/// Internal service port used across tests.
pub const TEST_TARGET_PORT: u16 = 5555;

/// Mapping request operation type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingOp {
    /// Install a mapping
    Enable,
    /// Remove a mapping
    Disable,
}

/// A control request as received on the RPC surface (unvalidated)
#[derive(Debug, Clone)]
pub struct MappingRequest {
    /// Operation type
    pub op: MappingOp,
    /// Internal IP, as sent by the caller
    pub internal_ip: String,
    /// Mapped (external) port, as sent by the caller
    pub mapped_port: i32,
}

impl MappingRequest {
    /// Create an enable request
    pub fn enable(internal_ip: impl Into<String>, mapped_port: i32) -> Self {
        Self {
            op: MappingOp::Enable,
            internal_ip: internal_ip.into(),
            mapped_port,
        }
    }

    /// Create a disable request
    pub fn disable(mapped_port: i32) -> Self {
        Self {
            op: MappingOp::Disable,
            internal_ip: String::new(),
            mapped_port,
        }
    }
}

/// DNAT rule text as nft lists it.
pub fn dnat_rule_expr(external_port: u16, internal_ip: Ipv4Addr, internal_port: u16) -> String {
    format!(
        "tcp dport {} dnat to {}:{}",
        external_port, internal_ip, internal_port
    )
}

/// Masquerade rule text as nft lists it.
pub fn masquerade_rule_expr(internal_ip: Ipv4Addr, internal_port: u16) -> String {
    format!("ip daddr {} tcp dport {} masquerade", internal_ip, internal_port)
}

/// Common request fixtures
pub mod request_fixtures {
    use super::*;

    /// A batch of enable requests for consecutive devices, starting at
    /// 192.168.1.10 and port 10196.
    pub fn device_batch(count: u8) -> Vec<MappingRequest> {
        (0..count)
            .map(|i| {
                MappingRequest::enable(
                    Ipv4Addr::new(192, 168, 1, 10 + i).to_string(),
                    10196 + i32::from(i),
                )
            })
            .collect()
    }

    /// Requests that must be rejected before any command runs.
    pub fn invalid_requests() -> Vec<MappingRequest> {
        vec![
            MappingRequest::enable("not-an-ip", 10196),
            MappingRequest::enable("fe80::1", 10196),
            MappingRequest::enable("192.168.1.5", 0),
            MappingRequest::enable("192.168.1.5", 65536),
            MappingRequest::enable("192.168.1.5", -1),
            MappingRequest::disable(0),
            MappingRequest::disable(70000),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_exprs() {
        let ip = Ipv4Addr::new(192, 168, 1, 5);
        assert_eq!(
            dnat_rule_expr(10196, ip, 5555),
            "tcp dport 10196 dnat to 192.168.1.5:5555"
        );
        assert_eq!(
            masquerade_rule_expr(ip, 5555),
            "ip daddr 192.168.1.5 tcp dport 5555 masquerade"
        );
    }

    #[test]
    fn test_device_batch() {
        let batch = request_fixtures::device_batch(3);
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[2].internal_ip, "192.168.1.12");
        assert_eq!(batch[2].mapped_port, 10198);
        assert!(batch.iter().all(|r| r.op == MappingOp::Enable));
    }
}
