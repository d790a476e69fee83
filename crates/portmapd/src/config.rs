//! Configuration file support for portmapd
//!
//! Loads and validates portmapd configuration from TOML files.
//! Default location: /etc/portmapd/portmapd.toml

use portmap_common::{PortMapError, PortMapResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use crate::tables::{DEFAULT_CHAIN, DEFAULT_OUTER_CHAIN, DEFAULT_TABLE, DEFAULT_TARGET_PORT};
use crate::types::{ChainRef, MatchPolicy};

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/portmapd/portmapd.toml";

/// Where a loaded configuration came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    File,
    /// The file did not exist
    Defaults,
}

/// Control surface configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the HTTP control surface binds to
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

/// Port mapping configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingConfig {
    /// External IP whose traffic is redirected into the dedicated chain
    #[serde(default)]
    pub external_ip: String,

    /// Internal service port every mapping targets
    #[serde(default = "default_target_port")]
    pub target_port: u16,

    /// nftables table, optionally prefixed by its family (e.g. "ip nat")
    #[serde(default = "default_table_name")]
    pub table_name: String,

    /// Dedicated chain owned by portmapd
    #[serde(default = "default_chain_name")]
    pub chain_name: String,

    /// Output-selection chain that holds the jump rule
    #[serde(default = "default_outer_chain")]
    pub outer_chain: String,

    /// PID whose network namespace nft runs in
    #[serde(default = "default_namespace_pid")]
    pub namespace_pid: u32,

    /// Per-command timeout in seconds
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// How disable matches a rule to a port
    #[serde(default)]
    pub match_policy: MatchPolicy,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by RUST_LOG
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of the compact text format
    #[serde(default)]
    pub json: bool,
}

/// Complete portmapd configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortmapConfig {
    /// Control surface configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Port mapping configuration
    #[serde(default)]
    pub mapping: MappingConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

// Default functions
fn default_listen_addr() -> String {
    "0.0.0.0:9010".to_string()
}

fn default_target_port() -> u16 {
    DEFAULT_TARGET_PORT
}

fn default_table_name() -> String {
    DEFAULT_TABLE.to_string()
}

fn default_chain_name() -> String {
    DEFAULT_CHAIN.to_string()
}

fn default_outer_chain() -> String {
    DEFAULT_OUTER_CHAIN.to_string()
}

fn default_namespace_pid() -> u32 {
    1
}

fn default_command_timeout() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

// Default implementations
impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            external_ip: String::new(),
            target_port: default_target_port(),
            table_name: default_table_name(),
            chain_name: default_chain_name(),
            outer_chain: default_outer_chain(),
            namespace_pid: default_namespace_pid(),
            command_timeout_secs: default_command_timeout(),
            match_policy: MatchPolicy::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl MappingConfig {
    /// Parsed external IP
    pub fn external_ip(&self) -> PortMapResult<Ipv4Addr> {
        self.external_ip.parse().map_err(|_| {
            PortMapError::invalid_config(
                "mapping.external_ip",
                format!("'{}' is not an IPv4 address", self.external_ip),
            )
        })
    }

    /// The dedicated chain
    pub fn chain_ref(&self) -> PortMapResult<ChainRef> {
        ChainRef::new(&self.table_name, &self.chain_name)
    }

    /// The outer chain, in the same table as the dedicated chain
    pub fn outer_chain_ref(&self) -> PortMapResult<ChainRef> {
        self.chain_ref()?.sibling(&self.outer_chain)
    }

    /// Get command timeout as Duration
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

impl PortmapConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> PortMapResult<Self> {
        Self::load_with_source(path).map(|(config, _)| config)
    }

    /// Like [`load_or_default`](Self::load_or_default), also reporting
    /// whether the file was read. Nothing is logged here; the caller may
    /// not have a subscriber yet.
    pub fn load_with_source(path: impl AsRef<Path>) -> PortMapResult<(Self, ConfigSource)> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content)
                .map(|config| (config, ConfigSource::File))
                .map_err(|e| {
                    PortMapError::invalid_config(
                        path.display().to_string(),
                        format!("failed to parse config file: {}", e),
                    )
                }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok((Self::default(), ConfigSource::Defaults))
            }
            Err(e) => Err(PortMapError::invalid_config(
                path.display().to_string(),
                format!("failed to read config file: {}", e),
            )),
        }
    }

    /// Load from default location or defaults
    pub fn load() -> PortMapResult<Self> {
        Self::load_or_default(DEFAULT_CONFIG_PATH)
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> PortMapResult<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self).map_err(|e| {
            PortMapError::internal(format!("Failed to serialize config: {}", e))
        })?;

        fs::write(path, content).map_err(|e| {
            PortMapError::invalid_config(
                path.display().to_string(),
                format!("failed to write config file: {}", e),
            )
        })
    }

    /// Parsed listen address
    pub fn listen_addr(&self) -> PortMapResult<SocketAddr> {
        self.server.listen_addr.parse().map_err(|_| {
            PortMapError::invalid_config(
                "server.listen_addr",
                format!("'{}' is not a socket address", self.server.listen_addr),
            )
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> PortMapResult<()> {
        self.listen_addr()?;
        self.mapping.external_ip()?;
        self.mapping.outer_chain_ref()?;

        if self.mapping.target_port == 0 {
            return Err(PortMapError::invalid_config(
                "mapping.target_port",
                "must be > 0",
            ));
        }

        if self.mapping.command_timeout_secs == 0 {
            return Err(PortMapError::invalid_config(
                "mapping.command_timeout_secs",
                "must be > 0",
            ));
        }

        if self.mapping.outer_chain == self.mapping.chain_name {
            return Err(PortMapError::invalid_config(
                "mapping.outer_chain",
                "must differ from chain_name",
            ));
        }

        Ok(())
    }
}
