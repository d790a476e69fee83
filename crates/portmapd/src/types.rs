//! Port mapping type definitions

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use portmap_common::{PortMapError, PortMapResult};
use serde::{Deserialize, Serialize};

/// Identity of an nft chain: the table (which may be several tokens, e.g.
/// `ip nat` = family + name) and the chain name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChainRef {
    table: Vec<String>,
    chain: String,
}

impl ChainRef {
    /// Creates a chain reference.
    ///
    /// The table is split into nft tokens here, once; command builders
    /// never re-split anything.
    pub fn new(table: &str, chain: &str) -> PortMapResult<Self> {
        let table: Vec<String> = table.split_whitespace().map(str::to_string).collect();
        if table.is_empty() {
            return Err(PortMapError::invalid_config("table_name", "must not be empty"));
        }
        if table.len() > 2 {
            return Err(PortMapError::invalid_config(
                "table_name",
                format!("expected '[family] name', got {} tokens", table.len()),
            ));
        }
        Self::check_chain_name(chain)?;
        Ok(Self {
            table,
            chain: chain.to_string(),
        })
    }

    /// Returns another chain in the same table.
    pub fn sibling(&self, chain: &str) -> PortMapResult<Self> {
        Self::check_chain_name(chain)?;
        Ok(Self {
            table: self.table.clone(),
            chain: chain.to_string(),
        })
    }

    fn check_chain_name(chain: &str) -> PortMapResult<()> {
        if chain.is_empty() {
            return Err(PortMapError::invalid_config("chain_name", "must not be empty"));
        }
        if chain.chars().any(char::is_whitespace) {
            return Err(PortMapError::invalid_config(
                "chain_name",
                format!("'{}' contains whitespace", chain),
            ));
        }
        Ok(())
    }

    /// The table tokens, in order.
    pub fn table_tokens(&self) -> &[String] {
        &self.table
    }

    /// The table as written in configuration.
    pub fn table(&self) -> String {
        self.table.join(" ")
    }

    /// The chain name.
    pub fn chain(&self) -> &str {
        &self.chain
    }
}

impl fmt::Display for ChainRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.table(), self.chain)
    }
}

/// A requested mapping: external port → internal endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMapping {
    /// TCP port on the external IP.
    pub external_port: u16,
    /// Internal endpoint address.
    pub internal_ip: Ipv4Addr,
    /// Internal endpoint port.
    pub internal_port: u16,
}

impl PortMapping {
    pub fn new(external_port: u16, internal_ip: Ipv4Addr, internal_port: u16) -> Self {
        Self {
            external_port,
            internal_ip,
            internal_port,
        }
    }

    /// The DNAT destination, `ip:port`.
    pub fn dnat_target(&self) -> String {
        format!("{}:{}", self.internal_ip, self.internal_port)
    }
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.external_port, self.dnat_target())
    }
}

/// Engine-assigned rule identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuleHandle(u64);

impl RuleHandle {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RuleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RuleHandle {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

/// How a listing line is matched against a requested external port.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchPolicy {
    /// The rule's `dport` value must equal the port.
    #[default]
    Exact,
    /// Unanchored `dport <port>` substring test, first line wins. A request
    /// for port 1 can select a `dport 10` rule listed before it.
    Substring,
}
