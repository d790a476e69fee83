//! Port Mapping Daemon - host port forwarding over nftables
//!
//! portmapd maps TCP ports on a host's external IP to internal devices by
//! driving the host's nftables ruleset, handling:
//! - Dedicated chain creation and the jump rule that feeds it
//! - DNAT rule installation with best-effort masquerade
//! - Rule removal by engine handle, recovered from chain listings
//! - Raw chain listing and an nft connectivity probe
//! - An HTTP control surface returning `{success, message}`
//!
//! All commands run as `nsenter -t <pid> -n nft ...` so they land in the
//! host's network namespace.

pub mod api;
pub mod commands;
pub mod config;
pub mod listing;
pub mod locks;
pub mod port_mapping_mgr;
pub mod service;
pub mod tables;
pub mod types;

pub use config::PortmapConfig;
pub use port_mapping_mgr::{InstallOutcome, PortMappingMgr, RemoveOutcome};
pub use service::{PortMappingResponse, PortMappingService};
pub use types::{ChainRef, MatchPolicy, PortMapping, RuleHandle};
