//! nftables table, chain and keyword constants for portmapd

// Defaults for the dedicated chain
pub const DEFAULT_TABLE: &str = "ip nat";
pub const DEFAULT_CHAIN: &str = "PHONE_PORT_MAPPING";

/// Output-selection chain that receives the jump rule.
pub const DEFAULT_OUTER_CHAIN: &str = "OUTPUT";

/// Post-routing chain that receives masquerade rules.
pub const ROUTING_CHAIN: &str = "POSTROUTING";

/// Internal service port every mapping targets by default.
pub const DEFAULT_TARGET_PORT: u16 = 5555;

/// Listing keywords
pub mod listing_keywords {
    pub const DPORT: &str = "dport";
    pub const HANDLE: &str = "handle";
    pub const HANDLE_MARKER: &str = "# handle";
    pub const JUMP: &str = "jump";
}
