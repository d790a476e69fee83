//! Parsing of `nft list chain` output.
//!
//! The engine has no structured query here, so rule state (and the
//! handle needed to delete a rule) is recovered from its text listing:
//!
//! ```text
//! table ip nat {
//!     chain PHONE_PORT_MAPPING { # handle 5
//!         tcp dport 10196 dnat to 192.168.1.5:5555 # handle 7
//!     }
//! }
//! ```
//!
//! Each line becomes a [`RuleRecord`]. Port matching is isolated in
//! [`RuleRecord::matches_port`] so the policy can change without touching
//! callers.

use once_cell::sync::Lazy;
use regex::Regex;

use portmap_common::{PortMapError, PortMapResult};

use crate::tables::listing_keywords::{DPORT, HANDLE, HANDLE_MARKER, JUMP};
use crate::types::{MatchPolicy, RuleHandle};

/// `dport <n>` as a whole token.
static DPORT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bdport\s+(\d+)\b").expect("Invalid regex pattern"));

/// `dnat to <target>`, also `dnat ip to <target>` from inet tables.
static DNAT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bdnat\s+(?:ip\s+)?to\s+(\S+)").expect("Invalid regex pattern"));

/// One line of a chain listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleRecord {
    /// The line, trimmed.
    pub line: String,
    /// Destination port matched by the rule, if any.
    pub dport: Option<u16>,
    /// DNAT destination (`ip:port`), if any.
    pub dnat_target: Option<String>,
    /// Handle annotation, if present and numeric.
    pub handle: Option<RuleHandle>,
}

impl RuleRecord {
    /// Parses a single listing line.
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        let dport = DPORT_RE
            .captures(line)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok());
        let dnat_target = DNAT_RE
            .captures(line)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string());

        Self {
            line: line.to_string(),
            dport,
            dnat_target,
            handle: extract_handle(line),
        }
    }

    /// Returns true if the line carries a `# handle` annotation, whether or
    /// not a handle could be parsed from it.
    pub fn has_handle_marker(&self) -> bool {
        self.line.contains(HANDLE_MARKER)
    }

    /// Returns true if this rule is for `port` under `policy`.
    pub fn matches_port(&self, port: u16, policy: MatchPolicy) -> bool {
        match policy {
            MatchPolicy::Exact => self.dport == Some(port),
            MatchPolicy::Substring => self.line.contains(&format!("{} {}", DPORT, port)),
        }
    }

    /// The chain named after a `jump` verdict, if the rule has one.
    pub fn jump_target(&self) -> Option<&str> {
        let mut fields = self.line.split_whitespace();
        fields.find(|f| *f == JUMP)?;
        fields.next()
    }
}

/// Returns the field immediately following the literal `handle`, parsed as
/// a handle.
pub fn extract_handle(line: &str) -> Option<RuleHandle> {
    let mut fields = line.split_whitespace();
    fields.find(|f| *f == HANDLE)?;
    fields.next()?.parse().ok()
}

/// Parses a whole listing into records, one per non-blank line, in
/// listing order.
pub fn parse_listing(output: &str) -> Vec<RuleRecord> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(RuleRecord::parse)
        .collect()
}

/// Returns true if some rule in the listing jumps to exactly `chain`.
pub fn has_jump_to(output: &str, chain: &str) -> bool {
    parse_listing(output)
        .iter()
        .any(|record| record.jump_target() == Some(chain))
}

/// Finds the rule to delete for `port`: the first record, top to bottom,
/// that matches under `policy` and carries a handle annotation.
///
/// # Errors
///
/// [`PortMapError::HandleParse`] if that record's annotation has no
/// usable handle.
pub fn find_rule(
    records: &[RuleRecord],
    port: u16,
    policy: MatchPolicy,
) -> PortMapResult<Option<(RuleHandle, &RuleRecord)>> {
    let Some(record) = records
        .iter()
        .find(|r| r.matches_port(port, policy) && r.has_handle_marker())
    else {
        return Ok(None);
    };

    match record.handle {
        Some(handle) => Ok(Some((handle, record))),
        None => Err(PortMapError::HandleParse {
            line: record.line.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "table ip nat {
\tchain PHONE_PORT_MAPPING { # handle 5
\t\ttcp dport 10196 dnat to 192.168.1.5:5555 # handle 7
\t\ttcp dport 10197 dnat to 192.168.1.6:5555 # handle 9
\t}
}";

    #[test]
    fn test_extract_handle() {
        let line = "tcp dport 10196 dnat to 192.168.1.5:5555 # handle 7";
        assert_eq!(extract_handle(line), Some(RuleHandle::new(7)));

        let line = "chain PHONE_PORT_MAPPING { # handle 123";
        assert_eq!(extract_handle(line), Some(RuleHandle::new(123)));

        assert_eq!(extract_handle("tcp dport 10196 dnat to 1.2.3.4:5"), None);
        assert_eq!(extract_handle("tcp dport 1 # handle"), None);
        assert_eq!(extract_handle("tcp dport 1 # handle abc"), None);
    }

    #[test]
    fn test_parse_rule_line() {
        let record =
            RuleRecord::parse("\t\ttcp dport 10196 dnat to 192.168.1.5:5555 # handle 7");
        assert_eq!(record.line, "tcp dport 10196 dnat to 192.168.1.5:5555 # handle 7");
        assert_eq!(record.dport, Some(10196));
        assert_eq!(record.dnat_target.as_deref(), Some("192.168.1.5:5555"));
        assert_eq!(record.handle, Some(RuleHandle::new(7)));
        assert!(record.has_handle_marker());
    }

    #[test]
    fn test_parse_inet_dnat_syntax() {
        let record = RuleRecord::parse("tcp dport 8080 dnat ip to 10.0.0.2:80 # handle 3");
        assert_eq!(record.dnat_target.as_deref(), Some("10.0.0.2:80"));
    }

    #[test]
    fn test_parse_listing_keeps_order() {
        let records = parse_listing(LISTING);
        assert_eq!(records.len(), 6);
        assert_eq!(records[0].line, "table ip nat {");
        assert_eq!(records[2].dport, Some(10196));
        assert_eq!(records[3].dport, Some(10197));
    }

    #[test]
    fn test_find_rule_returns_handle() {
        let records = parse_listing(LISTING);
        let (handle, record) = find_rule(&records, 10197, MatchPolicy::Exact)
            .unwrap()
            .unwrap();
        assert_eq!(handle, RuleHandle::new(9));
        assert_eq!(record.dnat_target.as_deref(), Some("192.168.1.6:5555"));
    }

    #[test]
    fn test_find_rule_no_match() {
        let records = parse_listing(LISTING);
        assert!(find_rule(&records, 9999, MatchPolicy::Exact).unwrap().is_none());
        assert!(find_rule(&records, 9999, MatchPolicy::Substring)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_find_rule_requires_handle_marker() {
        let records = parse_listing("tcp dport 10196 dnat to 192.168.1.5:5555");
        assert!(find_rule(&records, 10196, MatchPolicy::Exact)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_find_rule_unparsable_handle_is_error() {
        let records = parse_listing("tcp dport 10196 dnat to 192.168.1.5:5555 # handle ???");
        let err = find_rule(&records, 10196, MatchPolicy::Exact).unwrap_err();
        assert!(matches!(err, PortMapError::HandleParse { .. }));
    }

    /// Pins the compatibility behaviour: the substring test lets port 1
    /// select the first line containing "dport 1", which is port 10's.
    #[test]
    fn test_substring_policy_first_prefix_match_wins() {
        let listing = "tcp dport 10 dnat to 10.0.0.10:5555 # handle 4
tcp dport 100 dnat to 10.0.0.100:5555 # handle 5
tcp dport 1 dnat to 10.0.0.1:5555 # handle 6";
        let records = parse_listing(listing);

        let (handle, _) = find_rule(&records, 1, MatchPolicy::Substring)
            .unwrap()
            .unwrap();
        assert_eq!(handle, RuleHandle::new(4));

        let (handle, _) = find_rule(&records, 10, MatchPolicy::Substring)
            .unwrap()
            .unwrap();
        assert_eq!(handle, RuleHandle::new(4));
    }

    /// The exact policy selects the rule whose dport equals the request.
    #[test]
    fn test_exact_policy_selects_true_match() {
        let listing = "tcp dport 10 dnat to 10.0.0.10:5555 # handle 4
tcp dport 100 dnat to 10.0.0.100:5555 # handle 5
tcp dport 1 dnat to 10.0.0.1:5555 # handle 6";
        let records = parse_listing(listing);

        let (handle, _) = find_rule(&records, 1, MatchPolicy::Exact).unwrap().unwrap();
        assert_eq!(handle, RuleHandle::new(6));

        let (handle, _) = find_rule(&records, 100, MatchPolicy::Exact)
            .unwrap()
            .unwrap();
        assert_eq!(handle, RuleHandle::new(5));
    }

    #[test]
    fn test_jump_target() {
        let record = RuleRecord::parse("ip daddr 206.119.108.2 jump PHONE_PORT_MAPPING # handle 9");
        assert_eq!(record.jump_target(), Some("PHONE_PORT_MAPPING"));
        assert_eq!(RuleRecord::parse("chain OUTPUT {").jump_target(), None);
        assert_eq!(RuleRecord::parse("tcp dport 1 jump").jump_target(), None);
    }

    #[test]
    fn test_has_jump_to_requires_exact_target() {
        let outer = "table ip nat {
\tchain OUTPUT {
\t\tip daddr 10.9.9.9 jump PHONE_PORT_MAPPING_LEGACY
\t}
}";
        // neither the outer chain's own name nor a longer target counts
        assert!(!has_jump_to(outer, "PUT"));
        assert!(!has_jump_to(outer, "PHONE_PORT_MAPPING"));
        assert!(!has_jump_to(outer, "nat"));
        assert!(has_jump_to(outer, "PHONE_PORT_MAPPING_LEGACY"));
    }

    #[test]
    fn test_exact_policy_ignores_masquerade_port() {
        // masquerade rules match on the internal port
        let record = RuleRecord::parse("ip daddr 192.168.1.5 tcp dport 5555 masquerade # handle 2");
        assert!(record.matches_port(5555, MatchPolicy::Exact));
        assert!(!record.matches_port(555, MatchPolicy::Exact));
        assert!(record.matches_port(555, MatchPolicy::Substring));
    }
}
