//! nft argument vector builders for port mapping operations
//!
//! Each builder returns the arguments that follow `nft`. Vectors are built
//! field by field so that no value is ever re-split on whitespace.

use std::net::Ipv4Addr;

use crate::tables::ROUTING_CHAIN;
use crate::types::{ChainRef, PortMapping, RuleHandle};

fn with_chain(verb: &[&str], chain: &ChainRef) -> Vec<String> {
    let mut args: Vec<String> = verb.iter().map(|s| s.to_string()).collect();
    args.extend(chain.table_tokens().iter().cloned());
    args.push(chain.chain().to_string());
    args
}

/// `list chain <table> <chain>`
pub fn build_list_chain_cmd(chain: &ChainRef) -> Vec<String> {
    with_chain(&["list", "chain"], chain)
}

/// `add chain <table> <chain>`
pub fn build_add_chain_cmd(chain: &ChainRef) -> Vec<String> {
    with_chain(&["add", "chain"], chain)
}

/// Build jump rule insertion command
///
/// `insert rule <table> <outer> ip daddr <external_ip> jump <chain>`.
/// `insert` places the rule at the front of the outer chain.
pub fn build_insert_jump_rule_cmd(
    outer: &ChainRef,
    external_ip: Ipv4Addr,
    target: &ChainRef,
) -> Vec<String> {
    let mut args = with_chain(&["insert", "rule"], outer);
    args.extend([
        "ip".to_string(),
        "daddr".to_string(),
        external_ip.to_string(),
        "jump".to_string(),
        target.chain().to_string(),
    ]);
    args
}

/// Build destination NAT rule command
///
/// `add rule <table> <chain> tcp dport <port> dnat to <ip>:<port>`
pub fn build_add_dnat_rule_cmd(chain: &ChainRef, mapping: &PortMapping) -> Vec<String> {
    let mut args = with_chain(&["add", "rule"], chain);
    args.extend([
        "tcp".to_string(),
        "dport".to_string(),
        mapping.external_port.to_string(),
        "dnat".to_string(),
        "to".to_string(),
        mapping.dnat_target(),
    ]);
    args
}

/// Build masquerade rule command
///
/// `add rule <table> POSTROUTING ip daddr <ip> tcp dport <port> masquerade`.
/// Only the table of `chain` is used.
pub fn build_add_masquerade_rule_cmd(chain: &ChainRef, mapping: &PortMapping) -> Vec<String> {
    let mut args: Vec<String> = vec!["add".to_string(), "rule".to_string()];
    args.extend(chain.table_tokens().iter().cloned());
    args.extend([
        ROUTING_CHAIN.to_string(),
        "ip".to_string(),
        "daddr".to_string(),
        mapping.internal_ip.to_string(),
        "tcp".to_string(),
        "dport".to_string(),
        mapping.internal_port.to_string(),
        "masquerade".to_string(),
    ]);
    args
}

/// `--handle list chain <table> <chain>`
pub fn build_list_chain_with_handles_cmd(chain: &ChainRef) -> Vec<String> {
    with_chain(&["--handle", "list", "chain"], chain)
}

/// `delete rule <table> <chain> handle <handle>`
pub fn build_delete_rule_cmd(chain: &ChainRef, handle: RuleHandle) -> Vec<String> {
    let mut args = with_chain(&["delete", "rule"], chain);
    args.push("handle".to_string());
    args.push(handle.to_string());
    args
}

/// `--version`
pub fn build_version_cmd() -> Vec<String> {
    vec!["--version".to_string()]
}
