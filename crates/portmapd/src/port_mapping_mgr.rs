//! Port Mapping Manager - dedicated chain lifecycle and mapping rules
//!
//! All state lives in the host ruleset; nothing is cached here. Every
//! operation runs inside the per-chain exclusive region from
//! [`ChainLocks`], so a remove's list-then-delete cannot interleave with
//! another request against the same chain.

use std::net::Ipv4Addr;

use portmap_common::{
    CancellationToken, CommandRunner, NamespaceTarget, NsenterRunner, PortMapError,
    PortMapResult, StepPlan, StepWarning,
};
use tracing::{debug, info, warn};

use crate::commands::*;
use crate::config::MappingConfig;
use crate::listing::{find_rule, has_jump_to, parse_listing};
use crate::locks::ChainLocks;
use crate::tables::DEFAULT_TARGET_PORT;
use crate::types::{ChainRef, MatchPolicy, PortMapping, RuleHandle};

/// Result of a successful install.
#[derive(Debug)]
pub struct InstallOutcome {
    /// The mapping whose DNAT rule was added.
    pub mapping: PortMapping,
    /// Best-effort steps that failed (currently only masquerade).
    pub warnings: Vec<StepWarning>,
}

impl InstallOutcome {
    /// Returns true if every step succeeded.
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Result of a successful remove.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    /// The rule with this handle was deleted.
    Removed(RuleHandle),
    /// The chain listing had no rule for the port.
    NotFound,
    /// The chain could not be listed (usually because it does not exist).
    ListingUnavailable,
}

/// Port Mapping Manager
///
/// Drives one dedicated chain through a [`CommandRunner`].
pub struct PortMappingMgr<R> {
    runner: R,

    /// Dedicated chain holding the DNAT rules
    chain: ChainRef,

    /// Chain holding the jump into `chain`
    outer_chain: ChainRef,

    /// Destination address redirected into `chain`
    external_ip: Ipv4Addr,

    /// Internal port every mapping targets
    target_port: u16,

    match_policy: MatchPolicy,
    locks: ChainLocks,
}

impl PortMappingMgr<NsenterRunner> {
    /// Create a manager that drives the host ruleset as configured.
    pub fn from_config(config: &MappingConfig) -> PortMapResult<Self> {
        let runner = NsenterRunner::new(NamespaceTarget::pid(config.namespace_pid))
            .with_timeout(config.command_timeout());
        Self::from_config_with_runner(runner, config)
    }
}

impl<R: CommandRunner> PortMappingMgr<R> {
    /// Create a new PortMappingMgr instance
    pub fn new(runner: R, chain: ChainRef, outer_chain: ChainRef, external_ip: Ipv4Addr) -> Self {
        info!(chain = %chain, outer = %outer_chain, external_ip = %external_ip, "PortMappingMgr initialized");

        Self {
            runner,
            chain,
            outer_chain,
            external_ip,
            target_port: DEFAULT_TARGET_PORT,
            match_policy: MatchPolicy::default(),
            locks: ChainLocks::new(),
        }
    }

    /// Create a manager from configuration with an explicit runner.
    pub fn from_config_with_runner(runner: R, config: &MappingConfig) -> PortMapResult<Self> {
        let mgr = Self::new(
            runner,
            config.chain_ref()?,
            config.outer_chain_ref()?,
            config.external_ip()?,
        )
        .with_target_port(config.target_port)
        .with_match_policy(config.match_policy);
        Ok(mgr)
    }

    pub fn with_target_port(mut self, target_port: u16) -> Self {
        self.target_port = target_port;
        self
    }

    pub fn with_match_policy(mut self, match_policy: MatchPolicy) -> Self {
        self.match_policy = match_policy;
        self
    }

    /// Share a lock registry with other managers in the process.
    pub fn with_locks(mut self, locks: ChainLocks) -> Self {
        self.locks = locks;
        self
    }

    pub fn chain(&self) -> &ChainRef {
        &self.chain
    }

    pub fn outer_chain(&self) -> &ChainRef {
        &self.outer_chain
    }

    pub fn external_ip(&self) -> Ipv4Addr {
        self.external_ip
    }

    pub fn target_port(&self) -> u16 {
        self.target_port
    }

    pub fn match_policy(&self) -> MatchPolicy {
        self.match_policy
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// The mapping for `external_port` to `internal_ip` on the target port.
    pub fn mapping_for(&self, external_port: u16, internal_ip: Ipv4Addr) -> PortMapping {
        PortMapping::new(external_port, internal_ip, self.target_port)
    }

    /// Lists `chain`, treating any failure other than cancellation as
    /// "no listing".
    async fn try_list(
        &self,
        chain: &ChainRef,
        cancel: &CancellationToken,
    ) -> PortMapResult<Option<String>> {
        match self.runner.run_or_fail(&build_list_chain_cmd(chain), cancel).await {
            Ok(output) => Ok(Some(output)),
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                debug!(chain = %chain, error = %e, "Chain listing failed");
                Ok(None)
            }
        }
    }

    /// Make sure the dedicated chain exists and the outer chain jumps to it.
    pub async fn ensure_chain(&self, cancel: &CancellationToken) -> PortMapResult<()> {
        let _guard = self.locks.acquire(&self.chain, cancel).await?;
        self.ensure_chain_locked(cancel).await
    }

    /// Chain initialization; the caller holds the chain lock.
    async fn ensure_chain_locked(&self, cancel: &CancellationToken) -> PortMapResult<()> {
        if self.try_list(&self.chain, cancel).await?.is_none() {
            info!(chain = %self.chain, "Creating chain");
            self.runner
                .run_or_fail(&build_add_chain_cmd(&self.chain), cancel)
                .await
                .map_err(|e| PortMapError::chain_init("create chain", e))?;
        }

        // A failed outer listing counts as "no jump rule yet"
        let has_jump = self
            .try_list(&self.outer_chain, cancel)
            .await?
            .is_some_and(|output| has_jump_to(&output, self.chain.chain()));

        if !has_jump {
            info!(
                outer = %self.outer_chain,
                external_ip = %self.external_ip,
                chain = %self.chain,
                "Inserting jump rule"
            );
            let cmd = build_insert_jump_rule_cmd(&self.outer_chain, self.external_ip, &self.chain);
            self.runner
                .run_or_fail(&cmd, cancel)
                .await
                .map_err(|e| PortMapError::chain_init("insert jump rule", e))?;
        }

        Ok(())
    }

    /// Install a mapping: chain init and DNAT are fatal, masquerade is
    /// best-effort. A failed masquerade does not roll back the DNAT rule.
    pub async fn install(
        &self,
        mapping: &PortMapping,
        cancel: &CancellationToken,
    ) -> PortMapResult<InstallOutcome> {
        let _guard = self.locks.acquire(&self.chain, cancel).await?;

        let dnat = build_add_dnat_rule_cmd(&self.chain, mapping);
        let masquerade = build_add_masquerade_rule_cmd(&self.chain, mapping);

        let report = StepPlan::new()
            .fatal("ensure chain", self.ensure_chain_locked(cancel))
            .fatal("add dnat rule", async {
                self.runner
                    .run_or_fail(&dnat, cancel)
                    .await
                    .map(drop)
                    .map_err(PortMapError::rule_install)
            })
            .best_effort("add masquerade rule", async {
                self.runner.run_or_fail(&masquerade, cancel).await.map(drop)
            })
            .run()
            .await?;

        info!(mapping = %mapping, chain = %self.chain, "Port mapping installed");
        for warning in &report.warnings {
            warn!(mapping = %mapping, "Port mapping installed with warning: {}", warning);
        }

        Ok(InstallOutcome {
            mapping: *mapping,
            warnings: report.warnings,
        })
    }

    /// Remove the first listed rule for `external_port`.
    ///
    /// A failed listing or a missing rule is not an error.
    pub async fn remove(
        &self,
        external_port: u16,
        cancel: &CancellationToken,
    ) -> PortMapResult<RemoveOutcome> {
        let _guard = self.locks.acquire(&self.chain, cancel).await?;

        let listing = match self
            .runner
            .run_or_fail(&build_list_chain_with_handles_cmd(&self.chain), cancel)
            .await
        {
            Ok(output) => output,
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                warn!(port = external_port, chain = %self.chain, error = %e, "Failed to list chain, nothing to remove");
                return Ok(RemoveOutcome::ListingUnavailable);
            }
        };

        let records = parse_listing(&listing);
        let Some((handle, record)) = find_rule(&records, external_port, self.match_policy)? else {
            warn!(port = external_port, chain = %self.chain, "No rule found for port");
            return Ok(RemoveOutcome::NotFound);
        };
        debug!(port = external_port, line = %record.line, "Matched rule");

        self.runner
            .run_or_fail(&build_delete_rule_cmd(&self.chain, handle), cancel)
            .await
            .map_err(|e| PortMapError::rule_delete(handle.value(), e))?;

        info!(port = external_port, handle = %handle, chain = %self.chain, "Port mapping removed");
        Ok(RemoveOutcome::Removed(handle))
    }

    /// Raw listing of the dedicated chain.
    pub async fn list(&self, cancel: &CancellationToken) -> PortMapResult<String> {
        let _guard = self.locks.acquire(&self.chain, cancel).await?;

        self.runner
            .run_or_fail(&build_list_chain_cmd(&self.chain), cancel)
            .await
            .map_err(PortMapError::list_failed)
    }

    /// Probe that nft is reachable in the target namespace. Returns the
    /// version string.
    pub async fn test_connection(&self, cancel: &CancellationToken) -> PortMapResult<String> {
        let output = self
            .runner
            .run_or_fail(&build_version_cmd(), cancel)
            .await
            .map_err(PortMapError::nft_unavailable)?;

        let version = output.trim().to_string();
        info!(version = %version, "nft is available");
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portmap_test::{
        dnat_rule_expr, masquerade_rule_expr, CommandVerifier, FakeNft, TEST_CHAIN,
        TEST_EXTERNAL_IP, TEST_OUTER_CHAIN, TEST_ROUTING_CHAIN, TEST_TABLE,
    };
    use pretty_assertions::assert_eq;

    const DEVICE_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 5);

    fn new_mgr(nft: &FakeNft) -> PortMappingMgr<FakeNft> {
        let chain = ChainRef::new(TEST_TABLE, TEST_CHAIN).unwrap();
        let outer = chain.sibling(TEST_OUTER_CHAIN).unwrap();
        PortMappingMgr::new(nft.clone(), chain, outer, TEST_EXTERNAL_IP)
    }

    fn cancel() -> CancellationToken {
        CancellationToken::new()
    }

    #[tokio::test]
    async fn test_ensure_chain_creates_chain_and_jump() {
        let nft = FakeNft::new();
        let mgr = new_mgr(&nft);

        mgr.ensure_chain(&cancel()).await.unwrap();

        assert!(nft.has_chain(TEST_TABLE, TEST_CHAIN));
        let outer = nft.rules(TEST_TABLE, TEST_OUTER_CHAIN);
        assert_eq!(outer.len(), 1);
        assert_eq!(outer[0].1, "ip daddr 206.119.108.2 jump PHONE_PORT_MAPPING");

        assert_eq!(
            nft.calls(),
            vec![
                "nft list chain ip nat PHONE_PORT_MAPPING",
                "nft add chain ip nat PHONE_PORT_MAPPING",
                "nft list chain ip nat OUTPUT",
                "nft insert rule ip nat OUTPUT ip daddr 206.119.108.2 jump PHONE_PORT_MAPPING",
            ]
        );
    }

    #[tokio::test]
    async fn test_ensure_chain_is_idempotent() {
        let nft = FakeNft::new();
        let mgr = new_mgr(&nft);

        mgr.ensure_chain(&cancel()).await.unwrap();
        nft.clear_calls();
        mgr.ensure_chain(&cancel()).await.unwrap();

        assert_eq!(
            nft.calls(),
            vec![
                "nft list chain ip nat PHONE_PORT_MAPPING",
                "nft list chain ip nat OUTPUT",
            ]
        );
        assert_eq!(nft.rules(TEST_TABLE, TEST_OUTER_CHAIN).len(), 1);
    }

    #[tokio::test]
    async fn test_ensure_chain_create_failure_is_fatal() {
        let nft = FakeNft::new();
        nft.fail_on("add chain");
        let mgr = new_mgr(&nft);

        let err = mgr.ensure_chain(&cancel()).await.unwrap_err();
        assert!(matches!(
            err,
            PortMapError::ChainInit {
                step: "create chain",
                ..
            }
        ));
        CommandVerifier::new(nft.calls())
            .assert_command_not_executed("insert rule")
            .unwrap();
    }

    #[tokio::test]
    async fn test_ensure_chain_outer_listing_failure_inserts_jump() {
        let nft = FakeNft::new();
        nft.fail_on("list chain ip nat OUTPUT");
        let mgr = new_mgr(&nft);

        mgr.ensure_chain(&cancel()).await.unwrap();
        assert_eq!(nft.rules(TEST_TABLE, TEST_OUTER_CHAIN).len(), 1);
    }

    #[tokio::test]
    async fn test_ensure_chain_name_inside_outer_chain_name() {
        // "PUT" appears in "chain OUTPUT {" but no rule jumps to it
        let nft = FakeNft::new();
        let chain = ChainRef::new(TEST_TABLE, "PUT").unwrap();
        let outer = chain.sibling(TEST_OUTER_CHAIN).unwrap();
        let mgr = PortMappingMgr::new(nft.clone(), chain, outer, TEST_EXTERNAL_IP);

        mgr.ensure_chain(&cancel()).await.unwrap();

        let outer = nft.rules(TEST_TABLE, TEST_OUTER_CHAIN);
        assert_eq!(outer.len(), 1);
        assert_eq!(outer[0].1, "ip daddr 206.119.108.2 jump PUT");
    }

    #[tokio::test]
    async fn test_ensure_chain_ignores_jump_to_longer_name() {
        let nft = FakeNft::new();
        nft.seed_rule(
            TEST_TABLE,
            TEST_OUTER_CHAIN,
            "ip daddr 10.9.9.9 jump PHONE_PORT_MAPPING_LEGACY",
        );
        let mgr = new_mgr(&nft);

        mgr.ensure_chain(&cancel()).await.unwrap();

        let outer = nft.rules(TEST_TABLE, TEST_OUTER_CHAIN);
        assert_eq!(outer.len(), 2);
        assert_eq!(outer[0].1, "ip daddr 206.119.108.2 jump PHONE_PORT_MAPPING");
        assert_eq!(outer[1].1, "ip daddr 10.9.9.9 jump PHONE_PORT_MAPPING_LEGACY");
    }

    #[tokio::test]
    async fn test_ensure_chain_insert_failure_is_fatal() {
        let nft = FakeNft::new();
        nft.fail_on("insert rule");
        let mgr = new_mgr(&nft);

        let err = mgr.ensure_chain(&cancel()).await.unwrap_err();
        assert!(matches!(
            err,
            PortMapError::ChainInit {
                step: "insert jump rule",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_install_adds_dnat_and_masquerade() {
        let nft = FakeNft::new();
        let mgr = new_mgr(&nft);

        let mapping = mgr.mapping_for(10196, DEVICE_IP);
        let outcome = mgr.install(&mapping, &cancel()).await.unwrap();
        assert!(outcome.is_clean());
        assert_eq!(outcome.mapping, mapping);

        let rules = nft.rules(TEST_TABLE, TEST_CHAIN);
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].1, dnat_rule_expr(10196, DEVICE_IP, 5555));

        let routing = nft.rules(TEST_TABLE, TEST_ROUTING_CHAIN);
        assert_eq!(routing[0].1, masquerade_rule_expr(DEVICE_IP, 5555));

        let verifier = CommandVerifier::new(nft.calls());
        verifier.assert_command_count(6).unwrap();
        verifier
            .assert_executed_before("dnat to", "masquerade")
            .unwrap();
    }

    #[tokio::test]
    async fn test_install_masquerade_failure_is_warning() {
        let nft = FakeNft::new();
        nft.fail_on("masquerade");
        let mgr = new_mgr(&nft);

        let outcome = mgr
            .install(&mgr.mapping_for(10196, DEVICE_IP), &cancel())
            .await
            .unwrap();

        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(outcome.warnings[0].step, "add masquerade rule");
        assert_eq!(nft.rules(TEST_TABLE, TEST_CHAIN).len(), 1);
        assert!(nft.rules(TEST_TABLE, TEST_ROUTING_CHAIN).is_empty());
    }

    #[tokio::test]
    async fn test_install_dnat_failure_skips_masquerade() {
        let nft = FakeNft::new();
        nft.fail_on("dnat to");
        let mgr = new_mgr(&nft);

        let err = mgr
            .install(&mgr.mapping_for(10196, DEVICE_IP), &cancel())
            .await
            .unwrap_err();
        assert!(matches!(err, PortMapError::RuleInstall { .. }));
        CommandVerifier::new(nft.calls())
            .assert_command_not_executed("masquerade")
            .unwrap();
    }

    #[tokio::test]
    async fn test_install_chain_failure_skips_dnat() {
        let nft = FakeNft::new();
        nft.fail_on("add chain");
        let mgr = new_mgr(&nft);

        let err = mgr
            .install(&mgr.mapping_for(10196, DEVICE_IP), &cancel())
            .await
            .unwrap_err();
        assert!(matches!(err, PortMapError::ChainInit { .. }));
        CommandVerifier::new(nft.calls())
            .assert_command_not_executed("dnat to")
            .unwrap();
    }

    #[tokio::test]
    async fn test_remove_deletes_by_handle() {
        let nft = FakeNft::new();
        let mgr = new_mgr(&nft);
        mgr.install(&mgr.mapping_for(10196, DEVICE_IP), &cancel())
            .await
            .unwrap();
        let handle = nft.rules(TEST_TABLE, TEST_CHAIN)[0].0;
        nft.clear_calls();

        let outcome = mgr.remove(10196, &cancel()).await.unwrap();
        assert_eq!(outcome, RemoveOutcome::Removed(RuleHandle::new(handle)));
        assert!(nft.rules(TEST_TABLE, TEST_CHAIN).is_empty());
        assert_eq!(
            nft.calls(),
            vec![
                "nft --handle list chain ip nat PHONE_PORT_MAPPING".to_string(),
                format!("nft delete rule ip nat PHONE_PORT_MAPPING handle {}", handle),
            ]
        );
    }

    #[tokio::test]
    async fn test_remove_absent_port_issues_no_delete() {
        let nft = FakeNft::new();
        let mgr = new_mgr(&nft);
        mgr.ensure_chain(&cancel()).await.unwrap();

        let outcome = mgr.remove(9999, &cancel()).await.unwrap();
        assert_eq!(outcome, RemoveOutcome::NotFound);
        CommandVerifier::new(nft.calls())
            .assert_command_not_executed("delete")
            .unwrap();
    }

    #[tokio::test]
    async fn test_remove_without_chain_succeeds() {
        let nft = FakeNft::new();
        let mgr = new_mgr(&nft);

        let outcome = mgr.remove(10196, &cancel()).await.unwrap();
        assert_eq!(outcome, RemoveOutcome::ListingUnavailable);
    }

    #[tokio::test]
    async fn test_remove_delete_failure_is_error() {
        let nft = FakeNft::new();
        let handle = nft.seed_rule(TEST_TABLE, TEST_CHAIN, &dnat_rule_expr(10196, DEVICE_IP, 5555));
        nft.fail_on("delete rule");
        let mgr = new_mgr(&nft);

        let err = mgr.remove(10196, &cancel()).await.unwrap_err();
        match err {
            PortMapError::RuleDelete { handle: h, .. } => assert_eq!(h, handle),
            other => panic!("Expected RuleDelete, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_remove_substring_policy_is_first_match() {
        let nft = FakeNft::new();
        let h10 = nft.seed_rule(TEST_TABLE, TEST_CHAIN, &dnat_rule_expr(10, DEVICE_IP, 5555));
        let h1 = nft.seed_rule(TEST_TABLE, TEST_CHAIN, &dnat_rule_expr(1, DEVICE_IP, 5555));

        let compat = new_mgr(&nft).with_match_policy(MatchPolicy::Substring);
        assert_eq!(
            compat.remove(1, &cancel()).await.unwrap(),
            RemoveOutcome::Removed(RuleHandle::new(h10))
        );

        let remaining = nft.rules(TEST_TABLE, TEST_CHAIN);
        assert_eq!(remaining, vec![(h1, dnat_rule_expr(1, DEVICE_IP, 5555))]);
    }

    #[tokio::test]
    async fn test_remove_exact_policy_selects_port() {
        let nft = FakeNft::new();
        let h10 = nft.seed_rule(TEST_TABLE, TEST_CHAIN, &dnat_rule_expr(10, DEVICE_IP, 5555));
        let h1 = nft.seed_rule(TEST_TABLE, TEST_CHAIN, &dnat_rule_expr(1, DEVICE_IP, 5555));

        let mgr = new_mgr(&nft);
        assert_eq!(
            mgr.remove(1, &cancel()).await.unwrap(),
            RemoveOutcome::Removed(RuleHandle::new(h1))
        );
        assert_eq!(nft.rules(TEST_TABLE, TEST_CHAIN)[0].0, h10);
    }

    #[tokio::test]
    async fn test_list_returns_raw_output() {
        let nft = FakeNft::new();
        let mgr = new_mgr(&nft);
        mgr.install(&mgr.mapping_for(10196, DEVICE_IP), &cancel())
            .await
            .unwrap();

        let listing = mgr.list(&cancel()).await.unwrap();
        assert_eq!(
            listing,
            nft.listing(TEST_TABLE, TEST_CHAIN, false).unwrap()
        );
        assert!(listing.contains("dport 10196"));
        assert!(listing.contains("dnat to 192.168.1.5:5555"));
    }

    #[tokio::test]
    async fn test_list_missing_chain_is_error() {
        let nft = FakeNft::new();
        let mgr = new_mgr(&nft);

        let err = mgr.list(&cancel()).await.unwrap_err();
        assert!(matches!(err, PortMapError::ListFailed { .. }));
    }

    #[tokio::test]
    async fn test_connection_probe() {
        let nft = FakeNft::new();
        let mgr = new_mgr(&nft);
        let version = mgr.test_connection(&cancel()).await.unwrap();
        assert!(version.starts_with("nftables v"));
        assert_eq!(nft.calls(), vec!["nft --version"]);

        nft.fail_on("--version");
        let err = mgr.test_connection(&cancel()).await.unwrap_err();
        assert!(matches!(err, PortMapError::NftUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_cancelled_install_runs_nothing() {
        let nft = FakeNft::new();
        let mgr = new_mgr(&nft);
        let token = cancel();
        token.cancel();

        let err = mgr
            .install(&mgr.mapping_for(10196, DEVICE_IP), &token)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(nft.calls().is_empty());
    }

    #[test]
    fn test_from_config() {
        let mut config = MappingConfig::default();
        config.external_ip = "10.1.2.3".to_string();
        config.target_port = 5037;
        config.match_policy = MatchPolicy::Substring;

        let mgr = PortMappingMgr::from_config_with_runner(FakeNft::new(), &config).unwrap();
        assert_eq!(mgr.external_ip(), Ipv4Addr::new(10, 1, 2, 3));
        assert_eq!(mgr.target_port(), 5037);
        assert_eq!(mgr.match_policy(), MatchPolicy::Substring);
        assert_eq!(mgr.chain().to_string(), "ip nat PHONE_PORT_MAPPING");
        assert_eq!(mgr.outer_chain().to_string(), "ip nat OUTPUT");

        config.external_ip = "nope".to_string();
        assert!(PortMappingMgr::from_config_with_runner(FakeNft::new(), &config).is_err());
    }
}
