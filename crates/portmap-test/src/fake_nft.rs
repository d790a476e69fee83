//! In-memory nft ruleset.
//!
//! [`FakeNft`] implements [`CommandRunner`] by interpreting the subset of
//! nft verbs the daemon issues against an in-memory table/chain/rule
//! model. It assigns handles the way the engine does (one monotonically
//! increasing counter shared by chains and rules) and renders listings in
//! nft's text format, so the daemon's listing parser runs against
//! realistic output.
//!
//! Every invocation is recorded as the command line `nft <args...>`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use portmap_common::{CancellationToken, CommandRunner, ExecResult, PortMapError, PortMapResult};

/// Version string returned for `nft --version`.
pub const FAKE_NFT_VERSION: &str = "nftables v1.0.9 (Old Doc Yago)";

/// Base chains present in a fresh `ip nat` table.
const BASE_CHAINS: &[&str] = &["PREROUTING", "INPUT", "OUTPUT", "POSTROUTING"];

const NO_SUCH_FILE: &str = "Error: No such file or directory";

#[derive(Debug, Clone)]
struct FakeRule {
    handle: u64,
    expr: String,
}

#[derive(Debug, Clone)]
struct FakeChain {
    handle: u64,
    rules: Vec<FakeRule>,
}

#[derive(Debug)]
struct FakeState {
    // table -> chain -> rules
    tables: BTreeMap<String, BTreeMap<String, FakeChain>>,
    next_handle: u64,
    calls: Vec<String>,
    failures: Vec<String>,
    delay: Option<Duration>,
    in_flight: usize,
    max_in_flight: usize,
}

impl FakeState {
    fn new() -> Self {
        let mut state = Self {
            tables: BTreeMap::new(),
            next_handle: 1,
            calls: Vec::new(),
            failures: Vec::new(),
            delay: None,
            in_flight: 0,
            max_in_flight: 0,
        };
        for chain in BASE_CHAINS {
            state.create_chain("ip nat", chain);
        }
        state
    }

    fn allocate_handle(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    fn create_chain(&mut self, table: &str, chain: &str) {
        if self.chain(table, chain).is_some() {
            return;
        }
        let handle = self.allocate_handle();
        self.tables
            .entry(table.to_string())
            .or_default()
            .insert(chain.to_string(), FakeChain { handle, rules: Vec::new() });
    }

    fn chain(&self, table: &str, chain: &str) -> Option<&FakeChain> {
        self.tables.get(table).and_then(|chains| chains.get(chain))
    }

    fn chain_mut(&mut self, table: &str, chain: &str) -> Option<&mut FakeChain> {
        self.tables.get_mut(table).and_then(|chains| chains.get_mut(chain))
    }

    fn add_rule(&mut self, table: &str, chain: &str, expr: String, at_front: bool) -> Option<u64> {
        self.chain(table, chain)?;
        let handle = self.allocate_handle();
        let chain = self.chain_mut(table, chain)?;
        let rule = FakeRule { handle, expr };
        if at_front {
            chain.rules.insert(0, rule);
        } else {
            chain.rules.push(rule);
        }
        Some(handle)
    }

    fn render(&self, table: &str, chain: &str, with_handles: bool) -> Option<String> {
        let fake = self.chain(table, chain)?;
        let annotate = |handle: u64| {
            if with_handles {
                format!(" # handle {}", handle)
            } else {
                String::new()
            }
        };

        let mut out = format!("table {} {{\n", table);
        out.push_str(&format!("\tchain {} {{{}\n", chain, annotate(fake.handle)));
        for rule in &fake.rules {
            out.push_str(&format!("\t\t{}{}\n", rule.expr, annotate(rule.handle)));
        }
        out.push_str("\t}\n}");
        Some(out)
    }

    /// Interprets one nft invocation. `table_tokens` says how many
    /// arguments name the table.
    fn apply(&mut self, args: &[String], table_tokens: usize) -> ExecResult {
        if args.len() == 1 && args[0] == "--version" {
            return ExecResult::ok(FAKE_NFT_VERSION);
        }

        let (with_handles, args) = match args.first().map(String::as_str) {
            Some("--handle") => (true, &args[1..]),
            _ => (false, args),
        };
        if args.len() < 2 + table_tokens + 1 {
            return ExecResult::failed(1, "Error: syntax error, unexpected end of file");
        }

        let verb = (args[0].as_str(), args[1].as_str());
        let rest = &args[2..];
        let table = rest[..table_tokens].join(" ");
        let chain = rest[table_tokens].as_str();
        let tail = &rest[table_tokens + 1..];

        match verb {
            ("list", "chain") if tail.is_empty() => match self.render(&table, chain, with_handles) {
                Some(listing) => ExecResult::ok(listing),
                None => ExecResult::failed(1, NO_SUCH_FILE),
            },
            ("add", "chain") if tail.is_empty() => {
                self.create_chain(&table, chain);
                ExecResult::ok("")
            }
            ("add", "rule") | ("insert", "rule") if !tail.is_empty() => {
                let at_front = verb.0 == "insert";
                match self.add_rule(&table, chain, tail.join(" "), at_front) {
                    Some(_) => ExecResult::ok(""),
                    None => ExecResult::failed(1, NO_SUCH_FILE),
                }
            }
            ("delete", "rule") if tail.len() == 2 && tail[0] == "handle" => {
                let Ok(handle) = tail[1].parse::<u64>() else {
                    return ExecResult::failed(1, "Error: syntax error, unexpected string");
                };
                let Some(fake) = self.chain_mut(&table, chain) else {
                    return ExecResult::failed(1, NO_SUCH_FILE);
                };
                let before = fake.rules.len();
                fake.rules.retain(|rule| rule.handle != handle);
                if fake.rules.len() == before {
                    ExecResult::failed(1, "Error: Could not process rule: No such file or directory")
                } else {
                    ExecResult::ok("")
                }
            }
            _ => ExecResult::failed(1, "Error: syntax error"),
        }
    }
}

/// In-memory nft double. Clones share state, so a test can keep one
/// handle for inspection while the manager owns another.
#[derive(Debug, Clone)]
pub struct FakeNft {
    state: Arc<Mutex<FakeState>>,
    table_tokens: usize,
}

impl Default for FakeNft {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeNft {
    /// Creates a ruleset holding an empty `ip nat` table with its base
    /// chains.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState::new())),
            table_tokens: 2,
        }
    }

    /// Sets how many arguments name the table (2 for `ip nat`, 1 for
    /// `nat`).
    pub fn with_table_tokens(mut self, table_tokens: usize) -> Self {
        self.table_tokens = table_tokens;
        self
    }

    /// Makes every command take `delay` before it is applied.
    pub fn with_delay(self, delay: Duration) -> Self {
        self.state.lock().delay = Some(delay);
        self
    }

    /// Makes any command whose line contains `pattern` exit 1 without
    /// touching the ruleset.
    pub fn fail_on(&self, pattern: impl Into<String>) {
        self.state.lock().failures.push(pattern.into());
    }

    /// Removes all injected failures.
    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    /// Creates a chain directly, bypassing call recording.
    pub fn seed_chain(&self, table: &str, chain: &str) {
        self.state.lock().create_chain(table, chain);
    }

    /// Appends a rule directly, creating the chain if needed. Returns the
    /// rule's handle.
    pub fn seed_rule(&self, table: &str, chain: &str, expr: &str) -> u64 {
        let mut state = self.state.lock();
        state.create_chain(table, chain);
        state
            .add_rule(table, chain, expr.to_string(), false)
            .unwrap_or_default()
    }

    /// Returns true if the chain exists.
    pub fn has_chain(&self, table: &str, chain: &str) -> bool {
        self.state.lock().chain(table, chain).is_some()
    }

    /// The `(handle, expression)` pairs of a chain, in listing order.
    pub fn rules(&self, table: &str, chain: &str) -> Vec<(u64, String)> {
        self.state
            .lock()
            .chain(table, chain)
            .map(|c| c.rules.iter().map(|r| (r.handle, r.expr.clone())).collect())
            .unwrap_or_default()
    }

    /// The chain as `nft [--handle] list chain` would print it.
    pub fn listing(&self, table: &str, chain: &str, with_handles: bool) -> Option<String> {
        self.state.lock().render(table, chain, with_handles)
    }

    /// Recorded command lines, oldest first.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    /// Forgets recorded command lines.
    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// The largest number of commands that were ever in progress at once.
    pub fn max_in_flight(&self) -> usize {
        self.state.lock().max_in_flight
    }
}

#[async_trait]
impl CommandRunner for FakeNft {
    async fn run(
        &self,
        args: &[String],
        cancel: &CancellationToken,
    ) -> PortMapResult<ExecResult> {
        let command = self.command_line(args);
        if cancel.is_cancelled() {
            return Err(PortMapError::Cancelled { command });
        }

        let delay = {
            let mut state = self.state.lock();
            state.calls.push(command.clone());
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
            state.delay
        };

        if let Some(delay) = delay {
            let cancelled = tokio::select! {
                _ = cancel.cancelled() => true,
                _ = tokio::time::sleep(delay) => false,
            };
            if cancelled {
                self.state.lock().in_flight -= 1;
                return Err(PortMapError::Cancelled { command });
            }
        }

        let mut state = self.state.lock();
        state.in_flight -= 1;
        if state.failures.iter().any(|pattern| command.contains(pattern.as_str())) {
            return Ok(ExecResult::failed(1, "Error: injected failure"));
        }
        Ok(state.apply(args, self.table_tokens))
    }
}
