//! Test infrastructure for the host port mapping daemon
//!
//! Provides:
//! - [`FakeNft`]: an in-memory nft ruleset behind the `CommandRunner` seam,
//!   with call recording, failure injection and latency simulation
//! - [`CommandVerifier`]: assertions over the recorded command lines
//! - Fixtures for common mapping requests

pub mod fake_nft;
pub mod fixtures;
mod verification;

pub use fake_nft::FakeNft;
pub use fixtures::*;
pub use verification::*;
