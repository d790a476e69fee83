//! Per-chain serialization.
//!
//! The ruleset is shared, mutable and has no transactions, so every
//! operation against a chain runs inside that chain's exclusive region.
//! This closes the list-then-delete-by-handle race between concurrent
//! requests.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use portmap_common::{CancellationToken, PortMapError, PortMapResult};
use tokio::sync::OwnedMutexGuard;

use crate::types::ChainRef;

/// Registry of per-chain locks. Cloning shares the registry.
#[derive(Debug, Clone, Default)]
pub struct ChainLocks {
    inner: Arc<Mutex<HashMap<ChainRef, Arc<tokio::sync::Mutex<()>>>>>,
}

impl ChainLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, chain: &ChainRef) -> Arc<tokio::sync::Mutex<()>> {
        self.inner
            .lock()
            .entry(chain.clone())
            .or_default()
            .clone()
    }

    /// Waits for exclusive access to `chain`, giving up if `cancel` fires.
    pub async fn acquire(
        &self,
        chain: &ChainRef,
        cancel: &CancellationToken,
    ) -> PortMapResult<OwnedMutexGuard<()>> {
        let lock = self.lock_for(chain);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PortMapError::Cancelled {
                command: format!("waiting for lock on chain {}", chain),
            }),
            guard = lock.lock_owned() => Ok(guard),
        }
    }

    /// Number of chains that have been locked at least once.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
