//! Single-writer allocator for the relay account's outgoing nonces.
//!
//! One `NonceGuard` exists at a time. Hold it across sign + broadcast so two
//! concurrent submissions can never sign with the same nonce.

use ethers::types::U256;
use std::future::Future;
use tokio::sync::{Mutex, MutexGuard};

use crate::Error;

/// Next nonce to use, or `None` when it must be re-read from the chain.
#[derive(Debug, Default)]
pub struct SubmitterNonces {
    next: Mutex<Option<U256>>,
}

impl SubmitterNonces {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the allocator. `fetch` runs only when no nonce is cached.
    pub async fn reserve<F, Fut>(&self, fetch: F) -> Result<NonceGuard<'_>, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<U256, Error>>,
    {
        let mut slot = self.next.lock().await;
        let nonce = match *slot {
            Some(n) => n,
            None => {
                let n = fetch().await?;
                *slot = Some(n);
                n
            }
        };
        Ok(NonceGuard { slot, nonce })
    }

    /// Cached value, for diagnostics. Waits for any in-flight submission.
    pub async fn peek(&self) -> Option<U256> {
        *self.next.lock().await
    }
}

/// RAII guard from [`SubmitterNonces::reserve`]. Dropping it without a
/// decision leaves the cached nonce unchanged.
pub struct NonceGuard<'a> {
    slot: MutexGuard<'a, Option<U256>>,
    nonce: U256,
}

impl NonceGuard<'_> {
    pub fn nonce(&self) -> U256 {
        self.nonce
    }

    /// The node accepted a transaction at this nonce.
    pub fn commit(mut self) {
        *self.slot = Some(self.nonce + U256::one());
    }

    /// Our view is wrong; force a chain read on the next reservation.
    pub fn invalidate(mut self) {
        *self.slot = None;
    }
}
