//! Expiry and per-principal sequence checks against the executor's nonce store.
//!
//! Advisory only: the executor enforces replay protection itself. These checks
//! exist so predictable reverts never cost gas. Nothing here caches or writes
//! nonce state; every admission reads the authoritative value again.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use ethers::types::{Address, U256};
use metarelay_types::{AuthorizedAction, ReplayRejection};

use crate::{Admitted, GuardError};

/// Authoritative source of the next expected sequence per principal.
#[async_trait]
pub trait NonceSource: Send + Sync {
    async fn expected_sequence(&self, principal: Address) -> Result<U256, String>;
}

pub trait Clock: Send + Sync {
    fn now_secs(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }
}

/// Returns `Expired` if `expiry` is at or before `now`. `expiry` is the signed
/// uint256 deadline, so it is never narrowed.
pub fn assert_not_expired(expiry: U256, now: u64) -> Result<(), ReplayRejection> {
    if expiry <= U256::from(now) {
        return Err(ReplayRejection::Expired { expiry, now });
    }
    Ok(())
}

/// Returns `StaleOrFutureNonce` unless `claimed == expected`.
pub fn assert_nonce_expected(expected: U256, claimed: U256) -> Result<(), ReplayRejection> {
    if claimed != expected {
        return Err(ReplayRejection::StaleOrFutureNonce { expected, claimed });
    }
    Ok(())
}

pub struct ReplayGuard {
    nonces: Arc<dyn NonceSource>,
    clock: Arc<dyn Clock>,
}

impl ReplayGuard {
    pub fn new(nonces: Arc<dyn NonceSource>) -> Self {
        Self::with_clock(nonces, Arc::new(SystemClock))
    }

    pub fn with_clock(nonces: Arc<dyn NonceSource>, clock: Arc<dyn Clock>) -> Self {
        Self { nonces, clock }
    }

    /// Expiry is checked first, so an expired action never costs a chain read.
    pub async fn admit(&self, action: &AuthorizedAction) -> Result<Admitted, GuardError> {
        assert_not_expired(action.expiry, self.clock.now_secs())?;

        let expected = self
            .nonces
            .expected_sequence(action.principal)
            .await
            .map_err(GuardError::Unavailable)?;
        assert_nonce_expected(expected, action.sequence)?;

        Ok(Admitted {
            principal: action.principal,
            sequence: action.sequence,
        })
    }
}
