//! Replay guard against the chain gateway as its nonce source.

use anyhow::Result;
use ethers::signers::Signer;
use ethers::types::U256;
use metarelay_auth::{GuardError, NonceSource, ReplayGuard};
use metarelay_types::ReplayRejection;
use std::sync::Arc;

use crate::utils::{harness, now_secs, FixedClock};

#[tokio::test]
async fn test_gateway_reads_executor_nonce() -> Result<()> {
    let h = harness();
    let user = h.user.address();
    assert_eq!(h.gateway.expected_sequence(user).await, Ok(U256::zero()));

    h.ledger
        .state()
        .executor_nonces
        .insert(user, U256::from(4u64));
    assert_eq!(h.gateway.expected_sequence(user).await, Ok(U256::from(4u64)));
    Ok(())
}

#[tokio::test]
async fn test_guard_reads_fresh_after_chain_advances() -> Result<()> {
    let h = harness();
    let guard = ReplayGuard::new(h.gateway.clone());
    let action = h.signed_action(10, 0, now_secs() + 3600);

    let admitted = guard.admit(&action).await?;
    assert_eq!(admitted.principal, h.user.address());
    assert_eq!(admitted.sequence, U256::zero());

    // Someone else's relay executed sequence 0 meanwhile.
    h.ledger
        .state()
        .executor_nonces
        .insert(h.user.address(), U256::one());
    let err = guard.admit(&action).await.unwrap_err();
    assert_eq!(
        err,
        GuardError::Rejected(ReplayRejection::StaleOrFutureNonce {
            expected: U256::one(),
            claimed: U256::zero(),
        })
    );
    Ok(())
}

#[tokio::test]
async fn test_guard_fails_closed_when_offline() -> Result<()> {
    let h = harness();
    h.ledger.state().offline = true;
    let guard = ReplayGuard::new(h.gateway.clone());
    let action = h.signed_action(10, 0, now_secs() + 3600);

    let err = guard.admit(&action).await.unwrap_err();
    assert!(matches!(err, GuardError::Unavailable(_)), "{err:?}");
    Ok(())
}

#[tokio::test]
async fn test_guard_checks_expiry_before_reading() -> Result<()> {
    let h = harness();
    h.ledger.state().offline = true;
    let now = now_secs();
    let guard = ReplayGuard::with_clock(h.gateway.clone(), Arc::new(FixedClock(now)));
    let action = h.signed_action(10, 0, now - 1);

    let err = guard.admit(&action).await.unwrap_err();
    assert_eq!(
        err,
        GuardError::Rejected(ReplayRejection::Expired {
            expiry: U256::from(now - 1),
            now,
        })
    );
    assert!(h.ledger.events().is_empty());
    Ok(())
}
