//! Chain gateway submission tests: nonce discipline, retry classification,
//! gas policy and finality polling against the in-memory ledger.

use anyhow::Result;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, U256};
use metarelay_relayer::calls::{permit_call, CallDescriptor};
use metarelay_relayer::gateway::{FinalityPolicy, GasPolicy, RetryPolicy};
use metarelay_relayer::signer::LocalSigner;
use metarelay_relayer::{ChainGateway, Error, Finality, GatewayConfig};
use std::sync::Arc;
use std::time::Duration;

use crate::utils::{
    harness, harness_with, Harness, HarnessOptions, LedgerEvent, MockLedger, CHAIN_ID,
    GAS_ESTIMATE, GAS_PRICE_WEI,
};

/// A call the mock ledger accepts: a permit to the executor.
fn permit_to_executor(h: &Harness) -> CallDescriptor {
    permit_call(h.token, &h.permit(1_000))
}

fn gateway_with_gas(ledger: Arc<MockLedger>, executor: Address, gas: GasPolicy) -> ChainGateway {
    let wallet = LocalWallet::new(&mut rand::thread_rng()).with_chain_id(CHAIN_ID);
    ChainGateway::new(
        ledger,
        Arc::new(LocalSigner::from_wallet(wallet)),
        GatewayConfig {
            chain_id: CHAIN_ID,
            executor,
            gas,
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
            },
            finality: FinalityPolicy {
                confirmations: 1,
                poll_interval: Duration::from_millis(5),
                timeout: Duration::from_millis(100),
            },
        },
    )
}

// ── Nonce discipline ────────────────────────────────────────────────

#[tokio::test]
async fn test_concurrent_submissions_get_distinct_nonces() -> Result<()> {
    let h = harness();
    let priced = h.gateway.price(&permit_to_executor(&h)).await?;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let gateway = h.gateway.clone();
        let priced = priced.clone();
        handles.push(tokio::spawn(async move { gateway.submit(&priced).await }));
    }
    let mut nonces = Vec::new();
    for handle in handles {
        nonces.push(handle.await??.nonce);
    }
    nonces.sort();

    let expected: Vec<U256> = (0..8u64).map(U256::from).collect();
    assert_eq!(nonces, expected);
    assert_eq!(h.ledger.state().accepted.len(), 8);
    Ok(())
}

#[tokio::test]
async fn test_nonce_conflict_resyncs_from_chain() -> Result<()> {
    let h = harness();
    h.ledger.state().steal_nonces = 1;
    let priced = h.gateway.price(&permit_to_executor(&h)).await?;

    let tx = h.gateway.submit(&priced).await?;

    // Someone else took nonce 0; the retry re-reads and uses 1.
    assert_eq!(tx.nonce, U256::one());
    let accepted = h.ledger.state().accepted.clone();
    assert_eq!(accepted.len(), 1);
    assert_eq!(accepted[0].hash, tx.hash);
    Ok(())
}

#[tokio::test]
async fn test_nonce_is_cached_between_submissions() -> Result<()> {
    let h = harness();
    let priced = h.gateway.price(&permit_to_executor(&h)).await?;

    let first = h.gateway.submit(&priced).await?;
    let second = h.gateway.submit(&priced).await?;

    assert_eq!(first.nonce, U256::zero());
    assert_eq!(second.nonce, U256::one());
    let reads = h
        .ledger
        .events()
        .iter()
        .filter(|e| **e == LedgerEvent::PendingNonce)
        .count();
    assert_eq!(reads, 1);
    Ok(())
}

// ── Retry classification ────────────────────────────────────────────

#[tokio::test]
async fn test_transient_send_failures_are_retried() -> Result<()> {
    let h = harness();
    h.ledger.state().fail_sends = 2;
    let priced = h.gateway.price(&permit_to_executor(&h)).await?;

    let tx = h.gateway.submit(&priced).await?;

    assert_eq!(tx.nonce, U256::zero());
    assert_eq!(h.ledger.state().accepted.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_lost_response_counts_as_broadcast() -> Result<()> {
    let h = harness();
    h.ledger.state().drop_responses = 1;
    let priced = h.gateway.price(&permit_to_executor(&h)).await?;

    let tx = h.gateway.submit(&priced).await?;
    assert_eq!(tx.nonce, U256::zero());
    assert_eq!(h.ledger.state().accepted.len(), 1, "must not double-send");

    // The nonce was consumed.
    let next = h.gateway.submit(&priced).await?;
    assert_eq!(next.nonce, U256::one());
    Ok(())
}

#[tokio::test]
async fn test_retries_exhausted_returns_network_error() -> Result<()> {
    let h = harness_with(HarnessOptions {
        max_attempts: 2,
        ..Default::default()
    });
    h.ledger.state().fail_sends = 5;
    let priced = h.gateway.price(&permit_to_executor(&h)).await?;

    let err = h.gateway.submit(&priced).await.unwrap_err();
    assert!(matches!(err, Error::Network(_)), "{err:?}");
    assert!(h.ledger.state().accepted.is_empty());

    // No nonce leaked: the next success starts at 0.
    h.ledger.state().fail_sends = 0;
    let tx = h.gateway.submit(&priced).await?;
    assert_eq!(tx.nonce, U256::zero());
    Ok(())
}

#[tokio::test]
async fn test_simulated_revert_is_not_broadcast() -> Result<()> {
    let h = harness();
    let priced = h.gateway.price(&permit_to_executor(&h)).await?;
    h.ledger.state().permit_revert = Some("ERC20Permit: invalid signature".into());

    let err = h.gateway.submit(&priced).await.unwrap_err();

    assert_eq!(
        err,
        Error::Reverted(Some("ERC20Permit: invalid signature".into()))
    );
    assert!(!h.ledger.events().contains(&LedgerEvent::PendingNonce));
    assert!(h.ledger.sent_methods().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_reads_fail_with_network_when_offline() -> Result<()> {
    let h = harness();
    h.ledger.state().offline = true;

    let err = h.gateway.price(&permit_to_executor(&h)).await.unwrap_err();

    assert!(matches!(err, Error::Network(_)), "{err:?}");
    Ok(())
}

// ── Chain and gas ───────────────────────────────────────────────────

#[tokio::test]
async fn test_chain_id_mismatch_is_config_error() -> Result<()> {
    let h = harness();
    h.gateway.ensure_chain_id().await?;

    h.ledger.state().chain_id = 1;
    let err = h.gateway.ensure_chain_id().await.unwrap_err();
    assert!(matches!(err, Error::Config(_)), "{err:?}");
    Ok(())
}

#[tokio::test]
async fn test_node_gas_policy_asks_the_node() -> Result<()> {
    let h = harness();
    let priced = h.gateway.price(&permit_to_executor(&h)).await?;

    assert_eq!(priced.gas_limit, U256::from(GAS_ESTIMATE));
    assert_eq!(priced.gas_price, U256::from(GAS_PRICE_WEI));
    assert_eq!(h.ledger.events(), vec![LedgerEvent::Simulate("permit")]);
    Ok(())
}

#[tokio::test]
async fn test_fixed_gas_policy_skips_estimation() -> Result<()> {
    let h = harness();
    let gateway = gateway_with_gas(
        h.ledger.clone(),
        h.executor,
        GasPolicy::Fixed {
            gas_limit: U256::from(500_000u64),
            gas_price: U256::from(1_000_000_000u64),
        },
    );

    let priced = gateway.price(&permit_to_executor(&h)).await?;

    assert_eq!(priced.gas_limit, U256::from(500_000u64));
    assert_eq!(priced.gas_price, U256::from(1_000_000_000u64));
    assert!(h.ledger.events().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_node_gas_policy_overrides() -> Result<()> {
    let h = harness();
    let gateway = gateway_with_gas(
        h.ledger.clone(),
        h.executor,
        GasPolicy::Node {
            gas_limit: Some(U256::from(90_000u64)),
            gas_price: None,
        },
    );

    let priced = gateway.price(&permit_to_executor(&h)).await?;

    assert_eq!(priced.gas_limit, U256::from(90_000u64));
    assert_eq!(priced.gas_price, U256::from(GAS_PRICE_WEI));
    assert!(h.ledger.events().is_empty());
    Ok(())
}

// ── Finality ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_finality_waits_for_confirmations() -> Result<()> {
    let h = harness_with(HarnessOptions {
        confirmations: 3,
        finality_timeout: Duration::from_millis(60),
        ..Default::default()
    });
    let priced = h.gateway.price(&permit_to_executor(&h)).await?;
    let tx = h.gateway.submit(&priced).await?;

    // Mined, but only one confirmation so far.
    assert_eq!(h.gateway.await_finality(&tx).await, Finality::Timeout);

    let mined_at = h.ledger.state().receipts[&tx.hash].block_number;
    h.ledger.state().block += 2;
    assert_eq!(
        h.gateway.await_finality(&tx).await,
        Finality::Confirmed { block: mined_at }
    );
    Ok(())
}

#[tokio::test]
async fn test_finality_sees_late_mining() -> Result<()> {
    let h = harness_with(HarnessOptions {
        finality_timeout: Duration::from_secs(2),
        ..Default::default()
    });
    h.ledger.state().hold_mining = true;
    let priced = h.gateway.price(&permit_to_executor(&h)).await?;
    let tx = h.gateway.submit(&priced).await?;

    let ledger = h.ledger.clone();
    let miner = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        ledger.mine_pending();
    });

    let finality = h.gateway.await_finality(&tx).await;
    miner.await?;
    assert!(matches!(finality, Finality::Confirmed { .. }), "{finality:?}");
    Ok(())
}
