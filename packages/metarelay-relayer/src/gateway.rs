//! Chain gateway: prices, simulates, signs and broadcasts contract calls from
//! the relay account, then waits for them to settle.

use async_trait::async_trait;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, TransactionRequest, H256, U256};
use metarelay_auth::NonceSource;
use std::future::Future;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::calls::{decode_uint, nonces_call, CallDescriptor};
use crate::metrics::METRICS;
use crate::rpc::{CallRequest, LedgerRpc, SignedTx};
use crate::signer::RelayerSigner;
use crate::submitter::SubmitterNonces;
use crate::Error;

/// Upper bound on the backoff multiplier (2^5).
const MAX_BACKOFF_SHIFT: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GasPolicy {
    Fixed {
        gas_limit: U256,
        gas_price: U256,
    },
    /// Ask the node, unless overridden.
    Node {
        gas_limit: Option<U256>,
        gas_price: Option<U256>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Delay after the `attempt`-th failure (1-based): base · 2^(attempt-1).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(MAX_BACKOFF_SHIFT);
        self.base_delay.saturating_mul(1u32 << shift)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinalityPolicy {
    /// Blocks including the receipt's own; 1 means "mined".
    pub confirmations: u64,
    pub poll_interval: Duration,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewayConfig {
    pub chain_id: u64,
    pub executor: Address,
    pub gas: GasPolicy,
    pub retry: RetryPolicy,
    pub finality: FinalityPolicy,
}

/// A call with its gas terms fixed.
#[derive(Debug, Clone, PartialEq)]
pub struct PricedCall {
    pub call: CallDescriptor,
    pub gas_limit: U256,
    pub gas_price: U256,
}

/// A transaction the node accepted.
#[derive(Debug, Clone, PartialEq)]
pub struct TxRef {
    pub hash: H256,
    pub nonce: U256,
    pub call: CallDescriptor,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finality {
    Confirmed { block: u64 },
    Reverted { block: u64, reason: Option<String> },
    /// Still pending when the wait ended. Not cancelled; it may yet land.
    Timeout,
}

pub struct ChainGateway {
    rpc: Arc<dyn LedgerRpc>,
    signer: Arc<dyn RelayerSigner>,
    nonces: SubmitterNonces,
    config: GatewayConfig,
}

impl ChainGateway {
    pub fn new(
        rpc: Arc<dyn LedgerRpc>,
        signer: Arc<dyn RelayerSigner>,
        config: GatewayConfig,
    ) -> Self {
        info!(
            relay = ?signer.address(),
            executor = ?config.executor,
            chain_id = config.chain_id,
            "Chain gateway initialized"
        );
        Self {
            rpc,
            signer,
            nonces: SubmitterNonces::new(),
            config,
        }
    }

    pub fn executor(&self) -> Address {
        self.config.executor
    }

    pub fn relay_address(&self) -> Address {
        self.signer.address()
    }

    pub fn chain_id(&self) -> u64 {
        self.config.chain_id
    }

    /// Fail unless the node serves the configured chain.
    pub async fn ensure_chain_id(&self) -> Result<(), Error> {
        let remote = self
            .read_with_retry("eth_chainId", || self.rpc.chain_id())
            .await?;
        if remote != self.config.chain_id {
            return Err(Error::Config(format!(
                "node reports chain id {remote}, configured {}",
                self.config.chain_id
            )));
        }
        Ok(())
    }

    fn call_request(&self, call: &CallDescriptor) -> CallRequest {
        CallRequest {
            from: self.signer.address(),
            to: call.to,
            data: call.calldata(),
        }
    }

    pub async fn price(&self, call: &CallDescriptor) -> Result<PricedCall, Error> {
        let (gas_limit, gas_price) = match self.config.gas {
            GasPolicy::Fixed {
                gas_limit,
                gas_price,
            } => (gas_limit, gas_price),
            GasPolicy::Node {
                gas_limit,
                gas_price,
            } => {
                let gas_limit = match gas_limit {
                    Some(limit) => limit,
                    None => {
                        let request = self.call_request(call);
                        self.read_with_retry("eth_estimateGas", || {
                            self.rpc.estimate_gas(&request)
                        })
                        .await?
                    }
                };
                let gas_price = match gas_price {
                    Some(price) => price,
                    None => {
                        self.read_with_retry("eth_gasPrice", || self.rpc.gas_price())
                            .await?
                    }
                };
                (gas_limit, gas_price)
            }
        };
        Ok(PricedCall {
            call: call.clone(),
            gas_limit,
            gas_price,
        })
    }

    /// Simulate, then sign and broadcast with bounded retries. A simulated
    /// revert returns before anything is broadcast.
    pub async fn submit(&self, priced: &PricedCall) -> Result<TxRef, Error> {
        let request = self.call_request(&priced.call);
        self.read_with_retry("eth_call", || self.rpc.call(&request, None))
            .await?;

        let mut attempt = 1;
        loop {
            let err = match self.broadcast(priced, &request).await {
                Ok(tx) => return Ok(tx),
                Err(e) if e.is_retryable() => e,
                Err(e) => return Err(e),
            };
            if attempt >= self.config.retry.max_attempts {
                warn!(
                    method = priced.call.method(),
                    attempts = attempt,
                    error = %err,
                    "Submission retries exhausted"
                );
                return Err(err);
            }
            tokio::time::sleep(self.config.retry.backoff(attempt)).await;
            attempt += 1;
        }
    }

    /// One sign + send under the nonce guard.
    async fn broadcast(&self, priced: &PricedCall, request: &CallRequest) -> Result<TxRef, Error> {
        let guard = self
            .nonces
            .reserve(|| self.rpc.pending_nonce(request.from))
            .await?;
        let nonce = guard.nonce();

        let tx: TypedTransaction = TransactionRequest::new()
            .from(request.from)
            .to(request.to)
            .data(request.data.clone())
            .nonce(nonce)
            .gas(priced.gas_limit)
            .gas_price(priced.gas_price)
            .chain_id(self.config.chain_id)
            .into();
        let signature = self.signer.sign_transaction(&tx).await?;
        let signed = SignedTx {
            raw: tx.rlp_signed(&signature),
            hash: tx.hash(&signature),
            from: request.from,
            to: request.to,
            nonce,
            data: request.data.clone(),
        };

        match self.rpc.send_raw_transaction(&signed).await {
            Ok(_) | Err(Error::AlreadyKnown) => {}
            Err(Error::Network(e)) => {
                // The node may have taken it before the connection dropped.
                if !matches!(self.rpc.transaction_known(signed.hash).await, Ok(true)) {
                    guard.invalidate();
                    METRICS.network_retries.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        nonce = %nonce,
                        tx_hash = ?signed.hash,
                        error = %e,
                        "Broadcast failed, nonce re-sync"
                    );
                    return Err(Error::Network(e));
                }
            }
            Err(Error::NonceConflict(e)) => {
                guard.invalidate();
                METRICS.nonce_retries.fetch_add(1, Ordering::Relaxed);
                warn!(nonce = %nonce, error = %e, "Nonce conflict, re-syncing from chain");
                return Err(Error::NonceConflict(e));
            }
            Err(e) => return Err(e),
        }
        guard.commit();

        METRICS.tx_broadcast.fetch_add(1, Ordering::Relaxed);
        info!(
            method = priced.call.method(),
            nonce = %nonce,
            tx_hash = ?signed.hash,
            "Transaction broadcast"
        );
        Ok(TxRef {
            hash: signed.hash,
            nonce,
            call: priced.call.clone(),
        })
    }

    /// Poll for a receipt until it has enough confirmations or the wait times out.
    pub async fn await_finality(&self, tx: &TxRef) -> Finality {
        let policy = self.config.finality;
        let started = Instant::now();
        loop {
            match self.rpc.receipt(tx.hash).await {
                Ok(Some(receipt)) if !receipt.success => {
                    let reason = self.replay_revert(tx, receipt.block_number).await;
                    return Finality::Reverted {
                        block: receipt.block_number,
                        reason,
                    };
                }
                Ok(Some(receipt)) => match self.rpc.block_number().await {
                    Ok(head) if is_final(head, receipt.block_number, policy.confirmations) => {
                        return Finality::Confirmed {
                            block: receipt.block_number,
                        };
                    }
                    Ok(_) => {}
                    Err(e) => debug!(error = %e, "Block number poll failed"),
                },
                Ok(None) => {}
                Err(e) => debug!(tx_hash = ?tx.hash, error = %e, "Receipt poll failed"),
            }

            let elapsed = started.elapsed();
            if elapsed >= policy.timeout {
                warn!(tx_hash = ?tx.hash, "Finality wait timed out");
                return Finality::Timeout;
            }
            tokio::time::sleep(policy.poll_interval.min(policy.timeout - elapsed)).await;
        }
    }

    /// Re-run the call at the receipt's block to recover the revert reason.
    async fn replay_revert(&self, tx: &TxRef, block: u64) -> Option<String> {
        match self.rpc.call(&self.call_request(&tx.call), Some(block)).await {
            Err(Error::Reverted(reason)) => reason,
            _ => None,
        }
    }

    /// Retry idempotent reads on transport failures.
    async fn read_with_retry<T, F, Fut>(&self, method: &'static str, op: F) -> Result<T, Error>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let retry = self.config.retry;
        let mut attempt = 1;
        loop {
            match op().await {
                Err(Error::Network(e)) if attempt < retry.max_attempts => {
                    debug!(method, attempt, error = %e, "Read failed, retrying");
                    tokio::time::sleep(retry.backoff(attempt)).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

/// A receipt at `block` counts itself as the first confirmation.
fn is_final(head: u64, block: u64, confirmations: u64) -> bool {
    head.saturating_add(1) >= block.saturating_add(confirmations)
}

#[async_trait]
impl NonceSource for ChainGateway {
    /// Always a fresh `nonces(principal)` read on the executor.
    async fn expected_sequence(&self, principal: Address) -> Result<U256, String> {
        let request = self.call_request(&nonces_call(self.config.executor, principal));
        let raw = self
            .read_with_retry("nonces", || self.rpc.call(&request, None))
            .await
            .map_err(|e| e.to_string())?;
        decode_uint(&raw)
    }
}
