//! JSON-RPC access to the chain: the `LedgerRpc` seam plus an ethers-backed
//! client with primary → fallback failover and circuit breaker.

use async_trait::async_trait;
use ethers::providers::{Http, Middleware, Provider, ProviderError, RpcError};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, BlockId, BlockNumber, Bytes, TransactionRequest, H256, U256};
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

use crate::calls::decode_revert_reason;
use crate::metrics::METRICS;
use crate::Error;

const CIRCUIT_BREAKER_THRESHOLD: u64 = 5;
const CIRCUIT_BREAKER_WINDOW_MS: u64 = 30_000;

/// Read-only call from `from` to `to`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRequest {
    pub from: Address,
    pub to: Address,
    pub data: Bytes,
}

/// A signed legacy transaction ready for broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTx {
    /// RLP bytes for `eth_sendRawTransaction`.
    pub raw: Bytes,
    /// Locally computed hash; identical for every resend of the same bytes.
    pub hash: H256,
    pub from: Address,
    pub to: Address,
    pub nonce: U256,
    pub data: Bytes,
}

/// Mined transaction status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxReceipt {
    pub block_number: u64,
    pub success: bool,
}

/// Everything the gateway needs from a node. Implemented by [`RpcClient`]
/// and by in-memory ledgers in tests.
#[async_trait]
pub trait LedgerRpc: Send + Sync {
    async fn chain_id(&self) -> Result<u64, Error>;

    /// `eth_getTransactionCount(addr, "pending")`.
    async fn pending_nonce(&self, address: Address) -> Result<U256, Error>;

    async fn gas_price(&self) -> Result<U256, Error>;

    async fn estimate_gas(&self, request: &CallRequest) -> Result<U256, Error>;

    /// `eth_call`, at `block` or latest. A revert is `Error::Reverted`.
    async fn call(&self, request: &CallRequest, block: Option<u64>) -> Result<Bytes, Error>;

    async fn send_raw_transaction(&self, tx: &SignedTx) -> Result<H256, Error>;

    /// Whether the node has seen `hash`, pending or mined.
    async fn transaction_known(&self, hash: H256) -> Result<bool, Error>;

    async fn receipt(&self, hash: H256) -> Result<Option<TxReceipt>, Error>;

    async fn block_number(&self) -> Result<u64, Error>;
}

struct CircuitState {
    failures: u64,
    last_failure_ms: u64,
    open: bool,
}

/// RPC client with primary → fallback failover. Every call is bounded by `timeout`.
pub struct RpcClient {
    primary: Provider<Http>,
    fallback: Option<Provider<Http>>,
    primary_url: String,
    fallback_url: Option<String>,
    timeout: Duration,
    circuit: Mutex<CircuitState>,
    total_failovers: AtomicU64,
}

impl RpcClient {
    pub fn new(primary_url: &Url, fallback_url: Option<&Url>, timeout: Duration) -> Self {
        info!(
            primary = %primary_url,
            fallback = fallback_url.map(Url::as_str).unwrap_or("none"),
            timeout_ms = timeout.as_millis() as u64,
            "RPC client initialized"
        );
        Self {
            primary: Provider::new(Http::new(primary_url.clone())),
            fallback: fallback_url.map(|u| Provider::new(Http::new(u.clone()))),
            primary_url: primary_url.to_string(),
            fallback_url: fallback_url.map(Url::to_string),
            timeout,
            circuit: Mutex::new(CircuitState {
                failures: 0,
                last_failure_ms: 0,
                open: false,
            }),
            total_failovers: AtomicU64::new(0),
        }
    }

    pub fn primary_url(&self) -> &str {
        &self.primary_url
    }

    /// Currently active RPC URL.
    pub fn active_url(&self) -> &str {
        match (&self.fallback_url, self.is_circuit_open()) {
            (Some(url), true) => url,
            _ => &self.primary_url,
        }
    }

    pub fn failover_count(&self) -> u64 {
        self.total_failovers.load(Ordering::Relaxed)
    }

    /// Run `op` on the active provider; on a transport failure retry once on
    /// the other one. JSON-RPC error responses are returned as-is.
    async fn request<T, F, Fut>(&self, method: &'static str, op: F) -> Result<T, Error>
    where
        F: Fn(Provider<Http>) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let on_fallback = self.fallback.is_some() && self.is_circuit_open();
        let (first, second) = match (&self.fallback, on_fallback) {
            (Some(fallback), true) => (fallback, None),
            (fallback, _) => (&self.primary, fallback.as_ref()),
        };

        match self.bounded(op(first.clone())).await {
            Err(Error::Network(e)) => {
                if !on_fallback {
                    self.record_failure();
                }
                let Some(second) = second else {
                    return Err(Error::Network(format!("{method}: {e}")));
                };
                warn!(method, error = %e, "Primary RPC failed, trying fallback");
                self.bounded(op(second.clone())).await.map_err(|e2| match e2 {
                    Error::Network(e2) => {
                        Error::Network(format!("{method} failed: primary={e}, fallback={e2}"))
                    }
                    other => other,
                })
            }
            result => {
                if !on_fallback {
                    self.record_success();
                }
                result
            }
        }
    }

    async fn bounded<T>(
        &self,
        fut: impl Future<Output = Result<T, ProviderError>>,
    ) -> Result<T, Error> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(classify_provider_error(&e)),
            Err(_) => Err(Error::Network(format!(
                "timed out after {}ms",
                self.timeout.as_millis()
            ))),
        }
    }

    // --- Failover / circuit breaker ---

    fn record_success(&self) {
        let mut circuit = self.circuit.lock().unwrap_or_else(|e| e.into_inner());
        if circuit.failures > 0 {
            info!(primary = %self.primary_url, "Primary RPC recovered");
            circuit.failures = 0;
            circuit.open = false;
        }
    }

    fn record_failure(&self) {
        METRICS.rpc_errors.fetch_add(1, Ordering::Relaxed);
        let mut circuit = self.circuit.lock().unwrap_or_else(|e| e.into_inner());
        circuit.failures += 1;
        circuit.last_failure_ms = now_ms();
        if circuit.failures >= CIRCUIT_BREAKER_THRESHOLD && !circuit.open {
            circuit.open = true;
            if let Some(fallback) = &self.fallback_url {
                self.total_failovers.fetch_add(1, Ordering::Relaxed);
                METRICS.rpc_failovers.fetch_add(1, Ordering::Relaxed);
                warn!(
                    failures = circuit.failures,
                    fallback = %fallback,
                    "Circuit breaker opened, routing to fallback"
                );
            }
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        let mut circuit = self.circuit.lock().unwrap_or_else(|e| e.into_inner());
        if !circuit.open {
            return false;
        }
        if now_ms().saturating_sub(circuit.last_failure_ms) > CIRCUIT_BREAKER_WINDOW_MS {
            circuit.open = false;
            circuit.failures = 0;
            info!(primary = %self.primary_url, "Circuit breaker half-open, retrying primary");
            return false;
        }
        true
    }
}

fn typed(request: &CallRequest) -> TypedTransaction {
    TransactionRequest::new()
        .from(request.from)
        .to(request.to)
        .data(request.data.clone())
        .into()
}

#[async_trait]
impl LedgerRpc for RpcClient {
    async fn chain_id(&self) -> Result<u64, Error> {
        let id = self
            .request("eth_chainId", |p| async move { p.get_chainid().await })
            .await?;
        Ok(id.low_u64())
    }

    async fn pending_nonce(&self, address: Address) -> Result<U256, Error> {
        self.request("eth_getTransactionCount", |p| async move {
            p.get_transaction_count(address, Some(BlockId::Number(BlockNumber::Pending)))
                .await
        })
        .await
    }

    async fn gas_price(&self) -> Result<U256, Error> {
        self.request("eth_gasPrice", |p| async move { p.get_gas_price().await })
            .await
    }

    async fn estimate_gas(&self, request: &CallRequest) -> Result<U256, Error> {
        let tx = typed(request);
        self.request("eth_estimateGas", |p| {
            let tx = tx.clone();
            async move { p.estimate_gas(&tx, None).await }
        })
        .await
    }

    async fn call(&self, request: &CallRequest, block: Option<u64>) -> Result<Bytes, Error> {
        let tx = typed(request);
        let at = block.map(|n| BlockId::Number(BlockNumber::Number(n.into())));
        self.request("eth_call", |p| {
            let tx = tx.clone();
            async move { p.call(&tx, at).await }
        })
        .await
    }

    async fn send_raw_transaction(&self, tx: &SignedTx) -> Result<H256, Error> {
        self.request("eth_sendRawTransaction", |p| {
            let raw = tx.raw.clone();
            async move {
                p.send_raw_transaction(raw)
                    .await
                    .map(|pending| pending.tx_hash())
            }
        })
        .await
    }

    async fn transaction_known(&self, hash: H256) -> Result<bool, Error> {
        let tx = self
            .request("eth_getTransactionByHash", |p| async move {
                p.get_transaction(hash).await
            })
            .await?;
        Ok(tx.is_some())
    }

    async fn receipt(&self, hash: H256) -> Result<Option<TxReceipt>, Error> {
        let receipt = self
            .request("eth_getTransactionReceipt", |p| async move {
                p.get_transaction_receipt(hash).await
            })
            .await?;
        Ok(receipt.and_then(|r| {
            r.block_number.map(|block| TxReceipt {
                block_number: block.as_u64(),
                success: r.status.map_or(false, |s| s.as_u64() == 1),
            })
        }))
    }

    async fn block_number(&self) -> Result<u64, Error> {
        let head = self
            .request("eth_blockNumber", |p| async move { p.get_block_number().await })
            .await?;
        Ok(head.as_u64())
    }
}

fn classify_provider_error(err: &ProviderError) -> Error {
    match err.as_error_response() {
        Some(resp) => classify_rpc_error(resp.code, &resp.message, resp.data.as_ref()),
        None => Error::Network(err.to_string()),
    }
}

/// Map a JSON-RPC error response onto the relay taxonomy. Node wording varies
/// across clients, so this matches on the common substrings.
pub(crate) fn classify_rpc_error(code: i64, message: &str, data: Option<&Value>) -> Error {
    let lower = message.to_ascii_lowercase();
    if lower.contains("already known")
        || lower.contains("known transaction")
        || lower.contains("already imported")
    {
        return Error::AlreadyKnown;
    }
    if lower.contains("nonce too low")
        || lower.contains("nonce too high")
        || lower.contains("invalid nonce")
        || lower.contains("replacement transaction underpriced")
    {
        return Error::NonceConflict(message.to_string());
    }
    if code == 3 || lower.contains("revert") {
        let reason = data
            .and_then(revert_data)
            .and_then(|bytes| decode_revert_reason(&bytes))
            .or_else(|| {
                message
                    .split_once("execution reverted: ")
                    .map(|(_, reason)| reason.to_string())
            });
        return Error::Reverted(reason);
    }
    Error::Rejected(message.to_string())
}

/// Revert payload from a JSON-RPC error's `data`: a hex string, or an object
/// holding one under `data`.
fn revert_data(value: &Value) -> Option<Vec<u8>> {
    match value {
        Value::String(hex) => metarelay_types::decode_hex(hex).ok(),
        Value::Object(map) => map.get("data").and_then(revert_data),
        _ => None,
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
