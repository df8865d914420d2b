//! In-memory ledger and relay harness for integration tests.
//!
//! `MockLedger` stands in for a node: it tracks the relay account's nonce,
//! simulates the token's `permit` and the executor's `executeMetaTx` and
//! `nonces`, mines on accept, and exposes knobs for injecting faults.

use async_trait::async_trait;
use ethers::abi::{decode, encode, ParamType, Token};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::id;
use metarelay_auth::Clock;
use metarelay_relayer::calls::{
    ExecutorAbi, EXECUTE_PACKED_SIG, EXECUTE_SPLIT_SIG, NONCES_SIG, PERMIT_SIG,
};
use metarelay_relayer::gateway::{FinalityPolicy, GasPolicy, RetryPolicy};
use metarelay_relayer::rpc::{CallRequest, LedgerRpc, SignedTx, TxReceipt};
use metarelay_relayer::signer::LocalSigner;
use metarelay_relayer::{ChainGateway, Error, GatewayConfig, RelayPipeline};
use metarelay_types::{
    signing_digest, AuthorizedAction, PermitGrant, SignatureParts, TypedDataDomain,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const CHAIN_ID: u64 = 56;
pub const GAS_PRICE_WEI: u64 = 3_000_000_000;
pub const GAS_ESTIMATE: u64 = 150_000;

/// One RPC interaction, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEvent {
    /// `eth_call` or `eth_estimateGas` of a contract method.
    Simulate(&'static str),
    /// A broadcast the ledger accepted.
    Send { method: &'static str, nonce: U256 },
    PendingNonce,
}

#[derive(Debug, Clone)]
struct MinedRevert {
    block: u64,
    to: Address,
    data: Bytes,
    reason: String,
}

#[derive(Debug, Default)]
pub struct LedgerState {
    pub block: u64,
    pub chain_id: u64,
    /// Relay-side account nonces (pending).
    pub account_nonces: HashMap<Address, U256>,
    /// Executor `nonces(address)`.
    pub executor_nonces: HashMap<Address, U256>,
    /// `(token, owner) → allowance` granted to the executor.
    pub allowances: HashMap<(Address, Address), U256>,
    pub known: HashSet<H256>,
    pub receipts: HashMap<H256, TxReceipt>,
    pub mempool: Vec<SignedTx>,
    pub accepted: Vec<SignedTx>,
    pub events: Vec<LedgerEvent>,
    mined_reverts: Vec<MinedRevert>,

    // --- Fault knobs ---
    /// Every call fails with a transport error.
    pub offline: bool,
    /// Next N broadcasts fail with a transport error before reaching the node.
    pub fail_sends: u32,
    /// Next N broadcasts are accepted, then the response is lost.
    pub drop_responses: u32,
    /// Next N broadcasts hit a nonce someone else just used.
    pub steal_nonces: u32,
    /// Accepted transactions stay pending until `mine_pending`.
    pub hold_mining: bool,
    /// Like `hold_mining`, for `executeMetaTx` only.
    pub hold_actions: bool,
    /// Permit simulation reverts with this reason.
    pub permit_revert: Option<String>,
    /// `executeMetaTx` simulation reverts with this reason.
    pub action_revert: Option<String>,
    /// `executeMetaTx` simulates fine but reverts when mined.
    pub action_revert_on_mine: Option<String>,
}

pub struct MockLedger {
    executor: Address,
    state: Mutex<LedgerState>,
}

impl MockLedger {
    pub fn new(executor: Address) -> Self {
        Self {
            executor,
            state: Mutex::new(LedgerState {
                block: 100,
                chain_id: CHAIN_ID,
                ..Default::default()
            }),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap()
    }

    pub fn events(&self) -> Vec<LedgerEvent> {
        self.state().events.clone()
    }

    /// Methods broadcast so far, in order.
    pub fn sent_methods(&self) -> Vec<&'static str> {
        self.state()
            .events
            .iter()
            .filter_map(|e| match e {
                LedgerEvent::Send { method, .. } => Some(*method),
                _ => None,
            })
            .collect()
    }

    pub fn executor_nonce(&self, owner: Address) -> U256 {
        self.state()
            .executor_nonces
            .get(&owner)
            .copied()
            .unwrap_or_default()
    }

    pub fn allowance(&self, token: Address, owner: Address) -> U256 {
        self.state()
            .allowances
            .get(&(token, owner))
            .copied()
            .unwrap_or_default()
    }

    pub fn approve(&self, token: Address, owner: Address, value: U256) {
        self.state().allowances.insert((token, owner), value);
    }

    /// Mine everything in the mempool, one block per transaction.
    pub fn mine_pending(&self) {
        let mut state = self.state();
        let pending = std::mem::take(&mut state.mempool);
        for tx in pending {
            self.mine(&mut state, &tx);
        }
    }

    fn mine(&self, state: &mut LedgerState, tx: &SignedTx) {
        state.block += 1;
        let block = state.block;
        let method = method_name(&tx.data);
        let mined_revert = if method == "executeMetaTx" {
            state.action_revert_on_mine.clone()
        } else {
            None
        };
        let outcome = match mined_revert {
            Some(reason) => Err(Some(reason)),
            None => self.execute(state, tx.to, &tx.data, true).map(|_| ()),
        };
        let success = match outcome {
            Ok(()) => true,
            Err(reason) => {
                state.mined_reverts.push(MinedRevert {
                    block,
                    to: tx.to,
                    data: tx.data.clone(),
                    reason: reason.unwrap_or_default(),
                });
                false
            }
        };
        state.receipts.insert(
            tx.hash,
            TxReceipt {
                block_number: block,
                success,
            },
        );
    }

    /// Run a contract call against current state. `apply` commits effects.
    fn execute(
        &self,
        state: &mut LedgerState,
        to: Address,
        data: &[u8],
        apply: bool,
    ) -> Result<Bytes, Option<String>> {
        if data.len() < 4 {
            return Err(None);
        }
        let (selector, args) = data.split_at(4);
        let selector: [u8; 4] = [selector[0], selector[1], selector[2], selector[3]];

        if selector == id(NONCES_SIG) && to == self.executor {
            let tokens = decode(&[ParamType::Address], args).map_err(|_| None)?;
            let owner = tokens[0].clone().into_address().unwrap_or_default();
            let nonce = state.executor_nonces.get(&owner).copied().unwrap_or_default();
            return Ok(Bytes::from(encode(&[Token::Uint(nonce)])));
        }

        if selector == id(PERMIT_SIG) {
            if let Some(reason) = &state.permit_revert {
                return Err(Some(reason.clone()));
            }
            let tokens = decode(
                &[
                    ParamType::Address,
                    ParamType::Address,
                    ParamType::Uint(256),
                    ParamType::Uint(256),
                    ParamType::Uint(8),
                    ParamType::FixedBytes(32),
                    ParamType::FixedBytes(32),
                ],
                args,
            )
            .map_err(|_| None)?;
            let owner = tokens[0].clone().into_address().unwrap_or_default();
            let spender = tokens[1].clone().into_address().unwrap_or_default();
            let value = tokens[2].clone().into_uint().unwrap_or_default();
            let deadline = tokens[3].clone().into_uint().unwrap_or_default();
            if deadline < U256::from(now_secs()) {
                return Err(Some("ERC20Permit: expired deadline".into()));
            }
            if spender != self.executor {
                return Err(Some("ERC20Permit: invalid signature".into()));
            }
            if apply {
                state.allowances.insert((to, owner), value);
            }
            return Ok(Bytes::new());
        }

        let execute_params = if selector == id(EXECUTE_SPLIT_SIG) {
            Some(vec![
                ParamType::Address,
                ParamType::Address,
                ParamType::Uint(256),
                ParamType::Uint(256),
                ParamType::Uint(256),
                ParamType::Uint(8),
                ParamType::FixedBytes(32),
                ParamType::FixedBytes(32),
            ])
        } else if selector == id(EXECUTE_PACKED_SIG) {
            Some(vec![
                ParamType::Address,
                ParamType::Address,
                ParamType::Uint(256),
                ParamType::Uint(256),
                ParamType::Uint(256),
                ParamType::Bytes,
            ])
        } else {
            None
        };

        if let (Some(params), true) = (execute_params, to == self.executor) {
            if let Some(reason) = &state.action_revert {
                return Err(Some(reason.clone()));
            }
            let tokens = decode(&params, args).map_err(|_| None)?;
            let token = tokens[0].clone().into_address().unwrap_or_default();
            let from = tokens[1].clone().into_address().unwrap_or_default();
            let amount = tokens[2].clone().into_uint().unwrap_or_default();
            let nonce = tokens[3].clone().into_uint().unwrap_or_default();
            let deadline = tokens[4].clone().into_uint().unwrap_or_default();

            let expected = state.executor_nonces.get(&from).copied().unwrap_or_default();
            if nonce != expected {
                return Err(Some("MetaTx: invalid nonce".into()));
            }
            if deadline < U256::from(now_secs()) {
                return Err(Some("MetaTx: expired".into()));
            }
            let allowance = state
                .allowances
                .get(&(token, from))
                .copied()
                .unwrap_or_default();
            if allowance < amount {
                return Err(Some("ERC20: insufficient allowance".into()));
            }
            if apply {
                state.executor_nonces.insert(from, expected + U256::one());
                state.allowances.insert((token, from), allowance - amount);
            }
            return Ok(Bytes::new());
        }

        Err(None)
    }

    fn simulate(&self, request: &CallRequest, block: Option<u64>) -> Result<Bytes, Error> {
        let mut state = self.state();
        if state.offline {
            return Err(Error::Network("connection refused".into()));
        }
        state
            .events
            .push(LedgerEvent::Simulate(method_name(&request.data)));

        if let Some(block) = block {
            let replayed = state
                .mined_reverts
                .iter()
                .find(|r| r.block == block && r.to == request.to && r.data == request.data)
                .map(|r| r.reason.clone());
            if let Some(reason) = replayed {
                return Err(Error::Reverted(Some(reason).filter(|r| !r.is_empty())));
            }
        }
        self.execute(&mut state, request.to, &request.data, false)
            .map_err(Error::Reverted)
    }
}

fn method_name(data: &[u8]) -> &'static str {
    if data.len() < 4 {
        return "unknown";
    }
    let selector = [data[0], data[1], data[2], data[3]];
    if selector == id(PERMIT_SIG) {
        "permit"
    } else if selector == id(EXECUTE_SPLIT_SIG) || selector == id(EXECUTE_PACKED_SIG) {
        "executeMetaTx"
    } else if selector == id(NONCES_SIG) {
        "nonces"
    } else {
        "unknown"
    }
}

#[async_trait]
impl LedgerRpc for MockLedger {
    async fn chain_id(&self) -> Result<u64, Error> {
        let state = self.state();
        if state.offline {
            return Err(Error::Network("connection refused".into()));
        }
        Ok(state.chain_id)
    }

    async fn pending_nonce(&self, address: Address) -> Result<U256, Error> {
        let mut state = self.state();
        if state.offline {
            return Err(Error::Network("connection refused".into()));
        }
        state.events.push(LedgerEvent::PendingNonce);
        Ok(state.account_nonces.get(&address).copied().unwrap_or_default())
    }

    async fn gas_price(&self) -> Result<U256, Error> {
        Ok(U256::from(GAS_PRICE_WEI))
    }

    async fn estimate_gas(&self, request: &CallRequest) -> Result<U256, Error> {
        self.simulate(request, None)?;
        Ok(U256::from(GAS_ESTIMATE))
    }

    async fn call(&self, request: &CallRequest, block: Option<u64>) -> Result<Bytes, Error> {
        self.simulate(request, block)
    }

    async fn send_raw_transaction(&self, tx: &SignedTx) -> Result<H256, Error> {
        let mut state = self.state();
        if state.offline {
            return Err(Error::Network("connection refused".into()));
        }
        if state.fail_sends > 0 {
            state.fail_sends -= 1;
            return Err(Error::Network("connection reset by peer".into()));
        }
        if state.known.contains(&tx.hash) {
            return Err(Error::AlreadyKnown);
        }
        let current = state.account_nonces.get(&tx.from).copied().unwrap_or_default();
        if state.steal_nonces > 0 {
            state.steal_nonces -= 1;
            state.account_nonces.insert(tx.from, current + U256::one());
            return Err(Error::NonceConflict("nonce too low".into()));
        }
        if tx.nonce < current {
            return Err(Error::NonceConflict("nonce too low".into()));
        }
        if tx.nonce > current {
            return Err(Error::NonceConflict("nonce too high".into()));
        }

        state.account_nonces.insert(tx.from, current + U256::one());
        state.known.insert(tx.hash);
        state.accepted.push(tx.clone());
        state.events.push(LedgerEvent::Send {
            method: method_name(&tx.data),
            nonce: tx.nonce,
        });
        let held = state.hold_mining
            || (state.hold_actions && method_name(&tx.data) == "executeMetaTx");
        if held {
            state.mempool.push(tx.clone());
        } else {
            self.mine(&mut state, tx);
        }

        if state.drop_responses > 0 {
            state.drop_responses -= 1;
            return Err(Error::Network("timed out".into()));
        }
        Ok(tx.hash)
    }

    async fn transaction_known(&self, hash: H256) -> Result<bool, Error> {
        let state = self.state();
        if state.offline {
            return Err(Error::Network("connection refused".into()));
        }
        Ok(state.known.contains(&hash))
    }

    async fn receipt(&self, hash: H256) -> Result<Option<TxReceipt>, Error> {
        Ok(self.state().receipts.get(&hash).copied())
    }

    async fn block_number(&self) -> Result<u64, Error> {
        Ok(self.state().block)
    }
}

pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Clock pinned to a fixed instant.
pub struct FixedClock(pub u64);

impl Clock for FixedClock {
    fn now_secs(&self) -> u64 {
        self.0
    }
}

// ── Harness ─────────────────────────────────────────────────────────

pub struct Harness {
    pub ledger: Arc<MockLedger>,
    pub gateway: Arc<ChainGateway>,
    pub pipeline: RelayPipeline,
    pub domain: TypedDataDomain,
    pub executor: Address,
    pub token: Address,
    pub user: LocalWallet,
}

pub struct HarnessOptions {
    pub abi: ExecutorAbi,
    pub max_attempts: u32,
    pub finality_timeout: Duration,
    pub confirmations: u64,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            abi: ExecutorAbi::SplitSignature,
            max_attempts: 3,
            finality_timeout: Duration::from_millis(300),
            confirmations: 1,
        }
    }
}

pub fn harness() -> Harness {
    harness_with(HarnessOptions::default())
}

pub fn harness_with(options: HarnessOptions) -> Harness {
    let executor = Address::repeat_byte(0xee);
    let token = Address::repeat_byte(0xbb);
    let ledger = Arc::new(MockLedger::new(executor));

    let relay_wallet = LocalWallet::new(&mut rand::thread_rng()).with_chain_id(CHAIN_ID);
    let gateway = Arc::new(ChainGateway::new(
        ledger.clone(),
        Arc::new(LocalSigner::from_wallet(relay_wallet)),
        GatewayConfig {
            chain_id: CHAIN_ID,
            executor,
            gas: GasPolicy::Node {
                gas_limit: None,
                gas_price: None,
            },
            retry: RetryPolicy {
                max_attempts: options.max_attempts,
                base_delay: Duration::from_millis(1),
            },
            finality: FinalityPolicy {
                confirmations: options.confirmations,
                poll_interval: Duration::from_millis(5),
                timeout: options.finality_timeout,
            },
        },
    ));

    let domain = TypedDataDomain {
        name: "MetaArbExecutor".into(),
        version: "1".into(),
        chain_id: CHAIN_ID,
        verifying_contract: executor,
    };
    let pipeline = RelayPipeline::new(domain.clone(), options.abi, gateway.clone());

    Harness {
        ledger,
        gateway,
        pipeline,
        domain,
        executor,
        token,
        user: LocalWallet::new(&mut rand::thread_rng()),
    }
}

impl Harness {
    /// A `MetaTx` for `self.user`, signed under the harness domain.
    pub fn signed_action(&self, amount: u64, sequence: u64, expiry: u64) -> AuthorizedAction {
        sign_action(&self.domain, &self.user, self.token, amount, sequence, expiry)
    }

    /// A permit from `self.user` to the executor. The mock token does not
    /// check permit signatures.
    pub fn permit(&self, value: u64) -> PermitGrant {
        PermitGrant {
            owner: self.user.address(),
            spender: self.executor,
            value: U256::from(value),
            expiry: U256::from(now_secs() + 3600),
            signature: SignatureParts {
                v: 27,
                r: H256::repeat_byte(0x11),
                s: H256::repeat_byte(0x22),
            },
        }
    }
}

pub fn sign_action(
    domain: &TypedDataDomain,
    wallet: &LocalWallet,
    token: Address,
    amount: u64,
    sequence: u64,
    expiry: u64,
) -> AuthorizedAction {
    let mut action = AuthorizedAction {
        principal: wallet.address(),
        target_token: token,
        amount: U256::from(amount),
        sequence: U256::from(sequence),
        expiry: U256::from(expiry),
        signature: Bytes::new(),
    };
    let signature = wallet
        .sign_hash(signing_digest(domain, &action))
        .expect("sign MetaTx digest");
    action.signature = Bytes::from(signature.to_vec());
    action
}
