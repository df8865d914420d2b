//! Relay pipeline: one request in, exactly one `ExecutionOutcome` out.
//!
//! ```text
//! Received → Verified → Admitted → Submitting(stage) → Confirming(stage, tx) → Done
//! ```
//!
//! With a permit the stages run `Permit` then `Action`; the action is never
//! submitted before the permit has confirmed.

use ethers::types::H256;
use metarelay_auth::{
    verify_signature, Clock, NonceSource, ReplayGuard, SignatureVerifier, Verified,
};
use metarelay_types::{RelayRequest, SignatureParts, TypedDataDomain};
use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::calls::{execute_meta_tx_call, permit_call, ExecutorAbi};
use crate::gateway::{ChainGateway, Finality, TxRef};
use crate::metrics::METRICS;
use crate::response::{ErrorKind, ExecutionOutcome, OutcomeStatus};
use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Permit,
    Action,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Permit => write!(f, "permit"),
            Stage::Action => write!(f, "action"),
        }
    }
}

#[derive(Debug)]
pub enum RelayState {
    Received,
    Verified(Verified),
    /// Carries the canonical action signature forward to the executor call.
    Admitted(SignatureParts),
    Submitting(Stage),
    Confirming(Stage, TxRef),
    Done(ExecutionOutcome),
}

impl RelayState {
    fn name(&self) -> &'static str {
        match self {
            RelayState::Received => "received",
            RelayState::Verified(_) => "verified",
            RelayState::Admitted(_) => "admitted",
            RelayState::Submitting(_) => "submitting",
            RelayState::Confirming(..) => "confirming",
            RelayState::Done(_) => "done",
        }
    }
}

/// Per-request bookkeeping carried across transitions.
#[derive(Default)]
struct Progress {
    signature: Option<SignatureParts>,
    permit_tx: Option<H256>,
    permit_confirmed: bool,
    action_tx: Option<H256>,
}

pub struct RelayPipeline {
    verifier: SignatureVerifier,
    guard: ReplayGuard,
    gateway: Arc<ChainGateway>,
    abi: ExecutorAbi,
}

impl RelayPipeline {
    pub fn new(domain: TypedDataDomain, abi: ExecutorAbi, gateway: Arc<ChainGateway>) -> Self {
        let source: Arc<dyn NonceSource> = gateway.clone();
        Self {
            verifier: SignatureVerifier::new(domain),
            guard: ReplayGuard::new(source),
            gateway,
            abi,
        }
    }

    /// Replace the expiry clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        let source: Arc<dyn NonceSource> = self.gateway.clone();
        self.guard = ReplayGuard::with_clock(source, clock);
        self
    }

    pub fn gateway(&self) -> &ChainGateway {
        &self.gateway
    }

    /// Drive `request` to a terminal outcome.
    pub async fn run(&self, request: &RelayRequest) -> ExecutionOutcome {
        let start = Instant::now();
        METRICS.relay_total.fetch_add(1, Ordering::Relaxed);

        let action = request.action();
        let mut progress = Progress::default();
        let mut state = RelayState::Received;
        let outcome = loop {
            let from = state.name();
            state = match state {
                RelayState::Done(outcome) => break outcome,
                state => self.step(state, request, &mut progress).await,
            };
            info!(
                principal = ?action.principal,
                sequence = %action.sequence,
                from,
                to = state.name(),
                "Relay transition"
            );
        };

        record_outcome(&outcome);
        METRICS.record_relay_duration(start);
        info!(
            principal = ?action.principal,
            sequence = %action.sequence,
            status = ?outcome.status,
            error_kind = ?outcome.error_kind,
            permit_tx = ?outcome.permit_tx_ref,
            action_tx = ?outcome.action_tx_ref,
            "Relay finished"
        );
        outcome
    }

    async fn step(
        &self,
        state: RelayState,
        request: &RelayRequest,
        progress: &mut Progress,
    ) -> RelayState {
        match state {
            RelayState::Received => match self.check(request) {
                Ok(verified) => RelayState::Verified(verified),
                Err(outcome) => RelayState::Done(outcome),
            },

            RelayState::Verified(verified) => match self.guard.admit(request.action()).await {
                Ok(_) => RelayState::Admitted(verified.signature),
                Err(e) => {
                    warn!(
                        principal = ?verified.principal,
                        error = %e,
                        "Replay guard refused action"
                    );
                    RelayState::Done(ExecutionOutcome::failed(
                        ErrorKind::from(&e),
                        e.to_string(),
                    ))
                }
            },

            RelayState::Admitted(signature) => {
                progress.signature = Some(signature);
                if request.permit().is_some() {
                    RelayState::Submitting(Stage::Permit)
                } else {
                    RelayState::Submitting(Stage::Action)
                }
            }

            RelayState::Submitting(stage) => {
                match self.submit_stage(stage, request, progress).await {
                    Ok(tx) => {
                        match stage {
                            Stage::Permit => progress.permit_tx = Some(tx.hash),
                            Stage::Action => progress.action_tx = Some(tx.hash),
                        }
                        RelayState::Confirming(stage, tx)
                    }
                    Err(e) => {
                        warn!(%stage, error = %e, "Submission failed");
                        let kind = ErrorKind::from(&e);
                        RelayState::Done(stage_failure(progress, kind, e.to_string()))
                    }
                }
            }

            RelayState::Confirming(stage, tx) => match self.gateway.await_finality(&tx).await {
                Finality::Confirmed { block } => {
                    info!(%stage, tx_hash = ?tx.hash, block, "Transaction confirmed");
                    match stage {
                        Stage::Permit => {
                            progress.permit_confirmed = true;
                            RelayState::Submitting(Stage::Action)
                        }
                        Stage::Action => RelayState::Done(ExecutionOutcome::success(
                            progress.permit_tx,
                            tx.hash,
                        )),
                    }
                }
                Finality::Reverted { block, reason } => {
                    warn!(
                        %stage,
                        tx_hash = ?tx.hash,
                        block,
                        reason = ?reason,
                        "Transaction reverted"
                    );
                    let err = Error::Reverted(reason);
                    let outcome = stage_failure(progress, ErrorKind::Reverted, err.to_string());
                    // A partial outcome reports only the permit.
                    let outcome = match outcome.status {
                        OutcomeStatus::Failed => outcome.with_action_ref(progress.action_tx),
                        _ => outcome,
                    };
                    RelayState::Done(outcome)
                }
                Finality::Timeout => RelayState::Done(ExecutionOutcome::unconfirmed(
                    stage,
                    progress.permit_tx,
                    progress.action_tx,
                )),
            },

            done @ RelayState::Done(_) => done,
        }
    }

    /// Permit consistency, then signature authenticity. No chain access.
    fn check(&self, request: &RelayRequest) -> Result<Verified, ExecutionOutcome> {
        let action = request.action();
        if let Some(permit) = request.permit() {
            if permit.owner != action.principal {
                return Err(ExecutionOutcome::failed(
                    ErrorKind::InvalidRequest,
                    format!(
                        "permit owner {:?} does not match action principal {:?}",
                        permit.owner, action.principal
                    ),
                ));
            }
            if permit.spender != self.gateway.executor() {
                return Err(ExecutionOutcome::failed(
                    ErrorKind::InvalidRequest,
                    format!(
                        "permit spender {:?} is not the executor {:?}",
                        permit.spender,
                        self.gateway.executor()
                    ),
                ));
            }
        }
        verify_signature(self.verifier.domain(), action).map_err(|e| {
            warn!(principal = ?action.principal, error = %e, "Signature rejected");
            ExecutionOutcome::authenticity(&e)
        })
    }

    async fn submit_stage(
        &self,
        stage: Stage,
        request: &RelayRequest,
        progress: &Progress,
    ) -> Result<TxRef, Error> {
        let action = request.action();
        let call = match stage {
            Stage::Permit => {
                let permit = request.permit().ok_or_else(|| {
                    Error::InvalidRequest("permit stage without a permit".into())
                })?;
                permit_call(action.target_token, permit)
            }
            Stage::Action => {
                let signature = progress.signature.as_ref().ok_or_else(|| {
                    error!("Action stage reached without a verified signature");
                    Error::Signing("missing verified signature".into())
                })?;
                execute_meta_tx_call(self.gateway.executor(), self.abi, action, signature)
            }
        };
        let priced = self.gateway.price(&call).await?;
        self.gateway.submit(&priced).await
    }
}

/// Failure at the current stage. After a confirmed permit this is `partial`.
fn stage_failure(progress: &Progress, kind: ErrorKind, detail: String) -> ExecutionOutcome {
    match (progress.permit_confirmed, progress.permit_tx) {
        (true, Some(permit_tx)) => ExecutionOutcome::partial(permit_tx, kind, detail),
        (_, permit_tx) => ExecutionOutcome::failed(kind, detail).with_permit_ref(permit_tx),
    }
}

fn record_outcome(outcome: &ExecutionOutcome) {
    let counter = match outcome.status {
        OutcomeStatus::Success => &METRICS.relay_success,
        OutcomeStatus::Partial => &METRICS.relay_partial,
        OutcomeStatus::Unconfirmed => &METRICS.relay_unconfirmed,
        OutcomeStatus::Failed => &METRICS.relay_failed,
    };
    counter.fetch_add(1, Ordering::Relaxed);
    if outcome.error_kind.is_some_and(ErrorKind::is_client_fault) {
        METRICS.relay_rejected.fetch_add(1, Ordering::Relaxed);
    }
}
