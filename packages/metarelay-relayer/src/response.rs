//! Execution outcome and the response line written per request.

use ethers::types::H256;
use metarelay_auth::GuardError;
use metarelay_types::AuthError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::relay::Stage;
use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Success,
    /// Permit confirmed, action did not.
    Partial,
    Failed,
    /// A finality wait timed out; the referenced transactions may still land.
    Unconfirmed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    Authenticity,
    ReplayRejected,
    InvalidRequest,
    Network,
    NonceConflict,
    Reverted,
    Rejected,
    Timeout,
    Internal,
}

impl ErrorKind {
    /// Rejected before any chain write; resubmitting unchanged will fail again.
    pub fn is_client_fault(self) -> bool {
        matches!(
            self,
            ErrorKind::Authenticity | ErrorKind::ReplayRejected | ErrorKind::InvalidRequest
        )
    }
}

impl From<&Error> for ErrorKind {
    fn from(err: &Error) -> Self {
        match err {
            Error::Network(_) => ErrorKind::Network,
            Error::NonceConflict(_) => ErrorKind::NonceConflict,
            Error::Reverted(_) => ErrorKind::Reverted,
            Error::Rejected(_) => ErrorKind::Rejected,
            Error::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Error::Config(_) | Error::Signing(_) | Error::AlreadyKnown => ErrorKind::Internal,
        }
    }
}

impl From<&GuardError> for ErrorKind {
    fn from(err: &GuardError) -> Self {
        match err {
            GuardError::Rejected(_) => ErrorKind::ReplayRejected,
            GuardError::Unavailable(_) => ErrorKind::Network,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutcome {
    pub status: OutcomeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permit_tx_ref: Option<H256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_tx_ref: Option<H256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl ExecutionOutcome {
    pub fn success(permit_tx_ref: Option<H256>, action_tx_ref: H256) -> Self {
        Self {
            status: OutcomeStatus::Success,
            permit_tx_ref,
            action_tx_ref: Some(action_tx_ref),
            error_kind: None,
            error_detail: None,
        }
    }

    pub fn failed(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Failed,
            permit_tx_ref: None,
            action_tx_ref: None,
            error_kind: Some(kind),
            error_detail: Some(detail.into()),
        }
    }

    pub fn partial(permit_tx_ref: H256, kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Partial,
            permit_tx_ref: Some(permit_tx_ref),
            action_tx_ref: None,
            error_kind: Some(kind),
            error_detail: Some(detail.into()),
        }
    }

    /// A finality wait at `stage` ran out. An action is only ever submitted
    /// after its permit confirmed, so an action-stage timeout with a permit
    /// ref says the permit went through.
    pub fn unconfirmed(
        stage: Stage,
        permit_tx_ref: Option<H256>,
        action_tx_ref: Option<H256>,
    ) -> Self {
        let detail = match (stage, permit_tx_ref) {
            (Stage::Permit, _) => {
                "permit not confirmed before the finality wait ended and may still be mined; \
                 action not submitted"
            }
            (Stage::Action, Some(_)) => {
                "permit confirmed; action not confirmed before the finality wait ended \
                 and may still be mined"
            }
            (Stage::Action, None) => {
                "action not confirmed before the finality wait ended and may still be mined"
            }
        };
        Self {
            status: OutcomeStatus::Unconfirmed,
            permit_tx_ref,
            action_tx_ref,
            error_kind: Some(ErrorKind::Timeout),
            error_detail: Some(detail.into()),
        }
    }

    pub fn with_permit_ref(mut self, permit_tx_ref: Option<H256>) -> Self {
        self.permit_tx_ref = permit_tx_ref;
        self
    }

    pub fn with_action_ref(mut self, action_tx_ref: Option<H256>) -> Self {
        self.action_tx_ref = action_tx_ref;
        self
    }

    pub fn authenticity(err: &AuthError) -> Self {
        Self::failed(ErrorKind::Authenticity, err.to_string())
    }
}

/// One output line: the caller's correlation id plus the outcome fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(flatten)]
    pub outcome: ExecutionOutcome,
}

impl RelayResponse {
    pub fn new(id: Option<Value>, outcome: ExecutionOutcome) -> Self {
        Self { id, outcome }
    }
}
