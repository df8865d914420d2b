use ethers::types::{Address, H256, U256};
use metarelay_types::{ReplayRejection, SignatureParts};

/// Proof that an action's signature recovers to its principal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verified {
    pub principal: Address,
    pub digest: H256,
    /// Canonical split form, ready to forward to the executor.
    pub signature: SignatureParts,
}

/// The replay guard found the action fresh against on-chain state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admitted {
    pub principal: Address,
    pub sequence: U256,
}

/// Replay guard failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardError {
    Rejected(ReplayRejection),
    /// The authoritative nonce could not be read.
    Unavailable(String),
}

impl std::fmt::Display for GuardError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rejected(reason) => write!(f, "replay rejected: {reason}"),
            Self::Unavailable(msg) => write!(f, "nonce source unavailable: {msg}"),
        }
    }
}

impl std::error::Error for GuardError {}

impl From<ReplayRejection> for GuardError {
    fn from(reason: ReplayRejection) -> Self {
        Self::Rejected(reason)
    }
}
