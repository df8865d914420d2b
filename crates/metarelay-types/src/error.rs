use ethers::types::{Address, U256};

/// Why a signed action is not authentic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    MissingSignature,
    MalformedSignature(String),
    /// `s` lies in the upper half of the curve order.
    NonCanonicalSignature,
    SignerMismatch { declared: Address, recovered: Address },
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingSignature => write!(f, "missing signature"),
            Self::MalformedSignature(msg) => write!(f, "malformed signature: {msg}"),
            Self::NonCanonicalSignature => write!(f, "non-canonical signature (high s)"),
            Self::SignerMismatch { declared, recovered } => write!(
                f,
                "signature recovers to {recovered:?}, expected {declared:?}"
            ),
        }
    }
}

impl std::error::Error for AuthError {}

/// Why an authentic action was refused before submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayRejection {
    Expired { expiry: U256, now: u64 },
    StaleOrFutureNonce { expected: U256, claimed: U256 },
}

impl std::fmt::Display for ReplayRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Expired { expiry, now } => {
                write!(f, "action expired at {expiry} (now {now})")
            }
            Self::StaleOrFutureNonce { expected, claimed } => {
                write!(f, "nonce {claimed} does not match expected {expected}")
            }
        }
    }
}

impl std::error::Error for ReplayRejection {}
