//! Error types for the relayer.

use std::fmt;

/// Relayer error type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Configuration error. Fatal at startup.
    Config(String),
    /// Transport failure or timeout talking to the node.
    Network(String),
    /// The node rejected our submitter nonce (too low, replacement underpriced).
    NonceConflict(String),
    /// The node already holds this exact signed transaction.
    AlreadyKnown,
    /// Execution reverted. Carries the decoded reason when one was returned.
    Reverted(Option<String>),
    /// The node refused the transaction for a non-nonce reason (funds, gas).
    Rejected(String),
    /// The injected credential could not sign.
    Signing(String),
    /// Malformed or inconsistent relay request.
    InvalidRequest(String),
}

impl Error {
    /// Whether the gateway should try again with the same call.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Network(_) | Error::NonceConflict(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(msg) => write!(f, "config error: {msg}"),
            Error::Network(msg) => write!(f, "network error: {msg}"),
            Error::NonceConflict(msg) => write!(f, "nonce conflict: {msg}"),
            Error::AlreadyKnown => write!(f, "transaction already known"),
            Error::Reverted(Some(reason)) => write!(f, "execution reverted: {reason}"),
            Error::Reverted(None) => write!(f, "execution reverted"),
            Error::Rejected(msg) => write!(f, "transaction rejected: {msg}"),
            Error::Signing(msg) => write!(f, "signing failed: {msg}"),
            Error::InvalidRequest(msg) => write!(f, "invalid request: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}
