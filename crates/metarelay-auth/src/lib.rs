//! Off-chain auth for relayed meta-transactions: EIP-712 signature
//! verification and replay checks against the executor's nonce store.

mod auth_types;
pub mod nonce;
mod verify;

pub use auth_types::{Admitted, GuardError, Verified};
pub use nonce::{Clock, NonceSource, ReplayGuard, SystemClock};
pub use verify::{verify_signature, SignatureVerifier};
