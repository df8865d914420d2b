//! Shared types and pure-logic utilities for the meta-transaction relay.
//! No I/O: usable by the relay, by clients building payloads, and by tests.

mod action;
mod crypto;
mod error;
mod message;

pub use action::{AuthorizedAction, PermitGrant, RelayRequest};
pub use crypto::{decode_hex, SignatureParts, SECP256K1_HALF_ORDER, SIGNATURE_LEN};
pub use error::{AuthError, ReplayRejection};
pub use message::{
    meta_tx_struct_hash, signing_digest, TypedDataDomain, DOMAIN_TYPE, META_TX_TYPE,
};
