//! Request-scoped values built from an inbound payload.

use ethers::types::{Address, Bytes, U256};

use crate::SignatureParts;

/// An off-chain signed `MetaTx` intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizedAction {
    /// The signer and token owner.
    pub principal: Address,
    pub target_token: Address,
    pub amount: U256,
    /// The nonce the principal claims as next valid on the executor.
    pub sequence: U256,
    /// Unix seconds after which the action is invalid.
    pub expiry: U256,
    /// Packed `r ‖ s ‖ v`, exactly as supplied.
    pub signature: Bytes,
}

/// An ERC-20 `permit` approval. Its signature is checked by the token, not the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermitGrant {
    pub owner: Address,
    pub spender: Address,
    pub value: U256,
    pub expiry: U256,
    pub signature: SignatureParts,
}

/// One unit of work for the relay pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayRequest {
    permit: Option<PermitGrant>,
    action: AuthorizedAction,
}

impl RelayRequest {
    pub fn direct(action: AuthorizedAction) -> Self {
        Self {
            permit: None,
            action,
        }
    }

    pub fn with_permit(permit: PermitGrant, action: AuthorizedAction) -> Self {
        Self {
            permit: Some(permit),
            action,
        }
    }

    pub fn action(&self) -> &AuthorizedAction {
        &self.action
    }

    pub fn permit(&self) -> Option<&PermitGrant> {
        self.permit.as_ref()
    }
}
