//! EIP-712 `MetaTx` signature verification.

use ethers::types::Address;
use metarelay_types::{
    signing_digest, AuthError, AuthorizedAction, SignatureParts, TypedDataDomain,
};

use crate::Verified;

/// Verifies actions against one fixed typed-data domain.
#[derive(Debug, Clone)]
pub struct SignatureVerifier {
    domain: TypedDataDomain,
}

impl SignatureVerifier {
    pub fn new(domain: TypedDataDomain) -> Self {
        Self { domain }
    }

    pub fn domain(&self) -> &TypedDataDomain {
        &self.domain
    }

    /// Returns the principal when the signature is authentic.
    pub fn verify(&self, action: &AuthorizedAction) -> Result<Address, AuthError> {
        verify_signature(&self.domain, action).map(|v| v.principal)
    }
}

/// Recover the signer of `action` and require it to equal `action.principal`.
pub fn verify_signature(
    domain: &TypedDataDomain,
    action: &AuthorizedAction,
) -> Result<Verified, AuthError> {
    let parts = SignatureParts::from_bytes(&action.signature)?;
    parts.ensure_canonical()?;

    let digest = signing_digest(domain, action);
    let recovered = parts
        .to_signature()
        .recover(digest)
        .map_err(|e| AuthError::MalformedSignature(e.to_string()))?;

    if recovered != action.principal {
        return Err(AuthError::SignerMismatch {
            declared: action.principal,
            recovered,
        });
    }

    Ok(Verified {
        principal: recovered,
        digest,
        signature: parts,
    })
}
