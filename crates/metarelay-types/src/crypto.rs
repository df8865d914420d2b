//! secp256k1 signature byte handling.

use ethers::types::{Signature, H256, U256};

use crate::AuthError;

/// Length of a packed `r ‖ s ‖ v` signature.
pub const SIGNATURE_LEN: usize = 65;

/// secp256k1n / 2. Signatures with a larger `s` are malleable twins.
pub const SECP256K1_HALF_ORDER: U256 = U256([
    0xDFE9_2F46_681B_20A0,
    0x5D57_6E73_57A4_501D,
    0xFFFF_FFFF_FFFF_FFFF,
    0x7FFF_FFFF_FFFF_FFFF,
]);

/// A split ECDSA signature with `v` normalized to 27/28.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureParts {
    pub v: u8,
    pub r: H256,
    pub s: H256,
}

impl SignatureParts {
    /// Split a packed 65-byte signature. Accepts `v` as 0/1 or 27/28.
    pub fn from_bytes(sig: &[u8]) -> Result<Self, AuthError> {
        if sig.is_empty() {
            return Err(AuthError::MissingSignature);
        }
        if sig.len() != SIGNATURE_LEN {
            return Err(AuthError::MalformedSignature(format!(
                "expected {SIGNATURE_LEN} bytes, got {}",
                sig.len()
            )));
        }
        Self::from_vrs(
            sig[64],
            H256::from_slice(&sig[..32]),
            H256::from_slice(&sig[32..64]),
        )
    }

    pub fn from_vrs(v: u8, r: H256, s: H256) -> Result<Self, AuthError> {
        let v = match v {
            0 | 1 => v + 27,
            27 | 28 => v,
            other => {
                return Err(AuthError::MalformedSignature(format!(
                    "invalid recovery id {other}"
                )))
            }
        };
        Ok(Self { v, r, s })
    }

    /// Rejects zero scalars and high-`s` signatures.
    pub fn ensure_canonical(&self) -> Result<(), AuthError> {
        if self.r.is_zero() || self.s.is_zero() {
            return Err(AuthError::MalformedSignature("zero r or s".into()));
        }
        if U256::from_big_endian(self.s.as_bytes()) > SECP256K1_HALF_ORDER {
            return Err(AuthError::NonCanonicalSignature);
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> [u8; SIGNATURE_LEN] {
        let mut out = [0u8; SIGNATURE_LEN];
        out[..32].copy_from_slice(self.r.as_bytes());
        out[32..64].copy_from_slice(self.s.as_bytes());
        out[64] = self.v;
        out
    }

    pub fn to_signature(&self) -> Signature {
        Signature {
            r: U256::from_big_endian(self.r.as_bytes()),
            s: U256::from_big_endian(self.s.as_bytes()),
            v: u64::from(self.v),
        }
    }
}

/// Decode a hex string with or without `0x` prefix.
pub fn decode_hex(input: &str) -> Result<Vec<u8>, String> {
    let trimmed = input.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    hex::decode(digits).map_err(|e| format!("invalid hex: {e}"))
}
