//! ABI call descriptors for the token and executor contracts.

use ethers::abi::{decode, encode, ParamType, Token};
use ethers::types::{Address, Bytes, U256};
use ethers::utils::id;
use metarelay_types::{AuthorizedAction, PermitGrant, SignatureParts};
use serde::Deserialize;

pub const PERMIT_SIG: &str = "permit(address,address,uint256,uint256,uint8,bytes32,bytes32)";
pub const EXECUTE_SPLIT_SIG: &str =
    "executeMetaTx(address,address,uint256,uint256,uint256,uint8,bytes32,bytes32)";
pub const EXECUTE_PACKED_SIG: &str =
    "executeMetaTx(address,address,uint256,uint256,uint256,bytes)";
pub const NONCES_SIG: &str = "nonces(address)";

const ERROR_STRING_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];
const PANIC_SELECTOR: [u8; 4] = [0x4e, 0x48, 0x7b, 0x71];

/// Which `executeMetaTx` overload the deployed executor exposes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum ExecutorAbi {
    /// `(..., uint8 v, bytes32 r, bytes32 s)`
    #[default]
    #[serde(rename = "split")]
    SplitSignature,
    /// `(..., bytes signature)`
    #[serde(rename = "packed")]
    PackedSignature,
}

/// A contract call: target, function signature and ABI arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct CallDescriptor {
    pub to: Address,
    pub signature: &'static str,
    pub args: Vec<Token>,
}

impl CallDescriptor {
    pub fn selector(&self) -> [u8; 4] {
        id(self.signature)
    }

    /// Function name without the parameter list.
    pub fn method(&self) -> &'static str {
        self.signature
            .split_once('(')
            .map_or(self.signature, |(name, _)| name)
    }

    pub fn calldata(&self) -> Bytes {
        let mut data = self.selector().to_vec();
        data.extend(encode(&self.args));
        Bytes::from(data)
    }
}

fn signature_tokens(sig: &SignatureParts) -> [Token; 3] {
    [
        Token::Uint(U256::from(sig.v)),
        Token::FixedBytes(sig.r.as_bytes().to_vec()),
        Token::FixedBytes(sig.s.as_bytes().to_vec()),
    ]
}

/// ERC-2612 `permit` on `token`.
pub fn permit_call(token: Address, grant: &PermitGrant) -> CallDescriptor {
    let mut args = vec![
        Token::Address(grant.owner),
        Token::Address(grant.spender),
        Token::Uint(grant.value),
        Token::Uint(grant.expiry),
    ];
    args.extend(signature_tokens(&grant.signature));
    CallDescriptor {
        to: token,
        signature: PERMIT_SIG,
        args,
    }
}

/// `executeMetaTx` on the executor, shaped per `abi`.
pub fn execute_meta_tx_call(
    executor: Address,
    abi: ExecutorAbi,
    action: &AuthorizedAction,
    signature: &SignatureParts,
) -> CallDescriptor {
    let mut args = vec![
        Token::Address(action.target_token),
        Token::Address(action.principal),
        Token::Uint(action.amount),
        Token::Uint(action.sequence),
        Token::Uint(action.expiry),
    ];
    let signature_fn = match abi {
        ExecutorAbi::SplitSignature => {
            args.extend(signature_tokens(signature));
            EXECUTE_SPLIT_SIG
        }
        ExecutorAbi::PackedSignature => {
            args.push(Token::Bytes(signature.to_bytes().to_vec()));
            EXECUTE_PACKED_SIG
        }
    };
    CallDescriptor {
        to: executor,
        signature: signature_fn,
        args,
    }
}

pub fn nonces_call(executor: Address, principal: Address) -> CallDescriptor {
    CallDescriptor {
        to: executor,
        signature: NONCES_SIG,
        args: vec![Token::Address(principal)],
    }
}

/// Decode a single `uint256` return value.
pub fn decode_uint(data: &[u8]) -> Result<U256, String> {
    let tokens = decode(&[ParamType::Uint(256)], data).map_err(|e| e.to_string())?;
    match tokens.as_slice() {
        [Token::Uint(value)] => Ok(*value),
        other => Err(format!("unexpected return value: {other:?}")),
    }
}

/// Human-readable reason from revert data: `Error(string)`, `Panic(uint256)`
/// or a bare custom-error selector. Empty data has no reason.
pub fn decode_revert_reason(data: &[u8]) -> Option<String> {
    if data.len() < 4 {
        return None;
    }
    let (selector, payload) = data.split_at(4);
    if selector == &ERROR_STRING_SELECTOR[..] {
        if let Ok(tokens) = decode(&[ParamType::String], payload) {
            if let Some(Token::String(reason)) = tokens.into_iter().next() {
                return Some(reason);
            }
        }
    } else if selector == &PANIC_SELECTOR[..] {
        if let Ok(code) = decode_uint(payload) {
            return Some(format!("panic 0x{code:x}"));
        }
    }
    Some(format!("custom error 0x{}", hex::encode(selector)))
}
