//! EIP-712 signing digest for `MetaTx` authorizations.

use ethers::abi::{encode, Token};
use ethers::types::{Address, H256, U256};
use ethers::utils::keccak256;

use crate::AuthorizedAction;

pub const DOMAIN_TYPE: &str =
    "EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)";

pub const META_TX_TYPE: &str =
    "MetaTx(address token,address from,uint256 amount,uint256 nonce,uint256 deadline)";

/// Fixed domain a signature is bound to. Must match the executor's own constants exactly,
/// otherwise recovery yields an unrelated address rather than an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypedDataDomain {
    pub name: String,
    pub version: String,
    pub chain_id: u64,
    pub verifying_contract: Address,
}

impl TypedDataDomain {
    pub fn separator(&self) -> H256 {
        H256(keccak256(encode(&[
            Token::FixedBytes(keccak256(DOMAIN_TYPE).to_vec()),
            Token::FixedBytes(keccak256(self.name.as_bytes()).to_vec()),
            Token::FixedBytes(keccak256(self.version.as_bytes()).to_vec()),
            Token::Uint(U256::from(self.chain_id)),
            Token::Address(self.verifying_contract),
        ])))
    }
}

/// `hashStruct(MetaTx)` for the action's fields.
pub fn meta_tx_struct_hash(action: &AuthorizedAction) -> H256 {
    H256(keccak256(encode(&[
        Token::FixedBytes(keccak256(META_TX_TYPE).to_vec()),
        Token::Address(action.target_token),
        Token::Address(action.principal),
        Token::Uint(action.amount),
        Token::Uint(action.sequence),
        Token::Uint(action.expiry),
    ])))
}

/// Format: `keccak256(0x19 ‖ 0x01 ‖ domainSeparator ‖ structHash)`.
pub fn signing_digest(domain: &TypedDataDomain, action: &AuthorizedAction) -> H256 {
    let mut message = Vec::with_capacity(2 + 32 + 32);
    message.extend_from_slice(&[0x19, 0x01]);
    message.extend_from_slice(domain.separator().as_bytes());
    message.extend_from_slice(meta_tx_struct_hash(action).as_bytes());
    H256(keccak256(message))
}
