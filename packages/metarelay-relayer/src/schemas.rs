//! Inbound request payloads and their typed parse into a `RelayRequest`.
//!
//! Every field is checked here; the pipeline never sees a half-parsed request.

use ethers::types::{Address, Bytes, H256, U256};
use metarelay_types::{decode_hex, AuthorizedAction, PermitGrant, RelayRequest, SignatureParts};
use serde::Deserialize;
use serde_json::Value;

use crate::Error;

/// A numeric field: JSON integer, decimal string or `0x` hex string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Quantity {
    Int(u64),
    Text(String),
}

impl Quantity {
    fn to_u256(&self, field: &str) -> Result<U256, Error> {
        match self {
            Quantity::Int(n) => Ok(U256::from(*n)),
            Quantity::Text(s) => {
                let s = s.trim();
                let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                    Some(hex) if !hex.is_empty() => U256::from_str_radix(hex, 16).ok(),
                    Some(_) => None,
                    None if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) => {
                        U256::from_dec_str(s).ok()
                    }
                    None => None,
                };
                parsed.ok_or_else(|| invalid(field, format!("not a number: {s:?}")))
            }
        }
    }

    fn to_u64(&self, field: &str) -> Result<u64, Error> {
        let value = self.to_u256(field)?;
        if value > U256::from(u64::MAX) {
            return Err(invalid(field, "out of range".into()));
        }
        Ok(value.as_u64())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PermitPayload {
    pub owner: String,
    pub spender: String,
    pub value: Quantity,
    pub deadline: Quantity,
    /// Packed 65-byte signature; alternatively `v`, `r`, `s`.
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub v: Option<Quantity>,
    #[serde(default)]
    pub r: Option<String>,
    #[serde(default)]
    pub s: Option<String>,
}

/// Body of an execute request.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteRequest {
    #[serde(default)]
    pub id: Option<Value>,
    pub token: String,
    pub from: String,
    pub amount: Quantity,
    pub nonce: Quantity,
    pub deadline: Quantity,
    pub signature: String,
    #[serde(default)]
    pub permit: Option<PermitPayload>,
}

fn invalid(field: &str, msg: String) -> Error {
    Error::InvalidRequest(format!("{field}: {msg}"))
}

fn parse_address(field: &str, input: &str) -> Result<Address, Error> {
    let bytes = decode_hex(input).map_err(|e| invalid(field, e))?;
    if bytes.len() != 20 {
        return Err(invalid(field, format!("expected 20 bytes, got {}", bytes.len())));
    }
    Ok(Address::from_slice(&bytes))
}

fn parse_word(field: &str, input: &str) -> Result<H256, Error> {
    let bytes = decode_hex(input).map_err(|e| invalid(field, e))?;
    if bytes.len() != 32 {
        return Err(invalid(field, format!("expected 32 bytes, got {}", bytes.len())));
    }
    Ok(H256::from_slice(&bytes))
}

impl PermitPayload {
    fn signature(&self) -> Result<SignatureParts, Error> {
        let parts = match (&self.signature, &self.v, &self.r, &self.s) {
            (Some(sig), None, None, None) => {
                let bytes = decode_hex(sig).map_err(|e| invalid("permit.signature", e))?;
                SignatureParts::from_bytes(&bytes)
            }
            (None, Some(v), Some(r), Some(s)) => {
                let v = v.to_u64("permit.v")?;
                let v = u8::try_from(v).map_err(|_| invalid("permit.v", "out of range".into()))?;
                SignatureParts::from_vrs(v, parse_word("permit.r", r)?, parse_word("permit.s", s)?)
            }
            _ => {
                return Err(invalid(
                    "permit",
                    "provide either `signature` or all of `v`, `r`, `s`".into(),
                ))
            }
        };
        parts.map_err(|e| invalid("permit.signature", e.to_string()))
    }

    fn into_grant(self) -> Result<PermitGrant, Error> {
        Ok(PermitGrant {
            owner: parse_address("permit.owner", &self.owner)?,
            spender: parse_address("permit.spender", &self.spender)?,
            value: self.value.to_u256("permit.value")?,
            expiry: self.deadline.to_u256("permit.deadline")?,
            signature: self.signature()?,
        })
    }
}

impl ExecuteRequest {
    pub fn into_relay_request(self) -> Result<RelayRequest, Error> {
        // An empty signature is left for the verifier to reject as missing.
        let signature = decode_hex(&self.signature).map_err(|e| invalid("signature", e))?;
        let action = AuthorizedAction {
            principal: parse_address("from", &self.from)?,
            target_token: parse_address("token", &self.token)?,
            amount: self.amount.to_u256("amount")?,
            sequence: self.nonce.to_u256("nonce")?,
            expiry: self.deadline.to_u256("deadline")?,
            signature: Bytes::from(signature),
        };
        match self.permit {
            Some(permit) => Ok(RelayRequest::with_permit(permit.into_grant()?, action)),
            None => Ok(RelayRequest::direct(action)),
        }
    }
}

/// Parse one input line. The correlation id is recovered even when the rest
/// of the payload is malformed, so the error can be answered.
pub fn parse_line(line: &str) -> (Option<Value>, Result<RelayRequest, Error>) {
    let value: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => return (None, Err(Error::InvalidRequest(format!("invalid JSON: {e}")))),
    };
    let id = value.get("id").cloned().filter(|v| !v.is_null());
    if !value.is_object() {
        return (id, Err(Error::InvalidRequest("request must be a JSON object".into())));
    }
    let parsed = serde_json::from_value::<ExecuteRequest>(value)
        .map_err(|e| Error::InvalidRequest(e.to_string()))
        .and_then(ExecuteRequest::into_relay_request);
    (id, parsed)
}
