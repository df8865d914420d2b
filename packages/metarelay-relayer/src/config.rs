//! Relayer configuration.
//!
//! Sources, lowest priority first: built-in defaults (which honour the legacy
//! `RPC_URL`, `PRIVATE_KEY` and `EXECUTOR_ADDRESS` variables), an optional
//! `relayer.{toml,json,yaml}` file, then `RELAYER_*` environment variables.

use ethers::types::{Address, U256};
use metarelay_types::{decode_hex, TypedDataDomain};
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use crate::calls::ExecutorAbi;
use crate::gateway::{FinalityPolicy, GasPolicy, GatewayConfig, RetryPolicy};
use crate::Error;

const MAX_RETRY_ATTEMPTS: u64 = 20;
const MAX_CONFIRMATIONS: u64 = 1_000;
const MAX_DELAY_MS: u64 = 60_000;
const MAX_RPC_TIMEOUT_MS: u64 = 300_000;
const MAX_FINALITY_TIMEOUT_SECS: u64 = 86_400;

/// A string that never appears in `Debug` output.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct SecretString(String);

impl SecretString {
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "defaults::rpc_url")]
    pub rpc_url: String,

    #[serde(default)]
    pub fallback_rpc_url: Option<String>,

    #[serde(default = "defaults::chain_id")]
    pub chain_id: u64,

    #[serde(default = "defaults::executor_address")]
    pub executor_address: String,

    #[serde(default = "defaults::domain_name")]
    pub domain_name: String,

    #[serde(default = "defaults::domain_version")]
    pub domain_version: String,

    /// `split` (v, r, s) or `packed` (bytes).
    #[serde(default)]
    pub executor_abi: ExecutorAbi,

    #[serde(default = "defaults::private_key")]
    pub private_key: Option<SecretString>,

    #[serde(default)]
    pub private_key_path: Option<String>,

    /// Fixed gas limit. Estimated per call when unset.
    #[serde(default)]
    pub gas_limit: Option<u64>,

    /// Fixed gas price in wei. Taken from the node when unset.
    #[serde(default)]
    pub gas_price_wei: Option<u64>,

    #[serde(default = "defaults::retry_attempts")]
    pub retry_attempts: u32,

    #[serde(default = "defaults::retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    #[serde(default = "defaults::rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,

    #[serde(default = "defaults::finality_timeout_secs")]
    pub finality_timeout_secs: u64,

    #[serde(default = "defaults::poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "defaults::confirmations")]
    pub confirmations: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rpc_url: defaults::rpc_url(),
            fallback_rpc_url: None,
            chain_id: defaults::chain_id(),
            executor_address: defaults::executor_address(),
            domain_name: defaults::domain_name(),
            domain_version: defaults::domain_version(),
            executor_abi: ExecutorAbi::default(),
            private_key: defaults::private_key(),
            private_key_path: None,
            gas_limit: None,
            gas_price_wei: None,
            retry_attempts: defaults::retry_attempts(),
            retry_base_delay_ms: defaults::retry_base_delay_ms(),
            rpc_timeout_ms: defaults::rpc_timeout_ms(),
            finality_timeout_secs: defaults::finality_timeout_secs(),
            poll_interval_ms: defaults::poll_interval_ms(),
            confirmations: defaults::confirmations(),
        }
    }
}

/// Where the relay key comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    Inline(SecretString),
    File(PathBuf),
}

/// Validated, typed configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    pub rpc_url: Url,
    pub fallback_rpc_url: Option<Url>,
    pub rpc_timeout: Duration,
    pub domain: TypedDataDomain,
    pub executor_abi: ExecutorAbi,
    pub credential: Credential,
    pub gateway: GatewayConfig,
}

impl Config {
    /// Read `relayer.*` and `RELAYER_*` on top of the defaults.
    pub fn load() -> Result<Self, Error> {
        Ok(config::Config::builder()
            .add_source(config::File::with_name("relayer").required(false))
            .add_source(config::Environment::with_prefix("RELAYER"))
            .build()?
            .try_deserialize()?)
    }

    pub fn validate(&self) -> Result<Settings, Error> {
        let rpc_url = parse_url("rpc_url", &self.rpc_url)?;
        let fallback_rpc_url = self
            .fallback_rpc_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .map(|u| parse_url("fallback_rpc_url", u))
            .transpose()?;

        if self.chain_id == 0 {
            return Err(Error::Config("chain_id must be non-zero".into()));
        }
        let executor = parse_executor(&self.executor_address)?;
        if self.domain_name.trim().is_empty() || self.domain_version.trim().is_empty() {
            return Err(Error::Config(
                "domain_name and domain_version must be non-empty".into(),
            ));
        }
        check_range("retry_attempts", self.retry_attempts.into(), 1, MAX_RETRY_ATTEMPTS)?;
        check_range("confirmations", self.confirmations, 1, MAX_CONFIRMATIONS)?;
        check_range("retry_base_delay_ms", self.retry_base_delay_ms, 0, MAX_DELAY_MS)?;
        check_range("poll_interval_ms", self.poll_interval_ms, 1, MAX_DELAY_MS)?;
        check_range("rpc_timeout_ms", self.rpc_timeout_ms, 1, MAX_RPC_TIMEOUT_MS)?;
        check_range(
            "finality_timeout_secs",
            self.finality_timeout_secs,
            1,
            MAX_FINALITY_TIMEOUT_SECS,
        )?;

        let inline = self.private_key.as_ref().filter(|k| !k.is_empty());
        let path = self
            .private_key_path
            .as_deref()
            .filter(|p| !p.trim().is_empty());
        let credential = match (inline, path) {
            (Some(key), None) => Credential::Inline(key.clone()),
            (None, Some(path)) => Credential::File(PathBuf::from(path)),
            (Some(_), Some(_)) => {
                return Err(Error::Config(
                    "set only one of private_key and private_key_path".into(),
                ))
            }
            (None, None) => {
                return Err(Error::Config(
                    "a relay key is required: private_key or private_key_path".into(),
                ))
            }
        };

        let gas = match (self.gas_limit, self.gas_price_wei) {
            (Some(limit), Some(price)) => GasPolicy::Fixed {
                gas_limit: U256::from(limit),
                gas_price: U256::from(price),
            },
            (limit, price) => GasPolicy::Node {
                gas_limit: limit.map(U256::from),
                gas_price: price.map(U256::from),
            },
        };

        Ok(Settings {
            rpc_url,
            fallback_rpc_url,
            rpc_timeout: Duration::from_millis(self.rpc_timeout_ms),
            domain: TypedDataDomain {
                name: self.domain_name.clone(),
                version: self.domain_version.clone(),
                chain_id: self.chain_id,
                verifying_contract: executor,
            },
            executor_abi: self.executor_abi,
            credential,
            gateway: GatewayConfig {
                chain_id: self.chain_id,
                executor,
                gas,
                retry: RetryPolicy {
                    max_attempts: self.retry_attempts,
                    base_delay: Duration::from_millis(self.retry_base_delay_ms),
                },
                finality: FinalityPolicy {
                    confirmations: self.confirmations,
                    poll_interval: Duration::from_millis(self.poll_interval_ms),
                    timeout: Duration::from_secs(self.finality_timeout_secs),
                },
            },
        })
    }
}

fn check_range(field: &str, value: u64, min: u64, max: u64) -> Result<(), Error> {
    if value < min || value > max {
        return Err(Error::Config(format!(
            "{field} must be between {min} and {max}, got {value}"
        )));
    }
    Ok(())
}

fn parse_url(field: &str, raw: &str) -> Result<Url, Error> {
    if raw.trim().is_empty() {
        return Err(Error::Config(format!("{field} is required")));
    }
    Url::parse(raw.trim()).map_err(|e| Error::Config(format!("{field}: {e}")))
}

fn parse_executor(raw: &str) -> Result<Address, Error> {
    if raw.trim().is_empty() {
        return Err(Error::Config("executor_address is required".into()));
    }
    let bytes = decode_hex(raw).map_err(|e| Error::Config(format!("executor_address: {e}")))?;
    if bytes.len() != 20 {
        return Err(Error::Config(format!(
            "executor_address: expected 20 bytes, got {}",
            bytes.len()
        )));
    }
    let address = Address::from_slice(&bytes);
    if address.is_zero() {
        return Err(Error::Config("executor_address must be non-zero".into()));
    }
    Ok(address)
}

mod defaults {
    use super::SecretString;

    fn legacy(name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|v| !v.is_empty())
    }

    pub fn rpc_url() -> String {
        legacy("RPC_URL").unwrap_or_default()
    }

    pub fn executor_address() -> String {
        legacy("EXECUTOR_ADDRESS").unwrap_or_default()
    }

    pub fn private_key() -> Option<SecretString> {
        legacy("PRIVATE_KEY").map(SecretString::from)
    }

    pub fn chain_id() -> u64 {
        56
    }

    pub fn domain_name() -> String {
        "MetaArbExecutor".into()
    }

    pub fn domain_version() -> String {
        "1".into()
    }

    pub fn retry_attempts() -> u32 {
        3
    }

    pub fn retry_base_delay_ms() -> u64 {
        250
    }

    pub fn rpc_timeout_ms() -> u64 {
        10_000
    }

    pub fn finality_timeout_secs() -> u64 {
        120
    }

    pub fn poll_interval_ms() -> u64 {
        1_000
    }

    pub fn confirmations() -> u64 {
        1
    }
}
