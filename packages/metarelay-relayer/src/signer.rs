//! Signer abstraction for the relay's own gas-paying account.
//!
//! The pipeline only ever sees `dyn RelayerSigner`; where the key comes from is
//! decided once at startup.

use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Signature};
use std::fmt;
use std::path::Path;

use crate::config::SecretString;
use crate::Error;

#[async_trait]
pub trait RelayerSigner: Send + Sync + fmt::Debug {
    fn address(&self) -> Address;

    /// Sign a transaction whose `chain_id` is already set.
    async fn sign_transaction(&self, tx: &TypedTransaction) -> Result<Signature, Error>;
}

/// In-process secp256k1 key.
pub struct LocalSigner {
    wallet: LocalWallet,
}

impl LocalSigner {
    pub fn from_secret(secret: &SecretString, chain_id: u64) -> Result<Self, Error> {
        let bytes = metarelay_types::decode_hex(secret.expose())
            .map_err(|e| Error::Config(format!("invalid private key: {e}")))?;
        let wallet = LocalWallet::from_bytes(&bytes)
            .map_err(|e| Error::Config(format!("invalid private key: {e}")))?;
        Ok(Self {
            wallet: wallet.with_chain_id(chain_id),
        })
    }

    /// Load a hex key from a file (whitespace trimmed).
    pub fn from_file(path: &Path, chain_id: u64) -> Result<Self, Error> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read key file {}: {e}", path.display()))
        })?;
        Self::from_secret(&SecretString::from(contents.trim().to_string()), chain_id)
    }

    pub fn from_wallet(wallet: LocalWallet) -> Self {
        Self { wallet }
    }
}

impl fmt::Debug for LocalSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalSigner")
            .field("address", &self.wallet.address())
            .field("chain_id", &self.wallet.chain_id())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl RelayerSigner for LocalSigner {
    fn address(&self) -> Address {
        self.wallet.address()
    }

    async fn sign_transaction(&self, tx: &TypedTransaction) -> Result<Signature, Error> {
        self.wallet
            .sign_transaction_sync(tx)
            .map_err(|e| Error::Signing(e.to_string()))
    }
}
