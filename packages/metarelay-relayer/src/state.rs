//! Application state shared across request tasks.

use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use crate::config::{Credential, Settings};
use crate::gateway::ChainGateway;
use crate::relay::RelayPipeline;
use crate::rpc::RpcClient;
use crate::signer::{LocalSigner, RelayerSigner};
use crate::Error;

pub struct AppState {
    pub settings: Settings,
    pub rpc: Arc<RpcClient>,
    pub pipeline: RelayPipeline,
    pub start_time: Instant,
    pub request_count: AtomicU64,
}

impl AppState {
    /// Build the RPC client, load the relay key and check the node's chain id.
    pub async fn new(settings: Settings) -> Result<Self, Error> {
        let rpc = Arc::new(RpcClient::new(
            &settings.rpc_url,
            settings.fallback_rpc_url.as_ref(),
            settings.rpc_timeout,
        ));

        let chain_id = settings.gateway.chain_id;
        let signer: Arc<dyn RelayerSigner> = match &settings.credential {
            Credential::Inline(secret) => Arc::new(LocalSigner::from_secret(secret, chain_id)?),
            Credential::File(path) => Arc::new(LocalSigner::from_file(path, chain_id)?),
        };
        info!(relay = ?signer.address(), "Loaded relayer key");

        let gateway = Arc::new(ChainGateway::new(rpc.clone(), signer, settings.gateway));
        gateway.ensure_chain_id().await?;

        let pipeline = RelayPipeline::new(settings.domain.clone(), settings.executor_abi, gateway);

        Ok(Self {
            settings,
            rpc,
            pipeline,
            start_time: Instant::now(),
            request_count: AtomicU64::new(0),
        })
    }
}
