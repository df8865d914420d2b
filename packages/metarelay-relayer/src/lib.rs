//! # Metarelay Relayer
//!
//! Relays user-signed `MetaTx` authorizations (optionally preceded by an
//! ERC-20 `permit`) to the `MetaArbExecutor` contract, paying gas from the
//! relay's own account.
//!
//! ## Pipeline
//! - `schemas`: payload → typed `RelayRequest`
//! - `relay`: verify, replay-check, then permit → action through the gateway
//! - `gateway`: price, simulate, sign, broadcast, await finality
//! - `response`: one `ExecutionOutcome` per request

pub mod calls;
pub mod config;
mod error;
pub mod gateway;
pub mod metrics;
pub mod relay;
pub mod response;
pub mod rpc;
pub mod schemas;
pub mod signer;
mod state;
pub mod submitter;

pub use config::{Config, Settings};
pub use error::Error;
pub use gateway::{ChainGateway, Finality, GatewayConfig, TxRef};
pub use relay::RelayPipeline;
pub use response::{ErrorKind, ExecutionOutcome, OutcomeStatus, RelayResponse};
pub use state::AppState;
