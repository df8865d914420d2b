//! Metarelay worker binary.
//!
//! Reads one JSON request per stdin line and writes one JSON response per
//! line to stdout. Logs go to stderr.

use metarelay_relayer::metrics::METRICS;
use metarelay_relayer::response::{ErrorKind, ExecutionOutcome, RelayResponse};
use metarelay_relayer::schemas::parse_line;
use metarelay_relayer::{AppState, Config};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("Starting metarelay");

    let settings = match Config::load().and_then(|c| c.validate()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "FATAL: Config error, fix env vars or relayer.toml");
            std::process::exit(1);
        }
    };
    info!(
        rpc = %settings.rpc_url,
        chain_id = settings.gateway.chain_id,
        executor = ?settings.gateway.executor,
        abi = ?settings.executor_abi,
        "Configuration loaded"
    );

    let state = Arc::new(AppState::new(settings).await?);
    info!(relay = ?state.pipeline.gateway().relay_address(), "Relayer ready");

    // Single writer keeps output lines whole.
    let (tx, mut rx) = mpsc::unbounded_channel::<RelayResponse>();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(response) = rx.recv().await {
            let mut line = match serde_json::to_vec(&response) {
                Ok(line) => line,
                Err(e) => {
                    error!(error = %e, "Failed to encode response");
                    continue;
                }
            };
            line.push(b'\n');
            if let Err(e) = stdout.write_all(&line).await {
                error!(error = %e, "Failed to write response");
                break;
            }
            let _ = stdout.flush().await;
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut tasks = JoinSet::new();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        let line = tokio::select! {
            _ = &mut shutdown => break,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("Input closed");
                break;
            }
            Err(e) => {
                error!(error = %e, "Failed to read input");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        state.request_count.fetch_add(1, Ordering::Relaxed);
        let state = Arc::clone(&state);
        let tx = tx.clone();
        tasks.spawn(async move {
            let (id, parsed) = parse_line(&line);
            let outcome = match parsed {
                Ok(request) => state.pipeline.run(&request).await,
                Err(e) => {
                    METRICS.relay_total.fetch_add(1, Ordering::Relaxed);
                    METRICS.relay_rejected.fetch_add(1, Ordering::Relaxed);
                    METRICS.relay_failed.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %e, "Rejected malformed request");
                    ExecutionOutcome::failed(ErrorKind::InvalidRequest, e.to_string())
                }
            };
            let _ = tx.send(RelayResponse::new(id, outcome));
        });

        // Reap finished tasks so the set does not grow unbounded.
        while let Some(joined) = tasks.try_join_next() {
            if let Err(e) = joined {
                error!(error = %e, "Request task panicked");
            }
        }
    }

    info!(in_flight = tasks.len(), "Draining in-flight requests");
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "Request task panicked");
        }
    }
    drop(tx);
    let _ = writer.await;

    info!(
        requests = state.request_count.load(Ordering::Relaxed),
        uptime_secs = state.start_time.elapsed().as_secs(),
        rpc = state.rpc.active_url(),
        rpc_failovers = state.rpc.failover_count(),
        "Relayer shut down gracefully"
    );
    info!(metrics = %METRICS.render(), "Final metrics");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}
