//! Prometheus metrics (lock-free atomics, zero allocation on hot path).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    // --- Outcomes ---
    pub relay_total: AtomicU64,
    pub relay_success: AtomicU64,
    pub relay_partial: AtomicU64,
    pub relay_failed: AtomicU64,
    pub relay_unconfirmed: AtomicU64,
    /// Refused before any chain write (auth, replay, malformed).
    pub relay_rejected: AtomicU64,

    // --- Submission ---
    pub tx_broadcast: AtomicU64,
    pub nonce_retries: AtomicU64,
    pub network_retries: AtomicU64,

    // --- Latency (μs, updated via CAS) ---
    pub relay_duration_us_sum: AtomicU64,
    pub relay_duration_us_max: AtomicU64,

    // --- RPC ---
    pub rpc_failovers: AtomicU64,
    pub rpc_errors: AtomicU64,
}

impl Metrics {
    const fn new() -> Self {
        Self {
            relay_total: AtomicU64::new(0),
            relay_success: AtomicU64::new(0),
            relay_partial: AtomicU64::new(0),
            relay_failed: AtomicU64::new(0),
            relay_unconfirmed: AtomicU64::new(0),
            relay_rejected: AtomicU64::new(0),
            tx_broadcast: AtomicU64::new(0),
            nonce_retries: AtomicU64::new(0),
            network_retries: AtomicU64::new(0),
            relay_duration_us_sum: AtomicU64::new(0),
            relay_duration_us_max: AtomicU64::new(0),
            rpc_failovers: AtomicU64::new(0),
            rpc_errors: AtomicU64::new(0),
        }
    }

    pub fn record_relay_duration(&self, start: Instant) {
        let us = start.elapsed().as_micros() as u64;
        self.relay_duration_us_sum.fetch_add(us, Ordering::Relaxed);
        let mut cur = self.relay_duration_us_max.load(Ordering::Relaxed);
        while us > cur {
            match self.relay_duration_us_max.compare_exchange_weak(
                cur,
                us,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => cur = actual,
            }
        }
    }

    /// Render in Prometheus text exposition format.
    pub fn render(&self) -> String {
        let total = self.relay_total.load(Ordering::Relaxed);
        let success = self.relay_success.load(Ordering::Relaxed);
        let partial = self.relay_partial.load(Ordering::Relaxed);
        let failed = self.relay_failed.load(Ordering::Relaxed);
        let unconfirmed = self.relay_unconfirmed.load(Ordering::Relaxed);
        let rejected = self.relay_rejected.load(Ordering::Relaxed);
        let broadcast = self.tx_broadcast.load(Ordering::Relaxed);
        let nonce_retries = self.nonce_retries.load(Ordering::Relaxed);
        let network_retries = self.network_retries.load(Ordering::Relaxed);
        let dur_sum = self.relay_duration_us_sum.load(Ordering::Relaxed);
        let dur_max = self.relay_duration_us_max.swap(0, Ordering::Relaxed);
        let rpc_failovers = self.rpc_failovers.load(Ordering::Relaxed);
        let rpc_errors = self.rpc_errors.load(Ordering::Relaxed);

        let dur_sum_s = dur_sum as f64 / 1_000_000.0;
        let dur_max_s = dur_max as f64 / 1_000_000.0;

        format!(
            "\
# HELP metarelay_requests_total Relay requests received.\n\
# TYPE metarelay_requests_total counter\n\
metarelay_requests_total {total}\n\
# HELP metarelay_success_total Requests whose action confirmed.\n\
# TYPE metarelay_success_total counter\n\
metarelay_success_total {success}\n\
# HELP metarelay_partial_total Permit confirmed, action failed.\n\
# TYPE metarelay_partial_total counter\n\
metarelay_partial_total {partial}\n\
# HELP metarelay_failed_total Requests that ended failed.\n\
# TYPE metarelay_failed_total counter\n\
metarelay_failed_total {failed}\n\
# HELP metarelay_unconfirmed_total Requests whose finality wait timed out.\n\
# TYPE metarelay_unconfirmed_total counter\n\
metarelay_unconfirmed_total {unconfirmed}\n\
# HELP metarelay_rejected_total Requests refused before any chain write.\n\
# TYPE metarelay_rejected_total counter\n\
metarelay_rejected_total {rejected}\n\
# HELP metarelay_tx_broadcast_total Transactions accepted by the node.\n\
# TYPE metarelay_tx_broadcast_total counter\n\
metarelay_tx_broadcast_total {broadcast}\n\
# HELP metarelay_nonce_retries_total Submitter nonce re-syncs.\n\
# TYPE metarelay_nonce_retries_total counter\n\
metarelay_nonce_retries_total {nonce_retries}\n\
# HELP metarelay_network_retries_total Submissions retried after a transport failure.\n\
# TYPE metarelay_network_retries_total counter\n\
metarelay_network_retries_total {network_retries}\n\
# HELP metarelay_duration_seconds_sum Total pipeline time (seconds).\n\
# TYPE metarelay_duration_seconds_sum counter\n\
metarelay_duration_seconds_sum {dur_sum_s:.6}\n\
# HELP metarelay_duration_seconds_max Max pipeline time since last render (seconds).\n\
# TYPE metarelay_duration_seconds_max gauge\n\
metarelay_duration_seconds_max {dur_max_s:.6}\n\
# HELP metarelay_rpc_failovers_total RPC primary-to-fallback failovers.\n\
# TYPE metarelay_rpc_failovers_total counter\n\
metarelay_rpc_failovers_total {rpc_failovers}\n\
# HELP metarelay_rpc_errors_total RPC errors.\n\
# TYPE metarelay_rpc_errors_total counter\n\
metarelay_rpc_errors_total {rpc_errors}\n"
        )
    }
}
