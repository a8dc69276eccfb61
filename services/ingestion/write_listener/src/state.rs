//! State shared by every request a listener serves

use crate::accumulator::Accumulator;
use crate::admission::AdmissionController;
use crate::config::WriteListenerConfig;
use crate::stats::ListenerStats;
use chrono::{DateTime, Utc};
use selfstat::Registry;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;

/// Source of "now" in nanoseconds since the Unix epoch
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(|| Utc::now().timestamp_nanos_opt().unwrap_or_default())
}

pub struct ListenerState {
    pub config: WriteListenerConfig,
    pub admission: Arc<AdmissionController>,
    pub accumulator: Arc<dyn Accumulator>,
    pub stats: ListenerStats,
    pub started: DateTime<Utc>,
    pub started_at: Instant,
    pub clock: Clock,
    shutdown: watch::Receiver<bool>,
}

impl ListenerState {
    pub fn new(
        config: WriteListenerConfig,
        registry: &Registry,
        admission: Arc<AdmissionController>,
        accumulator: Arc<dyn Accumulator>,
        clock: Clock,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let stats = ListenerStats::register(registry, &config.service_address);
        Self {
            config,
            admission,
            accumulator,
            stats,
            started: Utc::now(),
            started_at: Instant::now(),
            clock,
            shutdown,
        }
    }

    /// Fresh receiver for the listener's shutdown signal
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.clone()
    }
}

/// Resolves once shutdown has been signalled
///
/// Never resolves if the sending side is gone without signalling.
pub async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stopping| *stopping).await.is_err() {
        std::future::pending::<()>().await;
    }
}
