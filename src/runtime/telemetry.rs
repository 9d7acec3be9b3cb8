use crate::sink::batch_queue::BatchQueue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default interval used by the metrics reporter task.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(5);

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back to `info`.
/// Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Rolling counters describing poll loop activity.
#[derive(Default, Debug)]
pub struct Telemetry {
    fetches: AtomicU64,
    empty_fetches: AtomicU64,
    fetch_errors: AtomicU64,
    published_batches: AtomicU64,
    published_updates: AtomicU64,
    backpressure_waits: AtomicU64,
}

impl Telemetry {
    pub fn record_fetch(&self) {
        self.fetches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_empty_fetch(&self) {
        self.empty_fetches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fetch_error(&self) {
        self.fetch_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_published_batch(&self, updates: usize) {
        self.published_batches.fetch_add(1, Ordering::Relaxed);
        self.published_updates
            .fetch_add(updates as u64, Ordering::Relaxed);
    }

    pub fn record_backpressure_wait(&self) {
        self.backpressure_waits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            fetches: self.fetches.load(Ordering::Relaxed),
            empty_fetches: self.empty_fetches.load(Ordering::Relaxed),
            fetch_errors: self.fetch_errors.load(Ordering::Relaxed),
            published_batches: self.published_batches.load(Ordering::Relaxed),
            published_updates: self.published_updates.load(Ordering::Relaxed),
            backpressure_waits: self.backpressure_waits.load(Ordering::Relaxed),
        }
    }

    pub fn fetches(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    pub fn fetch_errors(&self) -> u64 {
        self.fetch_errors.load(Ordering::Relaxed)
    }

    pub fn published_batches(&self) -> u64 {
        self.published_batches.load(Ordering::Relaxed)
    }

    pub fn published_updates(&self) -> u64 {
        self.published_updates.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub fetches: u64,
    pub empty_fetches: u64,
    pub fetch_errors: u64,
    pub published_batches: u64,
    pub published_updates: u64,
    pub backpressure_waits: u64,
}

/// Spawns a background task that periodically logs throughput, sink depth, and fetch errors.
pub(crate) fn spawn_metrics_reporter<T: Send + 'static>(
    telemetry: Arc<Telemetry>,
    queue: Arc<BatchQueue<T>>,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_snapshot = telemetry.snapshot();
        let mut last_tick = Instant::now();

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(target: "pollstream::metrics", "metrics reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let current_snapshot = telemetry.snapshot();
                    let published_delta = current_snapshot
                        .published_updates
                        .saturating_sub(last_snapshot.published_updates);
                    let elapsed = last_tick.elapsed().as_secs_f64();
                    let throughput = if elapsed <= f64::EPSILON {
                        0.0
                    } else {
                        published_delta as f64 / elapsed
                    };
                    let sink_batches = queue.len().await;

                    tracing::info!(
                        target: "pollstream::metrics",
                        throughput = format!("{throughput:.2}"),
                        fetches = current_snapshot.fetches,
                        empty_fetches = current_snapshot.empty_fetches,
                        fetch_errors = current_snapshot.fetch_errors,
                        published_batches = current_snapshot.published_batches,
                        published_updates = current_snapshot.published_updates,
                        backpressure_waits = current_snapshot.backpressure_waits,
                        sink_batches,
                        sink_capacity = queue.capacity(),
                        "runtime metrics snapshot"
                    );

                    last_snapshot = current_snapshot;
                    last_tick = Instant::now();
                }
            }
        }
    })
}
