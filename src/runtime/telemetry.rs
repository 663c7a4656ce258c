use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default interval used by the metrics reporter task.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(5);

/// Filter used by the simulator binaries when `RUST_LOG` is unset.
pub const DEFAULT_LOG_DIRECTIVE: &str = "info";

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs the process-wide fmt subscriber for a simulation or cleanup run.
///
/// `RUST_LOG` wins when it parses; otherwise `default_directive` applies. Only
/// the first call installs anything, so the runner and its tests may both call it.
pub fn init_tracing(default_directive: &str) {
    TRACING_INIT.get_or_init(|| {
        let filter = log_filter(std::env::var("RUST_LOG").ok(), default_directive);
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .try_init();
    });
}

fn log_filter(configured: Option<String>, default_directive: &str) -> EnvFilter {
    configured
        .filter(|value| !value.trim().is_empty())
        .and_then(|value| EnvFilter::try_new(value).ok())
        .unwrap_or_else(|| EnvFilter::new(default_directive))
}

/// Run-wide counters shared by the coordinator, drivers and the termination
/// worker.
#[derive(Default, Debug)]
pub struct Telemetry {
    orders_created: AtomicU64,
    orders_handed_off: AtomicU64,
    orders_failed: AtomicU64,
    orders_interrupted: AtomicU64,
    terminations_applied: AtomicU64,
    termination_failures: AtomicU64,
    terminations_abandoned: AtomicU64,
    enqueue_waits: AtomicU64,
    enqueue_rejections: AtomicU64,
    active_batches: AtomicUsize,
    queue_depth: AtomicUsize,
    peak_queue_depth: AtomicUsize,
}

impl Telemetry {
    pub fn record_order_created(&self) {
        self.orders_created.fetch_add(1, Ordering::Relaxed);
    }

    /// An order reached its pending-termination state.
    pub fn record_order_handed_off(&self) {
        self.orders_handed_off.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_order_failed(&self) {
        self.orders_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_order_interrupted(&self) {
        self.orders_interrupted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_termination_applied(&self) {
        self.terminations_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_termination_failure(&self) {
        self.termination_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_terminations_abandoned(&self, count: u64) {
        if count == 0 {
            return;
        }
        self.terminations_abandoned
            .fetch_add(count, Ordering::Relaxed);
    }

    /// The termination queue was full and an enqueue had to wait.
    pub fn record_enqueue_wait(&self) {
        self.enqueue_waits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_enqueue_rejection(&self) {
        self.enqueue_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_queue_depth(&self, depth: usize) {
        self.queue_depth.store(depth, Ordering::Relaxed);
        self.peak_queue_depth.fetch_max(depth, Ordering::Relaxed);
    }

    pub fn batch_started(&self) {
        self.active_batches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn batch_finished(&self) {
        let _ = self
            .active_batches
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |value| {
                Some(value.saturating_sub(1))
            });
    }

    pub fn active_batches(&self) -> usize {
        self.active_batches.load(Ordering::Relaxed)
    }

    pub fn queue_depth(&self) -> usize {
        self.queue_depth.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            orders_created: self.orders_created.load(Ordering::Relaxed),
            orders_handed_off: self.orders_handed_off.load(Ordering::Relaxed),
            orders_failed: self.orders_failed.load(Ordering::Relaxed),
            orders_interrupted: self.orders_interrupted.load(Ordering::Relaxed),
            terminations_applied: self.terminations_applied.load(Ordering::Relaxed),
            termination_failures: self.termination_failures.load(Ordering::Relaxed),
            terminations_abandoned: self.terminations_abandoned.load(Ordering::Relaxed),
            enqueue_waits: self.enqueue_waits.load(Ordering::Relaxed),
            enqueue_rejections: self.enqueue_rejections.load(Ordering::Relaxed),
            peak_queue_depth: self.peak_queue_depth.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetrySnapshot {
    pub orders_created: u64,
    pub orders_handed_off: u64,
    pub orders_failed: u64,
    pub orders_interrupted: u64,
    pub terminations_applied: u64,
    pub termination_failures: u64,
    pub terminations_abandoned: u64,
    pub enqueue_waits: u64,
    pub enqueue_rejections: u64,
    pub peak_queue_depth: usize,
}

/// Spawns a background task that periodically logs creation throughput,
/// active batches, termination backlog and failure counts.
pub fn spawn_metrics_reporter(
    telemetry: Arc<Telemetry>,
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
                    tracing::info!(target: "gameday::metrics", "metrics reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let current = telemetry.snapshot();
                    let created_delta = current
                        .orders_created
                        .saturating_sub(last_snapshot.orders_created);
                    let elapsed = last_tick.elapsed().as_secs_f64();
                    let throughput = if elapsed <= f64::EPSILON {
                        0.0
                    } else {
                        created_delta as f64 / elapsed
                    };

                    tracing::info!(
                        target: "gameday::metrics",
                        throughput = format!("{throughput:.2}"),
                        created = current.orders_created,
                        handed_off = current.orders_handed_off,
                        failed = current.orders_failed,
                        interrupted = current.orders_interrupted,
                        active_batches = telemetry.active_batches(),
                        queue_depth = telemetry.queue_depth(),
                        terminations_applied = current.terminations_applied,
                        termination_failures = current.termination_failures,
                        enqueue_waits = current.enqueue_waits,
                        "simulation metrics snapshot"
                    );

                    last_snapshot = current;
                    last_tick = Instant::now();
                }
            }
        }
    })
}
