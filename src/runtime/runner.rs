use crate::geometry::{export_feature_collection, feature_collection, PathGenerator};
use crate::payload::distributor;
use crate::payload::{Distributor, PayloadFactory};
use crate::runtime::config::SimulationConfig;
use crate::runtime::operations::OperationsTracker;
use crate::runtime::report;
use crate::runtime::telemetry::{spawn_metrics_reporter, Telemetry};
use crate::service::{HttpOrderService, RemoteOrderService, TokenManager};
use crate::simulator::{
    termination_channel, BatchCoordinator, DriverParams, OrderLedger, OrderLifecycleDriver,
    SimulationSummary, TerminationReport, TerminationWorker,
};
use anyhow::{Context, Result};
use chrono::{Local, Utc};
use std::sync::Arc;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Drives one simulation from payload generation to the final summary and
/// handles OS signals for graceful shutdowns.
pub struct Runner {
    config: SimulationConfig,
    service: Arc<dyn RemoteOrderService>,
    auth: Option<Arc<TokenManager>>,
    shutdown: CancellationToken,
}

impl Runner {
    /// Builds the HTTP order service (with OAuth when configured) from the
    /// configuration.
    pub fn new(config: SimulationConfig) -> Result<Self> {
        let mut service =
            HttpOrderService::new(config.service_url(), config.service_options().clone())
                .context("failed to build order service client")?;
        let auth = config.oauth().map(|settings| {
            Arc::new(TokenManager::new(
                settings.clone(),
                service.http_client().clone(),
            ))
        });
        if let Some(auth) = &auth {
            service = service.with_auth(auth.clone());
        }

        Ok(Self {
            config,
            service: Arc::new(service),
            auth,
            shutdown: CancellationToken::new(),
        })
    }

    /// Runs against an arbitrary order service implementation.
    pub fn with_service(config: SimulationConfig, service: Arc<dyn RemoteOrderService>) -> Self {
        Self {
            config,
            service,
            auth: None,
            shutdown: CancellationToken::new(),
        }
    }

    /// Returns a clone of the root shutdown token so external callers can
    /// integrate with their own signal handlers or cancellation strategies.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Executes every phase and returns the summary. Structural failures
    /// (generation, partitioning, authentication) return an error before any
    /// order is created; per-order failures only show up in the summary.
    pub async fn run(&self) -> Result<SimulationSummary> {
        let started_at = Utc::now();
        let config = &self.config;

        // Phase 1: payloads.
        let boundary = config.boundary().cloned().map(Arc::new);
        let generator = PathGenerator::new(
            config.template().clone(),
            config.delta(),
            boundary.clone(),
            config.max_rows(),
        )
        .context("failed to set up path generator")?;
        let mut factory = PayloadFactory::new(generator, config.attributes().clone());
        if let Some(seed) = config.shuffle_seed() {
            factory = factory.with_shuffle_seed(seed);
        }
        let payloads = factory
            .generate_all(config.total_orders(), config.activated_count())
            .context("failed to generate payloads")?;
        tracing::info!(
            total = payloads.len(),
            activated = config.activated_count(),
            "generated payloads"
        );

        if let Some(dir) = config.geojson_dir() {
            let collection =
                feature_collection(boundary.as_deref(), config.template(), &payloads);
            let path = export_feature_collection(dir, &collection, Local::now())?;
            tracing::info!(path = %path.display(), "exported GeoJSON");
        }

        // Phase 2: batches.
        let batches = Distributor::new(config.batch_size())
            .and_then(|distributor| distributor.distribute(payloads))
            .context("failed to distribute payloads")?;
        distributor::validate(&batches).context("batch partition is inconsistent")?;
        let stats = distributor::stats(&batches);
        tracing::info!(
            batches = stats.total_batches,
            orders = stats.total_orders,
            min_batch = stats.min_batch_size,
            max_batch = stats.max_batch_size,
            parallel = config.parallel_batches(),
            "distributed payloads into batches"
        );

        // Phase 3: credentials.
        if let Some(auth) = &self.auth {
            auth.token()
                .await
                .context("failed to obtain initial access token")?;
            tracing::info!("obtained initial access token");
        }

        let operations = match config.operations_dir() {
            Some(dir) => Some(Arc::new(OperationsTracker::create(dir).await?)),
            None => None,
        };
        if let Some(operations) = &operations {
            tracing::info!(
                timestamp = operations.timestamp(),
                "cleanup can replay this run with this timestamp"
            );
        }

        // Phase 4: background tasks.
        let telemetry = Arc::new(Telemetry::default());
        let ledger = Arc::new(OrderLedger::with_capacity(config.total_orders()));
        let (queue, receiver) = termination_channel(
            config.queue_capacity(),
            config.enqueue_timeout(),
            telemetry.clone(),
        );
        let worker_stop = self.shutdown.child_token();
        let worker = TerminationWorker::new(
            self.service.clone(),
            ledger.clone(),
            receiver,
            worker_stop.clone(),
            telemetry.clone(),
        )
        .spawn();

        let reporter_stop = CancellationToken::new();
        let reporter = spawn_metrics_reporter(
            telemetry.clone(),
            reporter_stop.clone(),
            config.metrics_interval(),
        );

        // Phase 5: orders.
        let driver = Arc::new(OrderLifecycleDriver::new(DriverParams {
            service: self.service.clone(),
            ledger: ledger.clone(),
            queue,
            intervals: config.intervals(),
            poll_policy: config.poll_policy(),
            cancel: self.shutdown.clone(),
            telemetry: telemetry.clone(),
            operations,
        }));
        let coordinator =
            BatchCoordinator::new(driver, config.between_creates(), telemetry.clone());
        let outcome = coordinator
            .run(batches, config.parallel_batches())
            .await;
        // Dropping the last driver closes the termination queue.
        drop(coordinator);

        // Phase 6: drain.
        let terminations = self.drain(worker, &worker_stop).await;

        reporter_stop.cancel();
        if let Err(err) = reporter.await {
            tracing::warn!(error = %err, "metrics reporter task failed");
        }

        // Phase 7: summary.
        let summary = SimulationSummary::build(
            ledger.snapshot(),
            outcome,
            terminations,
            telemetry.snapshot(),
            self.service.metrics(),
            started_at,
            Utc::now(),
        );
        tracing::info!(
            total = summary.total_orders,
            succeeded = summary.successful_orders,
            failed = summary.failed_orders,
            interrupted = summary.interrupted_orders,
            pending = summary.pending_orders,
            duration_ms = summary.duration_ms,
            "simulation finished"
        );

        if let Err(err) = report::print_summary(&summary) {
            tracing::warn!(error = %err, "failed to print summary");
        }
        if let Some(dir) = config.results_dir() {
            let path = report::save_json(dir, &summary, Local::now())?;
            tracing::info!(path = %path.display(), "saved results");
        }

        Ok(summary)
    }

    /// Runs until the simulation finishes or a Ctrl-C (SIGINT) arrives, in
    /// which case in-flight orders are interrupted and the partial summary is
    /// still produced.
    pub async fn run_until_ctrl_c(&self) -> Result<SimulationSummary> {
        let shutdown = self.shutdown.clone();
        let watcher = tokio::spawn(async move {
            tokio::select! {
                _ = signal::ctrl_c() => {
                    tracing::info!("Ctrl-C received; interrupting simulation");
                    shutdown.cancel();
                }
                _ = shutdown.cancelled() => {}
            }
        });

        let result = self.run().await;
        watcher.abort();
        result
    }

    async fn drain(
        &self,
        mut worker: JoinHandle<TerminationReport>,
        stop: &CancellationToken,
    ) -> TerminationReport {
        let drain_timeout = self.config.drain_timeout();
        tracing::info!(
            timeout_ms = drain_timeout.as_millis() as u64,
            "waiting for pending terminations"
        );

        let joined = match tokio::time::timeout(drain_timeout, &mut worker).await {
            Ok(joined) => joined,
            Err(_) => {
                tracing::warn!("termination drain timed out; stopping worker");
                stop.cancel();
                worker.await
            }
        };

        match joined {
            Ok(report) => report,
            Err(err) => {
                tracing::error!(error = %err, "termination worker failed");
                TerminationReport::default()
            }
        }
    }
}
