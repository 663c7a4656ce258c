use crate::geometry::{BoundaryPolygon, CoordinateDelta, LineGeometry, DEFAULT_MAX_ROWS};
use crate::payload::factory::DEFAULT_ORDER_NUMBER_PREFIX;
use crate::payload::PayloadAttributes;
use crate::runtime::telemetry;
use crate::service::{OAuthSettings, ServiceClientOptions};
use crate::simulator::driver::DEFAULT_STEP_INTERVAL;
use crate::simulator::termination::{DEFAULT_ENQUEUE_TIMEOUT, DEFAULT_QUEUE_CAPACITY};
use crate::simulator::{LifecycleIntervals, PollPolicy};
use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_DRAIN_TIMEOUT_SECS: u64 = 120;

/// Runtime configuration for one simulation run.
///
/// All instances must be constructed via [`SimulationConfig::builder`] or
/// [`SimulationConfig::new`] so invariants are validated before the runner
/// touches the network.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    total_orders: usize,
    activated_count: usize,
    batch_size: usize,
    parallel_batches: usize,
    service_url: String,
    template: LineGeometry,
    delta: CoordinateDelta,
    boundary: Option<BoundaryPolygon>,
    attributes: PayloadAttributes,
    shuffle_seed: Option<u64>,
    max_rows: u32,
    between_creates: Duration,
    intervals: LifecycleIntervals,
    poll_policy: PollPolicy,
    service_options: ServiceClientOptions,
    oauth: Option<OAuthSettings>,
    queue_capacity: usize,
    enqueue_timeout: Duration,
    drain_timeout: Duration,
    metrics_interval: Duration,
    geojson_dir: Option<PathBuf>,
    results_dir: Option<PathBuf>,
    operations_dir: Option<PathBuf>,
}

pub struct SimulationConfigParams {
    pub total_orders: usize,
    pub activated_count: usize,
    pub batch_size: usize,
    pub parallel_batches: usize,
    pub service_url: String,
    pub template: LineGeometry,
    pub delta: CoordinateDelta,
    pub boundary: Option<BoundaryPolygon>,
    pub attributes: PayloadAttributes,
    pub shuffle_seed: Option<u64>,
    pub max_rows: u32,
    pub between_creates: Duration,
    pub intervals: LifecycleIntervals,
    pub poll_policy: PollPolicy,
    pub service_options: ServiceClientOptions,
    pub oauth: Option<OAuthSettings>,
    pub queue_capacity: usize,
    pub enqueue_timeout: Duration,
    pub drain_timeout: Duration,
    pub metrics_interval: Duration,
    pub geojson_dir: Option<PathBuf>,
    pub results_dir: Option<PathBuf>,
    pub operations_dir: Option<PathBuf>,
}

impl SimulationConfig {
    /// Returns a builder to incrementally construct and validate a configuration.
    pub fn builder() -> SimulationConfigBuilder {
        SimulationConfigBuilder::default()
    }

    /// Constructs a configuration directly from the provided values.
    pub fn new(params: SimulationConfigParams) -> Result<Self> {
        let SimulationConfigParams {
            total_orders,
            activated_count,
            batch_size,
            parallel_batches,
            service_url,
            template,
            delta,
            boundary,
            attributes,
            shuffle_seed,
            max_rows,
            between_creates,
            intervals,
            poll_policy,
            service_options,
            oauth,
            queue_capacity,
            enqueue_timeout,
            drain_timeout,
            metrics_interval,
            geojson_dir,
            results_dir,
            operations_dir,
        } = params;

        let config = Self {
            total_orders,
            activated_count,
            batch_size,
            parallel_batches,
            service_url: service_url.trim().trim_end_matches('/').to_owned(),
            template,
            delta,
            boundary,
            attributes,
            shuffle_seed,
            max_rows,
            between_creates,
            intervals,
            poll_policy,
            service_options,
            oauth,
            queue_capacity,
            enqueue_timeout,
            drain_timeout,
            metrics_interval,
            geojson_dir,
            results_dir,
            operations_dir,
        };

        config.validate()?;
        Ok(config)
    }

    /// Number of orders generated and driven.
    pub fn total_orders(&self) -> usize {
        self.total_orders
    }

    /// How many of them follow the activate flow.
    pub fn activated_count(&self) -> usize {
        self.activated_count
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Maximum number of batches in flight at once.
    pub fn parallel_batches(&self) -> usize {
        self.parallel_batches
    }

    /// Base URL of the order service, without a trailing slash.
    pub fn service_url(&self) -> &str {
        &self.service_url
    }

    pub fn template(&self) -> &LineGeometry {
        &self.template
    }

    pub fn delta(&self) -> CoordinateDelta {
        self.delta
    }

    pub fn boundary(&self) -> Option<&BoundaryPolygon> {
        self.boundary.as_ref()
    }

    pub fn attributes(&self) -> &PayloadAttributes {
        &self.attributes
    }

    pub fn shuffle_seed(&self) -> Option<u64> {
        self.shuffle_seed
    }

    /// Grid rows the path generator may try before giving up.
    pub fn max_rows(&self) -> u32 {
        self.max_rows
    }

    /// Pause between consecutive order creations within a batch.
    pub fn between_creates(&self) -> Duration {
        self.between_creates
    }

    pub fn intervals(&self) -> LifecycleIntervals {
        self.intervals
    }

    pub fn poll_policy(&self) -> PollPolicy {
        self.poll_policy
    }

    pub fn service_options(&self) -> &ServiceClientOptions {
        &self.service_options
    }

    pub fn oauth(&self) -> Option<&OAuthSettings> {
        self.oauth.as_ref()
    }

    /// Capacity of the termination queue.
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// How long a driver waits for room in a full termination queue.
    pub fn enqueue_timeout(&self) -> Duration {
        self.enqueue_timeout
    }

    /// How long the runner lets the termination worker drain after the last
    /// batch before stopping it.
    pub fn drain_timeout(&self) -> Duration {
        self.drain_timeout
    }

    /// Interval used by the telemetry reporter.
    pub fn metrics_interval(&self) -> Duration {
        self.metrics_interval
    }

    pub fn geojson_dir(&self) -> Option<&Path> {
        self.geojson_dir.as_deref()
    }

    pub fn results_dir(&self) -> Option<&Path> {
        self.results_dir.as_deref()
    }

    pub fn operations_dir(&self) -> Option<&Path> {
        self.operations_dir.as_deref()
    }

    /// Performs validation on an existing configuration instance.
    pub fn validate(&self) -> Result<()> {
        validate_url(&self.service_url)?;

        if self.total_orders == 0 {
            bail!("total_orders must be greater than 0");
        }

        if self.activated_count > self.total_orders {
            bail!(
                "activated_count ({}) cannot exceed total_orders ({})",
                self.activated_count,
                self.total_orders
            );
        }

        if self.batch_size == 0 {
            bail!("batch_size must be greater than 0");
        }

        if self.parallel_batches == 0 {
            bail!("parallel_batches must be greater than 0");
        }

        if self.max_rows == 0 {
            bail!("max_rows must be greater than 0");
        }

        if !(self.delta.longitude.is_finite()
            && self.delta.latitude.is_finite()
            && self.delta.longitude > 0.0
            && self.delta.latitude > 0.0)
        {
            bail!("delta longitude and latitude must be positive");
        }

        if let Some(boundary) = &self.boundary {
            if !boundary.contains_line(&self.template) {
                tracing::warn!("template path is not fully inside the boundary; row 0 column 0 will be skipped");
            }
        }

        if self.intervals.poll_interval.is_zero() {
            bail!("poll_interval must be greater than 0");
        }

        if self.intervals.poll_deadline.is_zero() {
            bail!("poll_deadline must be greater than 0");
        }

        if let PollPolicy::Exponential { max_interval } = self.poll_policy {
            if max_interval < self.intervals.poll_interval {
                bail!("poll_policy max_interval must be at least poll_interval");
            }
        }

        self.service_options
            .validate()
            .context("invalid service client options")?;

        if let Some(oauth) = &self.oauth {
            ensure_not_empty(&oauth.token_url, "oauth token_url")?;
            ensure_not_empty(&oauth.client_id, "oauth client_id")?;
            ensure_not_empty(&oauth.username, "oauth username")?;
        }

        if self.queue_capacity == 0 {
            bail!("queue_capacity must be greater than 0");
        }

        if self.enqueue_timeout.is_zero() {
            bail!("enqueue_timeout must be greater than 0");
        }

        if self.drain_timeout.is_zero() {
            bail!("drain_timeout must be greater than 0");
        }

        if self.metrics_interval.is_zero() {
            bail!("metrics_interval must be greater than 0");
        }

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct SimulationConfigBuilder {
    total_orders: Option<usize>,
    activated_count: Option<usize>,
    batch_size: Option<usize>,
    parallel_batches: Option<usize>,
    service_url: Option<String>,
    template: Option<LineGeometry>,
    delta: Option<CoordinateDelta>,
    boundary: Option<BoundaryPolygon>,
    attributes: Option<PayloadAttributes>,
    shuffle_seed: Option<u64>,
    max_rows: Option<u32>,
    between_creates: Option<Duration>,
    intervals: Option<LifecycleIntervals>,
    poll_policy: Option<PollPolicy>,
    service_options: Option<ServiceClientOptions>,
    oauth: Option<OAuthSettings>,
    queue_capacity: Option<usize>,
    enqueue_timeout: Option<Duration>,
    drain_timeout: Option<Duration>,
    metrics_interval: Option<Duration>,
    geojson_dir: Option<PathBuf>,
    results_dir: Option<PathBuf>,
    operations_dir: Option<PathBuf>,
}

impl SimulationConfigBuilder {
    pub fn total_orders(mut self, total: usize) -> Self {
        self.total_orders = Some(total);
        self
    }

    pub fn activated_count(mut self, activated: usize) -> Self {
        self.activated_count = Some(activated);
        self
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }

    pub fn parallel_batches(mut self, parallel: usize) -> Self {
        self.parallel_batches = Some(parallel);
        self
    }

    pub fn service_url(mut self, url: impl Into<String>) -> Self {
        self.service_url = Some(url.into());
        self
    }

    pub fn template(mut self, template: LineGeometry) -> Self {
        self.template = Some(template);
        self
    }

    pub fn delta(mut self, delta: CoordinateDelta) -> Self {
        self.delta = Some(delta);
        self
    }

    pub fn boundary(mut self, boundary: Option<BoundaryPolygon>) -> Self {
        self.boundary = boundary;
        self
    }

    pub fn attributes(mut self, attributes: PayloadAttributes) -> Self {
        self.attributes = Some(attributes);
        self
    }

    pub fn shuffle_seed(mut self, seed: Option<u64>) -> Self {
        self.shuffle_seed = seed;
        self
    }

    pub fn max_rows(mut self, rows: u32) -> Self {
        self.max_rows = Some(rows);
        self
    }

    pub fn between_creates(mut self, interval: Duration) -> Self {
        self.between_creates = Some(interval);
        self
    }

    pub fn intervals(mut self, intervals: LifecycleIntervals) -> Self {
        self.intervals = Some(intervals);
        self
    }

    pub fn poll_policy(mut self, policy: PollPolicy) -> Self {
        self.poll_policy = Some(policy);
        self
    }

    pub fn service_options(mut self, options: ServiceClientOptions) -> Self {
        self.service_options = Some(options);
        self
    }

    pub fn oauth(mut self, oauth: Option<OAuthSettings>) -> Self {
        self.oauth = oauth;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    pub fn enqueue_timeout(mut self, timeout: Duration) -> Self {
        self.enqueue_timeout = Some(timeout);
        self
    }

    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = Some(timeout);
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    pub fn geojson_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.geojson_dir = Some(dir.into());
        self
    }

    pub fn results_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.results_dir = Some(dir.into());
        self
    }

    pub fn operations_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.operations_dir = Some(dir.into());
        self
    }

    pub fn build(self) -> Result<SimulationConfig> {
        let params = SimulationConfigParams {
            total_orders: self.total_orders.context("total_orders is required")?,
            activated_count: self.activated_count.context("activated_count is required")?,
            batch_size: self.batch_size.context("batch_size is required")?,
            parallel_batches: self
                .parallel_batches
                .context("parallel_batches is required")?,
            service_url: self.service_url.context("service_url is required")?,
            template: self.template.context("template is required")?,
            delta: self.delta.context("delta is required")?,
            boundary: self.boundary,
            attributes: self.attributes.unwrap_or_else(|| PayloadAttributes {
                order_number_prefix: DEFAULT_ORDER_NUMBER_PREFIX.to_string(),
                ..PayloadAttributes::default()
            }),
            shuffle_seed: self.shuffle_seed,
            max_rows: self.max_rows.unwrap_or(DEFAULT_MAX_ROWS),
            between_creates: self.between_creates.unwrap_or(DEFAULT_STEP_INTERVAL),
            intervals: self.intervals.unwrap_or_default(),
            poll_policy: self.poll_policy.unwrap_or_default(),
            service_options: self.service_options.unwrap_or_default(),
            oauth: self.oauth,
            queue_capacity: self.queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY),
            enqueue_timeout: self.enqueue_timeout.unwrap_or(DEFAULT_ENQUEUE_TIMEOUT),
            drain_timeout: self
                .drain_timeout
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_DRAIN_TIMEOUT_SECS)),
            metrics_interval: self
                .metrics_interval
                .unwrap_or(telemetry::DEFAULT_METRICS_INTERVAL),
            geojson_dir: self.geojson_dir,
            results_dir: self.results_dir,
            operations_dir: self.operations_dir,
        };

        SimulationConfig::new(params)
    }
}

fn ensure_not_empty(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        bail!("{field} cannot be empty");
    }
    Ok(())
}

fn validate_url(url: &str) -> Result<()> {
    let url = url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        bail!("service_url must start with http:// or https://");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Coordinate;

    fn template() -> LineGeometry {
        LineGeometry::new(vec![Coordinate::new(0.01, 0.5), Coordinate::new(0.05, 0.5)])
            .expect("template")
    }

    fn base_builder() -> SimulationConfigBuilder {
        SimulationConfig::builder()
            .total_orders(10)
            .activated_count(7)
            .batch_size(5)
            .parallel_batches(2)
            .service_url("http://localhost:8080/")
            .template(template())
            .delta(CoordinateDelta::new(0.1, 0.1).expect("delta"))
    }

    #[test]
    fn builder_produces_valid_config() {
        let config = base_builder().build().unwrap();
        assert_eq!(config.total_orders(), 10);
        assert_eq!(config.activated_count(), 7);
        assert_eq!(config.service_url(), "http://localhost:8080");
        assert_eq!(config.attributes().order_number_prefix, "ORD-");
        assert_eq!(config.queue_capacity(), DEFAULT_QUEUE_CAPACITY);
        assert_eq!(config.enqueue_timeout(), DEFAULT_ENQUEUE_TIMEOUT);
        assert_eq!(
            config.drain_timeout(),
            Duration::from_secs(DEFAULT_DRAIN_TIMEOUT_SECS)
        );
        assert_eq!(config.metrics_interval(), telemetry::DEFAULT_METRICS_INTERVAL);
        assert_eq!(config.max_rows(), DEFAULT_MAX_ROWS);
        assert_eq!(config.intervals().poll_deadline, Duration::from_secs(60));
        assert_eq!(config.between_creates(), Duration::from_secs(1));
        assert_eq!(config.poll_policy(), PollPolicy::Fixed);
        assert!(config.oauth().is_none());
        assert!(config.boundary().is_none());
    }

    #[test]
    fn missing_required_fields_error() {
        let err = SimulationConfig::builder()
            .total_orders(1)
            .activated_count(0)
            .batch_size(1)
            .parallel_batches(1)
            .template(template())
            .delta(CoordinateDelta::new(0.1, 0.1).expect("delta"))
            .build()
            .unwrap_err();
        assert!(
            format!("{err}").contains("service_url"),
            "error should mention missing service_url"
        );

        let err = SimulationConfig::builder()
            .total_orders(1)
            .activated_count(0)
            .batch_size(1)
            .parallel_batches(1)
            .service_url("http://localhost")
            .delta(CoordinateDelta::new(0.1, 0.1).expect("delta"))
            .build()
            .unwrap_err();
        assert!(format!("{err}").contains("template"));
    }

    #[test]
    fn validation_catches_invalid_values() {
        let err = base_builder().service_url("ftp://invalid").build().unwrap_err();
        assert!(format!("{err}").contains("http:// or https://"));

        let err = base_builder().activated_count(11).build().unwrap_err();
        assert!(format!("{err}").contains("activated_count"));

        let err = base_builder().total_orders(0).build().unwrap_err();
        assert!(format!("{err}").contains("total_orders"));

        let err = base_builder().batch_size(0).build().unwrap_err();
        assert!(format!("{err}").contains("batch_size"));

        let err = base_builder().parallel_batches(0).build().unwrap_err();
        assert!(format!("{err}").contains("parallel_batches"));

        let err = base_builder().queue_capacity(0).build().unwrap_err();
        assert!(format!("{err}").contains("queue_capacity"));

        let err = base_builder()
            .enqueue_timeout(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(format!("{err}").contains("enqueue_timeout"));

        let err = base_builder().max_rows(0).build().unwrap_err();
        assert!(format!("{err}").contains("max_rows"));

        let err = base_builder()
            .intervals(LifecycleIntervals {
                poll_deadline: Duration::ZERO,
                ..LifecycleIntervals::default()
            })
            .build()
            .unwrap_err();
        assert!(format!("{err}").contains("poll_deadline"));

        let err = base_builder()
            .poll_policy(PollPolicy::Exponential {
                max_interval: Duration::from_millis(10),
            })
            .build()
            .unwrap_err();
        assert!(format!("{err}").contains("max_interval"));
    }

    #[test]
    fn pacing_intervals_may_be_zero() {
        let config = base_builder()
            .between_creates(Duration::ZERO)
            .intervals(LifecycleIntervals {
                after_create: Duration::ZERO,
                before_activate: Duration::ZERO,
                before_end: Duration::ZERO,
                before_cancel: Duration::ZERO,
                ..LifecycleIntervals::default()
            })
            .build()
            .expect("zero pacing is allowed");
        assert_eq!(config.between_creates(), Duration::ZERO);
    }

    #[test]
    fn oauth_settings_are_checked() {
        let err = base_builder()
            .oauth(Some(OAuthSettings {
                token_url: " ".into(),
                client_id: "client".into(),
                client_secret: None,
                username: "user".into(),
                password: "pass".into(),
                scope: None,
            }))
            .build()
            .unwrap_err();
        assert!(format!("{err}").contains("token_url"));
    }

    #[test]
    fn direct_constructor_runs_validation() {
        let err = SimulationConfig::new(SimulationConfigParams {
            total_orders: 5,
            activated_count: 2,
            batch_size: 0,
            parallel_batches: 1,
            service_url: "http://localhost".into(),
            template: template(),
            delta: CoordinateDelta::new(0.1, 0.1).expect("delta"),
            boundary: None,
            attributes: PayloadAttributes::default(),
            shuffle_seed: None,
            max_rows: DEFAULT_MAX_ROWS,
            between_creates: Duration::ZERO,
            intervals: LifecycleIntervals::default(),
            poll_policy: PollPolicy::Fixed,
            service_options: ServiceClientOptions::default(),
            oauth: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            enqueue_timeout: DEFAULT_ENQUEUE_TIMEOUT,
            drain_timeout: Duration::from_secs(DEFAULT_DRAIN_TIMEOUT_SECS),
            metrics_interval: telemetry::DEFAULT_METRICS_INTERVAL,
            geojson_dir: None,
            results_dir: None,
            operations_dir: None,
        })
        .unwrap_err();
        assert!(format!("{err}").contains("batch_size"));
    }
}
