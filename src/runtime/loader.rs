//! Reads a simulation file (YAML) and its optional geometry file (JSON) into a
//! validated [`SimulationConfig`].
//!
//! Durations are integer milliseconds under `*Ms` keys. Geometry may be given
//! inline under `payload` or in the JSON file named by `geometryFile`
//! (resolved relative to the YAML file); the file wins when both are present.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::geometry::{BoundaryPolygon, CoordinateDelta, LineGeometry};
use crate::payload::factory::DEFAULT_ORDER_NUMBER_PREFIX;
use crate::payload::PayloadAttributes;
use crate::runtime::config::{SimulationConfig, SimulationConfigBuilder};
use crate::service::{OAuthSettings, ServiceClientOptions};
use crate::simulator::{LifecycleIntervals, PollPolicy};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct SimulationFile {
    simulation: SimulationSection,
    #[serde(default)]
    payload: PayloadSection,
    #[serde(default)]
    intervals: IntervalSection,
    service: ServiceSection,
    #[serde(default)]
    oauth: Option<OAuthSettings>,
    #[serde(default)]
    termination: TerminationSection,
    #[serde(default)]
    output: OutputSection,
    #[serde(default)]
    metrics_interval_ms: Option<u64>,
    #[serde(default)]
    geometry_file: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SimulationSection {
    total_orders: usize,
    batch_size: usize,
    parallel_batches: usize,
    activated_count: usize,
    #[serde(default)]
    shuffle_seed: Option<u64>,
    #[serde(default)]
    max_rows: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PayloadSection {
    #[serde(default)]
    location: String,
    #[serde(default)]
    poc_order: String,
    #[serde(default)]
    order_number_prefix: Option<String>,
    #[serde(default)]
    custom_fields: Map<String, Value>,
    #[serde(flatten)]
    geometry: GeometrySection,
}

/// Shape shared by the inline `payload` geometry and the geometry file.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeometrySection {
    #[serde(default)]
    base_polyline: Option<LineGeometry>,
    #[serde(default)]
    boundary: Option<BoundaryPolygon>,
    #[serde(default)]
    delta: Option<CoordinateDelta>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntervalSection {
    between_creates_ms: Option<u64>,
    after_create_before_get_ms: Option<u64>,
    between_get_polls_ms: Option<u64>,
    poll_deadline_ms: Option<u64>,
    before_activate_ms: Option<u64>,
    before_cancel_ms: Option<u64>,
    before_end_ms: Option<u64>,
    #[serde(default)]
    poll_policy: Option<PollPolicy>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServiceSection {
    base_url: String,
    timeout_ms: Option<u64>,
    max_attempts: Option<usize>,
    initial_backoff_ms: Option<u64>,
    max_backoff_ms: Option<u64>,
    breaker_threshold: Option<usize>,
    breaker_cooldown_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TerminationSection {
    queue_capacity: Option<usize>,
    enqueue_timeout_ms: Option<u64>,
    drain_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OutputSection {
    geojson_dir: Option<PathBuf>,
    results_dir: Option<PathBuf>,
    operations_dir: Option<PathBuf>,
}

/// Loads and validates the simulation described by the YAML file at `path`.
pub fn load(path: impl AsRef<Path>) -> Result<SimulationConfig> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read simulation file {}", path.display()))?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    from_yaml_str(&text, base_dir)
        .with_context(|| format!("invalid simulation file {}", path.display()))
}

/// Parses a simulation document; `base_dir` resolves a relative `geometryFile`.
pub fn from_yaml_str(text: &str, base_dir: &Path) -> Result<SimulationConfig> {
    let file: SimulationFile = serde_yaml::from_str(text).context("failed to parse YAML")?;

    let mut geometry = file.payload.geometry;
    if let Some(geometry_file) = &file.geometry_file {
        let resolved = if geometry_file.is_absolute() {
            geometry_file.clone()
        } else {
            base_dir.join(geometry_file)
        };
        let loaded = load_geometry(&resolved)?;
        geometry = GeometrySection {
            base_polyline: loaded.base_polyline.or(geometry.base_polyline),
            boundary: loaded.boundary.or(geometry.boundary),
            delta: loaded.delta.or(geometry.delta),
        };
    }

    let defaults = LifecycleIntervals::default();
    let intervals = LifecycleIntervals {
        after_create: millis_or(file.intervals.after_create_before_get_ms, defaults.after_create),
        poll_interval: millis_or(file.intervals.between_get_polls_ms, defaults.poll_interval),
        poll_deadline: millis_or(file.intervals.poll_deadline_ms, defaults.poll_deadline),
        before_activate: millis_or(file.intervals.before_activate_ms, defaults.before_activate),
        before_end: millis_or(file.intervals.before_end_ms, defaults.before_end),
        before_cancel: millis_or(file.intervals.before_cancel_ms, defaults.before_cancel),
    };

    let service_defaults = ServiceClientOptions::default();
    let service_options = ServiceClientOptions {
        request_timeout: millis_or(file.service.timeout_ms, service_defaults.request_timeout),
        max_attempts: file
            .service
            .max_attempts
            .unwrap_or(service_defaults.max_attempts),
        initial_backoff: millis_or(
            file.service.initial_backoff_ms,
            service_defaults.initial_backoff,
        ),
        max_backoff: millis_or(file.service.max_backoff_ms, service_defaults.max_backoff),
        breaker_threshold: file
            .service
            .breaker_threshold
            .unwrap_or(service_defaults.breaker_threshold),
        breaker_cooldown: millis_or(
            file.service.breaker_cooldown_ms,
            service_defaults.breaker_cooldown,
        ),
    };

    let attributes = PayloadAttributes {
        order_number_prefix: file
            .payload
            .order_number_prefix
            .unwrap_or_else(|| DEFAULT_ORDER_NUMBER_PREFIX.to_string()),
        location: file.payload.location,
        poc_order: file.payload.poc_order,
        custom_fields: file.payload.custom_fields,
    };

    let mut builder: SimulationConfigBuilder = SimulationConfig::builder()
        .total_orders(file.simulation.total_orders)
        .activated_count(file.simulation.activated_count)
        .batch_size(file.simulation.batch_size)
        .parallel_batches(file.simulation.parallel_batches)
        .shuffle_seed(file.simulation.shuffle_seed)
        .service_url(file.service.base_url)
        .boundary(geometry.boundary)
        .attributes(attributes)
        .intervals(intervals)
        .poll_policy(file.intervals.poll_policy.unwrap_or_default())
        .service_options(service_options)
        .oauth(file.oauth);

    if let Some(template) = geometry.base_polyline {
        builder = builder.template(template);
    }
    if let Some(delta) = geometry.delta {
        builder = builder.delta(
            CoordinateDelta::new(delta.longitude, delta.latitude)
                .context("delta longitude and latitude must be positive")?,
        );
    }
    if let Some(rows) = file.simulation.max_rows {
        builder = builder.max_rows(rows);
    }
    if let Some(ms) = file.intervals.between_creates_ms {
        builder = builder.between_creates(Duration::from_millis(ms));
    }
    if let Some(capacity) = file.termination.queue_capacity {
        builder = builder.queue_capacity(capacity);
    }
    if let Some(ms) = file.termination.enqueue_timeout_ms {
        builder = builder.enqueue_timeout(Duration::from_millis(ms));
    }
    if let Some(ms) = file.termination.drain_timeout_ms {
        builder = builder.drain_timeout(Duration::from_millis(ms));
    }
    if let Some(ms) = file.metrics_interval_ms {
        builder = builder.metrics_interval(Duration::from_millis(ms));
    }
    if let Some(dir) = file.output.geojson_dir {
        builder = builder.geojson_dir(dir);
    }
    if let Some(dir) = file.output.results_dir {
        builder = builder.results_dir(dir);
    }
    if let Some(dir) = file.output.operations_dir {
        builder = builder.operations_dir(dir);
    }

    builder.build()
}

fn load_geometry(path: &Path) -> Result<GeometrySection> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read geometry file {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("failed to parse geometry file {}", path.display()))
}

fn millis_or(value: Option<u64>, default: Duration) -> Duration {
    value.map(Duration::from_millis).unwrap_or(default)
}
