use std::time::Duration;

use gameday::service::ServiceClientOptions;
use gameday::simulator::LifecycleIntervals;
use gameday::{BoundaryPolygon, Coordinate, CoordinateDelta, LineGeometry, SimulationConfigBuilder};
use gameday::SimulationConfig;
use once_cell::sync::Lazy;
use tracing_subscriber::EnvFilter;

static TRACING_SUBSCRIBER: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
});

pub fn init_tracing() {
    Lazy::force(&TRACING_SUBSCRIBER);
}

pub fn unit_square() -> BoundaryPolygon {
    BoundaryPolygon::new(vec![
        Coordinate::new(0.0, 0.0),
        Coordinate::new(1.0, 0.0),
        Coordinate::new(1.0, 1.0),
        Coordinate::new(0.0, 1.0),
        Coordinate::new(0.0, 0.0),
    ])
    .expect("unit square")
}

pub fn flat_template() -> LineGeometry {
    LineGeometry::new(vec![Coordinate::new(0.01, 0.95), Coordinate::new(0.05, 0.95)])
        .expect("template")
}

/// Millisecond-scale intervals so whole runs finish quickly in real time.
pub fn fast_intervals() -> LifecycleIntervals {
    LifecycleIntervals {
        after_create: Duration::from_millis(2),
        poll_interval: Duration::from_millis(5),
        poll_deadline: Duration::from_secs(5),
        before_activate: Duration::from_millis(2),
        before_end: Duration::from_millis(2),
        before_cancel: Duration::from_millis(2),
    }
}

pub fn fast_service_options() -> ServiceClientOptions {
    ServiceClientOptions {
        request_timeout: Duration::from_secs(2),
        max_attempts: 3,
        initial_backoff: Duration::from_millis(5),
        max_backoff: Duration::from_millis(20),
        breaker_threshold: 50,
        breaker_cooldown: Duration::from_millis(100),
    }
}

/// A unit-square simulation against `service_url`, ready to `build()`.
pub fn fast_config(service_url: &str, total: usize, activated: usize) -> SimulationConfigBuilder {
    SimulationConfig::builder()
        .total_orders(total)
        .activated_count(activated)
        .batch_size(5)
        .parallel_batches(2)
        .service_url(service_url)
        .template(flat_template())
        .delta(CoordinateDelta::new(0.1, 0.1).expect("delta"))
        .boundary(Some(unit_square()))
        .between_creates(Duration::from_millis(2))
        .intervals(fast_intervals())
        .service_options(fast_service_options())
        .enqueue_timeout(Duration::from_secs(1))
        .drain_timeout(Duration::from_secs(5))
        .metrics_interval(Duration::from_millis(50))
}
