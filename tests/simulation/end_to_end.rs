use std::fs;
use std::sync::Arc;

use gameday::runtime::operations::{find_operations_file, read_order_ids};
use gameday::{Cleaner, HttpOrderService, OrderState, Runner};

use crate::support::{
    helpers::{fast_config, fast_service_options, init_tracing},
    mock_api::{MockApiServer, MockOrderApi},
};

fn json_files(dir: &std::path::Path, prefix: &str) -> Vec<std::path::PathBuf> {
    fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|entry| entry.ok().map(|entry| entry.path()))
                .filter(|path| {
                    path.file_name()
                        .and_then(|name| name.to_str())
                        .is_some_and(|name| name.starts_with(prefix) && name.ends_with(".json"))
                })
                .collect()
        })
        .unwrap_or_default()
}

#[tokio::test]
async fn simulation_terminates_every_order_over_http() {
    init_tracing();
    let api = MockOrderApi::new(2);
    let server = MockApiServer::start(api.clone()).await.expect("server");
    let out = tempfile::tempdir().expect("tempdir");

    let config = fast_config(server.url(), 10, 7)
        .geojson_dir(out.path().join("geojson"))
        .results_dir(out.path().join("results"))
        .operations_dir(out.path().join("logs"))
        .build()
        .expect("config");
    let runner = Runner::new(config).expect("runner");
    let summary = runner.run().await.expect("run");

    assert_eq!(summary.total_orders, 10);
    assert_eq!(summary.successful_orders, 10);
    assert_eq!(summary.failed_orders, 0);
    assert_eq!(summary.pending_orders, 0);
    assert_eq!(summary.state_counts.get(&OrderState::Ended), Some(&7));
    assert_eq!(summary.state_counts.get(&OrderState::Cancelled), Some(&3));
    assert_eq!(summary.batches.len(), 2);
    assert_eq!(summary.terminations.applied, 10);
    assert!(summary.orders.iter().all(|order| order.retry_count == 2));
    assert!(summary.orders.iter().all(|order| order.duration_ms.is_some()));

    assert_eq!(api.calls_to("/operation/payload").len(), 10);
    assert_eq!(api.calls_to("/activate").len(), 7);
    assert_eq!(api.calls_to("/end").len(), 7);
    assert_eq!(api.calls_to("/cancel").len(), 3);

    let geojson = json_files(&out.path().join("geojson"), "payloads_");
    assert_eq!(geojson.len(), 1);
    let collection: serde_json::Value =
        serde_json::from_slice(&fs::read(&geojson[0]).expect("read")).expect("geojson");
    assert_eq!(collection["type"], "FeatureCollection");
    // Boundary, template and one feature per order.
    assert_eq!(collection["features"].as_array().map(Vec::len), Some(12));

    let results = json_files(&out.path().join("results"), "simulation_results_");
    assert_eq!(results.len(), 1);

    let service_metrics = summary.service.expect("http service reports metrics");
    assert!(service_metrics.total_requests() >= 10 + 30 + 7 + 10);

    server.shutdown().await;
}

#[tokio::test]
async fn operations_log_drives_cleanup() {
    init_tracing();
    let api = MockOrderApi::new(0);
    let server = MockApiServer::start(api.clone()).await.expect("server");
    let out = tempfile::tempdir().expect("tempdir");
    let logs = out.path().join("logs");

    let config = fast_config(server.url(), 4, 2)
        .operations_dir(&logs)
        .build()
        .expect("config");
    let summary = Runner::new(config)
        .expect("runner")
        .run()
        .await
        .expect("run");
    assert_eq!(summary.successful_orders, 4);

    let date_dir = fs::read_dir(&logs)
        .expect("logs")
        .filter_map(Result::ok)
        .next()
        .expect("date directory");
    let ops_file = fs::read_dir(date_dir.path())
        .expect("date dir")
        .filter_map(Result::ok)
        .next()
        .expect("operations file");
    let name = ops_file.file_name().to_string_lossy().to_string();
    let timestamp = name
        .strip_prefix("operations_")
        .and_then(|rest| rest.strip_suffix(".txt"))
        .expect("operations file name")
        .to_string();

    let found = find_operations_file(&logs, &timestamp).await.expect("find");
    let ids = read_order_ids(&found).await.expect("ids");
    assert_eq!(ids.len(), 4);

    let before_end = api.calls_to("/end").len();
    let before_cancel = api.calls_to("/cancel").len();
    let service = HttpOrderService::new(server.url(), fast_service_options()).expect("service");
    let cleanup = Cleaner::new(Arc::new(service), &logs)
        .cleanup_by_timestamp(&timestamp)
        .await
        .expect("cleanup");

    assert_eq!(cleanup.total, 4);
    assert_eq!(cleanup.succeeded, 4);
    assert_eq!(cleanup.failed, 0);
    // The mock keeps reporting Accepted, so every replayed order is cancelled.
    assert_eq!(api.calls_to("/cancel").len(), before_cancel + 4);
    assert_eq!(api.calls_to("/end").len(), before_end);

    server.shutdown().await;
}
