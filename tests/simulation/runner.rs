use std::sync::Arc;
use std::time::Duration;

use gameday::service::ServiceOperation;
use gameday::{BoundaryPolygon, Coordinate, OrderState, Runner};

use crate::support::{
    helpers::{fast_config, init_tracing},
    scripted::ScriptedOrderService,
};

const UNUSED_URL: &str = "http://127.0.0.1:9";

#[tokio::test]
async fn per_order_failures_do_not_stop_the_run() {
    init_tracing();
    let service = Arc::new(
        ScriptedOrderService::new(1)
            .reject_create("ORD-000002")
            .remote_failure("ORD-000004"),
    );
    let config = fast_config(UNUSED_URL, 10, 5).build().expect("config");
    let summary = Runner::with_service(config, service.clone())
        .run()
        .await
        .expect("run");

    assert_eq!(summary.total_orders, 10);
    assert_eq!(summary.failed_orders, 2);
    assert_eq!(summary.successful_orders, 8);
    assert_eq!(summary.interrupted_orders, 0);

    let rejected = summary
        .orders
        .iter()
        .find(|order| order.order_number == "ORD-000002")
        .expect("rejected order");
    assert_eq!(rejected.state, OrderState::Failed);
    assert!(rejected.remote_id.is_none());
    assert!(rejected.error.is_some());

    let remote_failed = summary
        .orders
        .iter()
        .find(|order| order.order_number == "ORD-000004")
        .expect("remote failure");
    assert_eq!(remote_failed.state, OrderState::Failed);
    assert!(remote_failed.remote_id.is_some());

    assert_eq!(service.count(ServiceOperation::Create), 10);
    assert_eq!(
        service.count(ServiceOperation::Finalize) + service.count(ServiceOperation::Cancel),
        8
    );
}

#[tokio::test]
async fn orders_within_a_batch_are_created_in_sequence() {
    init_tracing();
    let service = Arc::new(ScriptedOrderService::new(0));
    let config = fast_config(UNUSED_URL, 10, 10)
        .batch_size(10)
        .build()
        .expect("config");
    Runner::with_service(config, service.clone())
        .run()
        .await
        .expect("run");

    let created: Vec<String> = service
        .calls()
        .into_iter()
        .filter(|(op, _)| *op == ServiceOperation::Create)
        .map(|(_, number)| number)
        .collect();
    let expected: Vec<String> = (1..=10).map(|n| format!("ORD-{n:06}")).collect();
    assert_eq!(created, expected);
}

#[tokio::test]
async fn failed_terminations_mark_orders_failed() {
    init_tracing();
    let service = Arc::new(ScriptedOrderService::new(0).fail_terminations());
    let config = fast_config(UNUSED_URL, 4, 2).build().expect("config");
    let summary = Runner::with_service(config, service)
        .run()
        .await
        .expect("run");

    assert_eq!(summary.failed_orders, 4);
    assert_eq!(summary.terminations.failed, 4);
    assert!(summary
        .orders
        .iter()
        .all(|order| order.error.as_deref().is_some_and(|e| e.contains("failed to"))));
}

#[tokio::test]
async fn exhausted_boundary_aborts_before_any_request() {
    init_tracing();
    let service = Arc::new(ScriptedOrderService::new(0));
    let tiny = BoundaryPolygon::new(vec![
        Coordinate::new(0.0, 0.9),
        Coordinate::new(0.3, 0.9),
        Coordinate::new(0.3, 1.0),
        Coordinate::new(0.0, 1.0),
        Coordinate::new(0.0, 0.9),
    ])
    .expect("boundary");
    let config = fast_config(UNUSED_URL, 50, 10)
        .boundary(Some(tiny))
        .max_rows(20)
        .build()
        .expect("config");

    let err = Runner::with_service(config, service.clone())
        .run()
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("generate"));
    assert!(service.calls().is_empty());
}

#[tokio::test]
async fn cancellation_interrupts_without_failing() {
    init_tracing();
    let service = Arc::new(ScriptedOrderService::new(0).with_call_delay(Duration::from_millis(20)));
    let config = fast_config(UNUSED_URL, 20, 10)
        .parallel_batches(1)
        .build()
        .expect("config");
    let runner = Runner::with_service(config, service);
    let token = runner.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        token.cancel();
    });

    let summary = runner.run().await.expect("run");
    assert_eq!(summary.total_orders, 20);
    assert!(summary.interrupted_orders > 0);
    assert_eq!(summary.failed_orders, 0);
    assert!(summary.orders.iter().all(|order| {
        matches!(
            order.state,
            OrderState::Ended
                | OrderState::Cancelled
                | OrderState::Interrupted
                | OrderState::PendingEnd
                | OrderState::PendingCancel
        )
    }));
}
