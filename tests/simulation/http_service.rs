use std::sync::Arc;

use chrono::Utc;
use gameday::service::{OAuthSettings, ServiceOperation, TokenManager};
use gameday::{
    HttpOrderService, OrderPayload, OrderType, RemoteOrderService, RemoteStatus, ServiceError,
};
use serde_json::Map;

use crate::support::{
    helpers::{fast_service_options, flat_template, init_tracing},
    mock_api::{MockApiServer, MockOrderApi},
};

fn payload(number: &str, order_type: OrderType) -> OrderPayload {
    OrderPayload {
        order_number: number.to_string(),
        order_type,
        location: "Range 4".to_string(),
        poc_order: "POC-7".to_string(),
        timestamp: Utc::now(),
        custom_fields: Map::new(),
        geometry: flat_template(),
    }
}

#[tokio::test]
async fn full_order_flow_over_http() {
    init_tracing();
    let api = MockOrderApi::new(1);
    let server = MockApiServer::start(api.clone()).await.expect("server");
    let service = HttpOrderService::new(server.url(), fast_service_options()).expect("service");

    let id = service
        .create_order(&payload("ORD-000001", OrderType::Activate))
        .await
        .expect("create");
    assert_eq!(id, "order-1");
    assert_eq!(service.order_status(&id).await.expect("status"), RemoteStatus::Pending);
    assert_eq!(service.order_status(&id).await.expect("status"), RemoteStatus::Ready);

    service.activate(&id).await.expect("activate");
    service.finalize(&id).await.expect("end");

    let created = api.calls_to("/operation/payload");
    assert_eq!(created.len(), 1);
    let body = &created[0].body;
    assert_eq!(body["orderNumber"], "ORD-000001");
    assert_eq!(body["type"], "activate");
    assert_eq!(body["location"], "Range 4");
    assert_eq!(body["pocOrder"], "POC-7");
    assert_eq!(body["geometry"]["type"], "LineString");

    assert_eq!(api.calls_to("/details").len(), 2);
    assert_eq!(api.calls_to("/activate")[0].order_id.as_deref(), Some("order-1"));
    assert_eq!(api.calls_to("/end")[0].order_id.as_deref(), Some("order-1"));

    let metrics = service.metrics_snapshot();
    assert_eq!(
        metrics
            .operation(ServiceOperation::Status)
            .expect("status metrics")
            .total_requests,
        2
    );

    server.shutdown().await;
}

#[tokio::test]
async fn server_errors_are_retried() {
    init_tracing();
    let api = MockOrderApi::new(0);
    api.fail_next("/operation/payload", 503);
    let server = MockApiServer::start(api.clone()).await.expect("server");
    let service = HttpOrderService::new(server.url(), fast_service_options()).expect("service");

    let id = service
        .create_order(&payload("ORD-000001", OrderType::Accept))
        .await
        .expect("create after retry");
    assert_eq!(id, "order-1");
    assert_eq!(api.calls_to("/operation/payload").len(), 2);

    let create = service.metrics_snapshot();
    let create = create.operation(ServiceOperation::Create).expect("metrics");
    assert_eq!(create.total_requests, 2);
    assert_eq!(create.total_errors, 1);

    server.shutdown().await;
}

#[tokio::test]
async fn validation_errors_are_not_retried() {
    init_tracing();
    let api = MockOrderApi::new(0);
    api.reject_order("ORD-000009");
    let server = MockApiServer::start(api.clone()).await.expect("server");
    let service = HttpOrderService::new(server.url(), fast_service_options()).expect("service");

    let err = service
        .create_order(&payload("ORD-000009", OrderType::Accept))
        .await
        .unwrap_err();
    match err {
        ServiceError::Http { status, message, .. } => {
            assert_eq!(status, 422);
            assert!(message.contains("ORD-000009"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(api.calls_to("/operation/payload").len(), 1);

    server.shutdown().await;
}

#[tokio::test]
async fn bearer_token_is_fetched_once_and_attached() {
    init_tracing();
    let api = MockOrderApi::new(0);
    let server = MockApiServer::start(api.clone()).await.expect("server");
    let service = HttpOrderService::new(server.url(), fast_service_options()).expect("service");
    let auth = Arc::new(TokenManager::new(
        OAuthSettings {
            token_url: format!("{}/oauth/token", server.url()),
            client_id: "gameday".to_string(),
            client_secret: None,
            username: "operator".to_string(),
            password: "secret".to_string(),
            scope: None,
        },
        service.http_client().clone(),
    ));
    let service = service.with_auth(auth);

    let id = service
        .create_order(&payload("ORD-000001", OrderType::Activate))
        .await
        .expect("create");
    service.order_status(&id).await.expect("status");

    assert_eq!(api.tokens_issued(), 1);
    for call in api
        .calls()
        .iter()
        .filter(|call| call.path != "/oauth/token")
    {
        assert_eq!(call.authorization.as_deref(), Some("Bearer test-token"));
    }

    server.shutdown().await;
}
