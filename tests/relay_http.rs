//! Push-relay HTTP contract tests
//!
//! Verify the exact request the relay client sends and how relay answers
//! surface through a full delivery.

use geofence_dispatch::domain::types::FailureCause;
use geofence_dispatch::domain::{
    DeliveryOutcome, DispatchDecision, EventKind, GeofenceEvent, MessageTemplate,
};
use geofence_dispatch::infra::NoopObserver;
use geofence_dispatch::io::{HttpPushRelay, PushRelay};
use geofence_dispatch::services::{DeliveryClient, RetryPolicy, TokenStore};
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::json;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn relay_for(server: &MockServer) -> HttpPushRelay {
    HttpPushRelay::new(&format!("{}/--/api/v2/push/send", server.uri()), Duration::from_secs(2))
        .unwrap()
}

fn client(relay: HttpPushRelay, tokens: Arc<TokenStore>) -> DeliveryClient {
    DeliveryClient::new(
        Arc::new(relay),
        tokens,
        MessageTemplate::default(),
        RetryPolicy { base: Duration::from_millis(5), cap: Duration::from_millis(20), max_attempts: 3 },
        Arc::new(NoopObserver),
    )
}

fn enter(region: &str) -> DispatchDecision {
    DispatchDecision::send(GeofenceEvent::new(region, EventKind::Enter, chrono::Utc::now()))
}

#[tokio::test]
async fn test_request_headers_and_body() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/--/api/v2/push/send"))
        .and(header("accept", "application/json"))
        .and(header("content-type", "application/json"))
        .and(body_json(json!({
            "to": "ExponentPushToken[abc]",
            "sound": "default",
            "title": "Estas cerca de Iglesia GERIZIM",
            "body": "Nos alegramos que te interese visitar Iglesia GERIZIM",
            "data": { "region": "Iglesia GERIZIM", "kind": "enter" }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "status": "ok", "id": "ticket-1" }
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let message = MessageTemplate::default().render(
        "ExponentPushToken[abc]",
        "Iglesia GERIZIM",
        EventKind::Enter,
    );
    let response = relay_for(&mock_server).send(&message).await.unwrap();

    assert_eq!(response.status, 200);
    assert!(response.body.contains("ticket-1"));

    let received = mock_server.received_requests().await.unwrap();
    let encoding = received[0].headers.get("accept-encoding").unwrap();
    assert_eq!(encoding.to_str().unwrap(), "gzip, deflate");
}

#[tokio::test]
async fn test_gzip_response_body_is_decoded() {
    let mock_server = MockServer::start().await;

    let body = r#"{"errors":[{"code":"DEVICE_NOT_REGISTERED"}]}"#;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(body.as_bytes()).unwrap();
    let compressed = encoder.finish().unwrap();

    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(400)
                .insert_header("content-encoding", "gzip")
                .set_body_bytes(compressed),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let message = MessageTemplate::default().render("tok", "A", EventKind::Enter);
    let response = relay_for(&mock_server).send(&message).await.unwrap();

    assert_eq!(response.status, 400);
    assert_eq!(response.body, body);
}

#[tokio::test]
async fn test_delivery_retries_server_errors() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/--/api/v2/push/send"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/--/api/v2/push/send"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    let tokens = Arc::new(TokenStore::with_token("tok"));
    let report = client(relay_for(&mock_server), tokens).deliver(enter("A")).await;

    assert_eq!(report.outcome, DeliveryOutcome::Success);
    assert_eq!(report.attempt_count(), 3);
    assert_eq!(report.attempts[0].status, Some(503));
}

#[tokio::test]
async fn test_delivery_rejected_clears_token() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/--/api/v2/push/send"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "errors": [{ "code": "VALIDATION_ERROR" }]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let tokens = Arc::new(TokenStore::with_token("stale"));
    let report = client(relay_for(&mock_server), tokens.clone()).deliver(enter("A")).await;

    assert_eq!(report.outcome, DeliveryOutcome::PermanentFailure(FailureCause::Rejected(400)));
    assert!(report.attempts[0].error.as_deref().unwrap_or_default().contains("VALIDATION_ERROR"));
    assert!(!tokens.is_present());
}

#[tokio::test]
async fn test_slow_relay_times_out_as_transient() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&mock_server)
        .await;

    let relay = HttpPushRelay::new(&mock_server.uri(), Duration::from_millis(50)).unwrap();
    let message = MessageTemplate::default().render("tok", "A", EventKind::Enter);
    let err = relay.send(&message).await.unwrap_err();

    assert!(err.is_transient());
}
