//! HTTP surface tests: health, status, metrics and routing.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{TestAgent, TestServer, seed_chain, valid_cert};
use ocspwatch_core::{ContentId, Measurement};
use ocspwatch_server::status::StatusReport;
use time::OffsetDateTime;
use tower::ServiceExt;

#[tokio::test]
async fn test_health_check() {
    let server = TestServer::new().await;

    let (status, body) = server.json("GET", "/v1/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let server = TestServer::new().await;
    let (status, _) = server.json("GET", "/v1/nope", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_status_empty_store() {
    let server = TestServer::new().await;
    let (status, body) = server.json("GET", "/v1/status", None, None).await;
    assert_eq!(status, StatusCode::OK);
    let report: StatusReport = serde_json::from_value(body).unwrap();
    assert!(report.authorities.is_empty());
}

#[tokio::test]
async fn test_status_reports_latest_result_per_location() {
    let server = TestServer::new().await;
    let metadata = server.metadata();
    let subject = valid_cert();
    seed_chain(
        metadata.as_ref(),
        ("ExampleCA", 100),
        ("http://ocsp.example/", 50),
        &subject,
        b"iss",
    )
    .await;
    seed_chain(
        metadata.as_ref(),
        ("OtherCA", 10),
        ("http://ocsp.other/", 10),
        b"not-a-cert",
        b"iss",
    )
    .await;

    let content_id = ContentId::compute(&subject, b"iss");
    let now = OffsetDateTime::now_utc();

    for (name, older, newer) in [
        ("frankfurt-1", (false, false), (true, true)),
        ("tokyo-1", (true, true), (false, true)),
    ] {
        let token = server.invite(name).await;
        let agent = TestAgent::ed25519();
        let (status, _) = server
            .post_envelope("/v1/register", &agent.registration(&token))
            .await;
        assert_eq!(status, StatusCode::OK);

        let envelope = agent.submission(vec![
            Measurement::new(content_id, now - time::Duration::hours(1), older.0, older.1),
            Measurement::new(content_id, now, newer.0, newer.1),
        ]);
        let (status, _) = server.post_envelope("/v1/submit", &envelope).await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = server.json("GET", "/v1/status", None, None).await;
    assert_eq!(status, StatusCode::OK);
    let report: StatusReport = serde_json::from_value(body).unwrap();

    assert_eq!(report.authorities.len(), 2);
    let example = &report.authorities[0];
    assert_eq!(example.name, "ExampleCA");
    let responder = &example.responders[0];
    assert!(responder.current);
    assert_eq!(responder.locations.len(), 2);

    let mut statuses: Vec<_> = responder
        .locations
        .iter()
        .map(|l| (l.name.as_str(), l.status.as_str()))
        .collect();
    statuses.sort();
    assert_eq!(
        statuses,
        vec![("frankfurt-1", "good"), ("tokyo-1", "questionable")]
    );

    let other = &report.authorities[1];
    assert!(!other.responders[0].current);
    assert!(other.responders[0].locations.is_empty());
}

#[tokio::test]
async fn test_trace_id_header_is_accepted() {
    let server = TestServer::new().await;
    let request = Request::builder()
        .method("GET")
        .uri("/v1/health")
        // Tabs are legal in header values but stripped from trace ids.
        .header("x-trace-id", "abc\t123")
        .body(Body::empty())
        .unwrap();
    let response = server.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    ocspwatch_server::metrics::register_metrics();
    let server = TestServer::new().await;

    let (status, bytes, _) = server.send("GET", "/metrics", Body::empty(), None).await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(bytes).unwrap();
    assert!(text.contains("ocspwatch_manifest_requests_total"));
    assert!(text.contains("ocspwatch_results_ingested_total"));
}

#[tokio::test]
async fn test_metrics_endpoint_can_be_disabled() {
    let server = TestServer::with_config(|c| c.server.metrics_enabled = false).await;
    let (status, _, _) = server.send("GET", "/metrics", Body::empty(), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
