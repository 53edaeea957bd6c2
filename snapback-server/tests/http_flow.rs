// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! HTTP transport behavior: headers, auth gating, rate limits and the
//! POST-plus-channel request flow.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use snapback_analysis::{AdvisoryDb, LocalAnalyzer};
use snapback_server::auth::rate_limit::{RateLimitConfig, RateLimiter};
use snapback_server::auth::{AuthResolver, StaticKeyVerifier};
use snapback_server::mcp::handlers::Dispatcher;
use snapback_server::mcp::http::{build_router, HttpState};
use snapback_server::mcp::protocol::JsonRpcResponse;
use snapback_server::mcp::session::{Session, SessionRegistry};
use snapback_server::perf::PerfBudgets;
use snapback_server::routing::AnalysisRouter;
use snapback_server::sanitize::ErrorSanitizer;
use snapback_server::tools::native::ToolServices;
use snapback_server::tools::registry::ToolCatalog;
use snapback_core::{FeatureFlags, NoopSink, TelemetrySink};
use snapback_storage::SnapshotStore;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tower::util::ServiceExt;

struct HttpHarness {
    app: Router,
    sessions: Arc<SessionRegistry>,
    _workspace: tempfile::TempDir,
}

fn http_harness(development: bool, rate_cap: u32) -> HttpHarness {
    let workspace = tempfile::tempdir().expect("workspace");
    let telemetry: Arc<dyn TelemetrySink> = Arc::new(NoopSink);
    let advisories = Arc::new(AdvisoryDb::empty());
    let store = Arc::new(SnapshotStore::open(workspace.path()).expect("store"));

    let services = ToolServices {
        catalog: ToolCatalog::builtin().expect("catalog"),
        router: AnalysisRouter::new(
            LocalAnalyzer::with_baseline(advisories.clone()),
            None,
            Arc::new(FeatureFlags::default()),
            telemetry.clone(),
        ),
        store: store.clone(),
        docs: None,
        advisories,
        external: Vec::new(),
        workspace_root: workspace.path().to_path_buf(),
        telemetry: telemetry.clone(),
    };
    let entries = vec!["pro-key:pro".to_string()];
    let dispatcher = Arc::new(Dispatcher::new(
        services,
        AuthResolver::new(
            Arc::new(StaticKeyVerifier::from_entries(&entries)),
            development,
        ),
        ErrorSanitizer::new(development),
        PerfBudgets::defaults(),
    ));

    let sessions = Arc::new(SessionRegistry::new());
    let state = HttpState {
        dispatcher,
        sessions: sessions.clone(),
        limiter: Arc::new(RateLimiter::new(RateLimitConfig {
            max_requests: rate_cap,
            window: Duration::from_secs(60),
            enabled: true,
            max_clients: 100,
        })),
        telemetry,
        store,
        docs: None,
        breaker: None,
        development,
        started: Instant::now(),
    };
    let app = build_router(state, &[], 4 * 1024 * 1024);

    HttpHarness {
        app,
        sessions,
        _workspace: workspace,
    }
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json body")
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("X-Forwarded-For", "203.0.113.7")
        .body(Body::empty())
        .unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header("X-Forwarded-For", "203.0.113.7")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn version_reports_name_and_semver() {
    let harness = http_harness(true, 100);
    let response = harness.app.clone().oneshot(get("/version")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["name"], "snapback-mcp");
    assert!(body["version"].as_str().unwrap().split('.').count() >= 3);
}

#[tokio::test]
async fn health_reports_dependency_probes() {
    let harness = http_harness(true, 100);
    let response = harness.app.clone().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["snapshots"], 0);
    assert_eq!(body["upstreamCircuit"], "not-configured");
}

#[tokio::test]
async fn security_headers_are_applied_everywhere() {
    let harness = http_harness(true, 100);
    let response = harness.app.clone().oneshot(get("/version")).await.unwrap();
    let headers = response.headers();
    assert_eq!(headers["X-Content-Type-Options"], "nosniff");
    assert_eq!(headers["X-Frame-Options"], "DENY");
    assert_eq!(headers["X-XSS-Protection"], "1; mode=block");
    assert!(headers.contains_key("Strict-Transport-Security"));
    assert_eq!(headers["Content-Security-Policy"], "default-src 'none'");
}

#[tokio::test]
async fn rate_limit_returns_429_with_retry_after() {
    let harness = http_harness(true, 2);
    for _ in 0..2 {
        let response = harness.app.clone().oneshot(get("/version")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    let response = harness.app.clone().oneshot(get("/version")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()[header::RETRY_AFTER], "60");
    let body = body_json(response).await;
    assert_eq!(body["error"], "rate limit exceeded");
}

#[tokio::test]
async fn production_post_without_credential_is_401() {
    let harness = http_harness(false, 100);
    let request = post_json("/mcp?sessionId=s1", json!({"jsonrpc":"2.0","method":"ping","id":1}));
    let response = harness.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn wrong_content_type_is_rejected() {
    let harness = http_harness(true, 100);
    let request = Request::builder()
        .method("POST")
        .uri("/mcp?sessionId=s1")
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from("{}"))
        .unwrap();
    let response = harness.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn missing_and_unknown_sessions_are_client_errors() {
    let harness = http_harness(true, 100);

    let request = post_json("/mcp", json!({"jsonrpc":"2.0","method":"ping","id":1}));
    let response = harness.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let request = post_json(
        "/mcp?sessionId=nope",
        json!({"jsonrpc":"2.0","method":"ping","id":1}),
    );
    let response = harness.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn posted_requests_answer_over_the_session_channel() {
    let harness = http_harness(true, 100);
    let (tx, mut rx) = mpsc::channel::<JsonRpcResponse>(8);
    harness.sessions.register(Session::new("s-test", tx));

    let request = post_json(
        "/mcp?sessionId=s-test",
        json!({"jsonrpc":"2.0","method":"list_tools","id":42}),
    );
    let response = harness.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let answer = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timely response")
        .expect("response");
    assert!(answer.error.is_none());
    let tools = &answer.result.unwrap()["tools"];
    assert!(tools.as_array().unwrap().len() >= 8);
}

#[tokio::test]
async fn parse_errors_answer_with_null_id_and_keep_the_session() {
    let harness = http_harness(true, 100);
    let (tx, mut rx) = mpsc::channel::<JsonRpcResponse>(8);
    harness.sessions.register(Session::new("s-parse", tx));

    let request = Request::builder()
        .method("POST")
        .uri("/mcp?sessionId=s-parse")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = harness.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let answer = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timely response")
        .expect("response");
    let error = answer.error.expect("parse error");
    assert_eq!(error.code, -32700);

    // The session is still usable.
    let request = post_json(
        "/mcp?sessionId=s-parse",
        json!({"jsonrpc":"2.0","method":"ping","id":2}),
    );
    let response = harness.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let answer = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timely response")
        .expect("response");
    assert!(answer.error.is_none());
}

#[tokio::test]
async fn sse_endpoint_opens_an_event_stream() {
    let harness = http_harness(true, 100);
    let response = harness.app.clone().oneshot(get("/mcp")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
    assert!(content_type.starts_with("text/event-stream"));
    assert_eq!(harness.sessions.len(), 1);
}
