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

//! HTTP+SSE transport.
//!
//! `GET /mcp` opens the long-lived event channel (the first event carries
//! the session id); `POST /mcp?sessionId=…` submits requests whose
//! responses flow back over the channel. `GET /health` and `GET /version`
//! serve operations. Security headers, CORS, body caps and the fixed-window
//! rate limit are applied as middleware.

use crate::auth::rate_limit::{extract_client_ip, RateLimitResult, RateLimiter};
use crate::docs::DocsProxy;
use crate::mcp::handlers::{Dispatcher, RequestContext};
use crate::mcp::protocol::{
    JsonRpcError, JsonRpcId, JsonRpcRequest, JsonRpcResponse, MCP_PROTOCOL_VERSION, SERVER_NAME,
};
use crate::mcp::session::{Session, SessionRegistry};
use axum::extract::{DefaultBodyLimit, Query, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::Stream;
use serde_json::json;
use snapback_core::{CircuitBreaker, TelemetryEvent, TelemetrySink};
use snapback_storage::SnapshotStore;
use std::collections::HashMap;
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

const SESSION_CHANNEL_CAPACITY: usize = 64;

#[derive(Clone)]
pub struct HttpState {
    pub dispatcher: Arc<Dispatcher>,
    pub sessions: Arc<SessionRegistry>,
    pub limiter: Arc<RateLimiter>,
    pub telemetry: Arc<dyn TelemetrySink>,
    pub store: Arc<SnapshotStore>,
    pub docs: Option<Arc<DocsProxy>>,
    pub breaker: Option<Arc<CircuitBreaker>>,
    pub development: bool,
    pub started: Instant,
}

/// Build the full HTTP application.
pub fn build_router(state: HttpState, cors_origins: &[String], max_body_bytes: usize) -> Router {
    let cors = cors_layer(cors_origins, state.development);
    Router::new()
        .route("/mcp", get(open_sse).post(post_mcp))
        .route("/health", get(health))
        .route("/version", get(version))
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit_mw))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(middleware::from_fn(security_headers_mw))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Exact-origin allow-list; wildcard only reaches here in development
/// (config validation enforces that).
fn cors_layer(origins: &[String], development: bool) -> CorsLayer {
    let methods = [Method::GET, Method::POST, Method::OPTIONS];
    if origins.iter().any(|o| o == "*") || (origins.is_empty() && development) {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(methods)
            .allow_headers(Any);
    }
    let list: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(list)
        .allow_methods(methods)
        .allow_headers(Any)
}

async fn security_headers_mw(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        "X-Content-Type-Options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    headers.insert(
        "X-XSS-Protection",
        HeaderValue::from_static("1; mode=block"),
    );
    headers.insert(
        "Strict-Transport-Security",
        HeaderValue::from_static("max-age=63072000; includeSubDomains"),
    );
    headers.insert(
        "Content-Security-Policy",
        HeaderValue::from_static("default-src 'none'"),
    );
    response
}

async fn rate_limit_mw(
    State(state): State<HttpState>,
    request: Request,
    next: Next,
) -> Response {
    let client = extract_client_ip(request.headers()).unwrap_or_else(|| "unknown".to_string());
    match state.limiter.check(&client) {
        RateLimitResult::Allowed { .. } => next.run(request).await,
        RateLimitResult::RateLimited { .. } => {
            state
                .telemetry
                .record(TelemetryEvent::RateLimited { client });
            (
                StatusCode::TOO_MANY_REQUESTS,
                [(header::RETRY_AFTER, state.limiter.window_secs().to_string())],
                Json(json!({ "error": "rate limit exceeded" })),
            )
                .into_response()
        }
    }
}

/// `Authorization: Bearer …` or `X-API-Key: …`.
fn extract_credential(headers: &HeaderMap) -> Option<String> {
    if let Some(authorization) = headers.get(header::AUTHORIZATION) {
        if let Ok(value) = authorization.to_str() {
            if let Some(token) = value.strip_prefix("Bearer ") {
                return Some(token.trim().to_string());
            }
        }
    }
    headers
        .get("X-API-Key")
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
}

/// Event channel stream. Dropping the stream (client disconnect) tears the
/// session down through the registry.
struct SessionStream {
    rx: mpsc::Receiver<JsonRpcResponse>,
    registry: Arc<SessionRegistry>,
    session_id: String,
    endpoint_sent: bool,
}

impl Stream for SessionStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if !this.endpoint_sent {
            this.endpoint_sent = true;
            let data = json!({
                "sessionId": this.session_id,
                "protocolVersion": MCP_PROTOCOL_VERSION,
                "serverName": SERVER_NAME,
                "serverVersion": env!("CARGO_PKG_VERSION"),
            });
            return Poll::Ready(Some(Ok(Event::default()
                .event("endpoint")
                .data(data.to_string()))));
        }
        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(response)) => {
                let data = serde_json::to_string(&response).unwrap_or_default();
                Poll::Ready(Some(Ok(Event::default().event("message").data(data))))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for SessionStream {
    fn drop(&mut self) {
        self.registry.remove(&self.session_id);
    }
}

async fn open_sse(
    State(state): State<HttpState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let session_id = uuid::Uuid::new_v4().to_string();
    let (tx, rx) = mpsc::channel(SESSION_CHANNEL_CAPACITY);
    let session = Session::new(session_id.clone(), tx);
    state.sessions.register(session);
    tracing::info!(session_id = %session_id, "SSE client connected");

    let stream = SessionStream {
        rx,
        registry: state.sessions.clone(),
        session_id,
        endpoint_sent: false,
    };
    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(30)))
}

async fn post_mcp(
    State(state): State<HttpState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.starts_with("application/json"))
        .unwrap_or(false);
    if !is_json {
        return error_response(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "content type must be application/json",
        );
    }

    let raw_key = extract_credential(&headers);
    if raw_key.is_none() && !state.development {
        return error_response(StatusCode::UNAUTHORIZED, "authentication required");
    }

    let Some(session_id) = query.get("sessionId") else {
        return error_response(StatusCode::BAD_REQUEST, "missing sessionId parameter");
    };
    let Some(session) = state.sessions.lookup(session_id) else {
        return error_response(StatusCode::NOT_FOUND, "unknown session");
    };

    match serde_json::from_str::<JsonRpcRequest>(&body) {
        Err(e) => {
            // The parse error is a response on the channel; the session
            // stays open.
            let response = JsonRpcResponse::error(
                JsonRpcId::Null,
                JsonRpcError::parse_error(format!("invalid JSON-RPC frame: {e}")),
            );
            tokio::spawn(async move {
                session.send(response).await;
            });
        }
        Ok(request) => {
            let dispatcher = state.dispatcher.clone();
            let ctx = RequestContext {
                raw_key,
                cancel: session.cancel.child_token(),
            };
            tokio::spawn(async move {
                if let Some(response) = dispatcher.handle_request(request, &ctx).await {
                    session.send(response).await;
                }
            });
        }
    }

    (StatusCode::ACCEPTED, Json(json!({ "accepted": true }))).into_response()
}

async fn health(State(state): State<HttpState>) -> Json<serde_json::Value> {
    let breaker_state = match &state.breaker {
        Some(breaker) => breaker.state_label().await,
        None => "not-configured",
    };
    Json(json!({
        "status": "ok",
        "server": SERVER_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "uptimeSecs": state.started.elapsed().as_secs(),
        "sessions": state.sessions.len(),
        "snapshots": state.store.count(),
        "upstreamCircuit": breaker_state,
        "docsCache": state.docs.as_ref().map(|docs| serde_json::to_value(docs.stats()).unwrap_or_default()),
    }))
}

async fn version() -> Json<serde_json::Value> {
    Json(json!({
        "name": SERVER_NAME,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}
