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

pub mod auth;
pub mod config;
pub mod docs;
pub mod mcp;
pub mod perf;
pub mod routing;
pub mod sanitize;
pub mod tools;
pub mod upstream;
pub mod validation;

use crate::auth::{AuthResolver, StaticKeyVerifier};
use crate::config::{ConfigError, CoprocessorConfig};
use crate::docs::{DocsCacheConfig, DocsProxy, HttpDocsRemote};
use crate::mcp::handlers::Dispatcher;
use crate::mcp::http::{build_router, HttpState};
use crate::mcp::session::SessionRegistry;
use crate::mcp::transport::run_stdio;
use crate::perf::PerfBudgets;
use crate::routing::AnalysisRouter;
use crate::sanitize::ErrorSanitizer;
use crate::tools::native::ToolServices;
use crate::tools::registry::ToolCatalog;
use crate::upstream::{HttpRemoteAnalyzer, UpstreamClient};
use anyhow::Context;
use snapback_analysis::{AdvisoryDb, LocalAnalyzer};
use snapback_core::telemetry::spawn_drain;
use snapback_core::{
    ChannelSink, CircuitBreaker, CircuitConfig, FeatureFlags, RetryPolicy, TelemetrySink,
};
use snapback_storage::SnapshotStore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("transport initialization failed: {0}")]
    TransportInit(String),
    #[error(transparent)]
    Runtime(#[from] anyhow::Error),
}

impl ServerError {
    /// Process exit code: 1 for fatal configuration, 2 for transport
    /// initialization failure.
    pub fn exit_code(&self) -> u8 {
        match self {
            ServerError::Config(_) => 1,
            ServerError::TransportInit(_) => 2,
            ServerError::Runtime(_) => 1,
        }
    }
}

pub async fn run_server(config: CoprocessorConfig, stdio: bool) -> Result<(), ServerError> {
    // Logs go to stderr; in stdio mode stdout belongs to the protocol.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "snapback_server=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("starting snapback coprocessor");
    config.validate()?;

    let (sink, events) = ChannelSink::bounded(1_024);
    let telemetry: Arc<dyn TelemetrySink> = Arc::new(sink);
    let _drain = spawn_drain(events);

    let workspace_root = config.workspace_root();
    let store = Arc::new(
        SnapshotStore::open(&workspace_root)
            .with_context(|| format!("opening snapshot store under {}", workspace_root.display()))?,
    );
    tracing::info!(
        workspace = %workspace_root.display(),
        snapshots = store.count(),
        "snapshot store ready"
    );

    let advisories = Arc::new(match &config.workspace.advisory_db {
        // Explicitly configured but unreadable: fatal.
        Some(path) => AdvisoryDb::load(path)
            .with_context(|| format!("loading advisory database {}", path.display()))?,
        None => AdvisoryDb::empty(),
    });

    let flags = Arc::new(FeatureFlags::new(flags_from_env()));
    spawn_flag_refresher(flags.clone());

    let mut breaker: Option<Arc<CircuitBreaker>> = None;
    let upstream_client = if let Some(base_url) = &config.upstream.base_url {
        let circuit = Arc::new(CircuitBreaker::new(CircuitConfig {
            failure_threshold: config.upstream.failure_threshold,
            success_threshold: config.upstream.success_threshold,
            recovery_window: Duration::from_secs(config.upstream.recovery_secs),
        }));
        breaker = Some(circuit.clone());
        let remote = Arc::new(HttpRemoteAnalyzer::new(
            base_url.clone(),
            config.upstream.api_key.clone().unwrap_or_default(),
        ));
        tracing::info!(base_url = %base_url, "upstream analysis enabled");
        Some(Arc::new(UpstreamClient::new(
            remote,
            RetryPolicy::upstream(),
            circuit,
            Duration::from_millis(config.upstream.timeout_ms),
        )))
    } else {
        tracing::info!("no upstream configured, analysis is local-only");
        None
    };

    let docs = config.docs.base_url.as_ref().map(|base_url| {
        tracing::info!(base_url = %base_url, "documentation proxy enabled");
        Arc::new(DocsProxy::new(
            Arc::new(HttpDocsRemote::new(
                base_url.clone(),
                config.docs.api_key.clone(),
            )),
            DocsCacheConfig::from_secs(config.docs.search_ttl_secs, config.docs.docs_ttl_secs),
        ))
    });

    let router = AnalysisRouter::new(
        LocalAnalyzer::with_baseline(advisories.clone()),
        upstream_client,
        flags,
        telemetry.clone(),
    );

    let catalog = ToolCatalog::builtin().context("building tool catalog")?;
    let services = ToolServices {
        catalog,
        router,
        store: store.clone(),
        docs: docs.clone(),
        advisories,
        external: Vec::new(),
        workspace_root,
        telemetry: telemetry.clone(),
    };

    let auth = AuthResolver::new(
        Arc::new(StaticKeyVerifier::from_entries(&config.auth.api_keys)),
        config.development,
    );
    let dispatcher = Arc::new(Dispatcher::new(
        services,
        auth,
        ErrorSanitizer::new(config.development),
        PerfBudgets::defaults().with_overrides(&config.perf_budgets),
    ));
    let sessions = Arc::new(SessionRegistry::new());

    if stdio {
        tracing::info!("serving MCP over stdio");
        run_stdio(
            dispatcher,
            sessions,
            std::env::var("SNAPBACK_CLIENT_KEY").ok(),
        )
        .await
        .context("stdio transport")?;
        return Ok(());
    }

    let state = HttpState {
        dispatcher,
        sessions: sessions.clone(),
        limiter: Arc::new(auth::rate_limit::RateLimiter::new(
            auth::rate_limit::RateLimitConfig {
                max_requests: config.server.rate_limit_max_requests,
                window: Duration::from_millis(config.server.rate_limit_window_ms),
                enabled: true,
                max_clients: 100_000,
            },
        )),
        telemetry,
        store,
        docs,
        breaker,
        development: config.development,
        started: Instant::now(),
    };
    let app = build_router(state, &config.server.cors_origins, config.server.max_body_bytes);

    let addr = config.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::TransportInit(format!("bind {addr}: {e}")))?;
    tracing::info!("listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(sessions))
        .await
        .context("http server")?;

    tracing::info!("clean shutdown");
    Ok(())
}

async fn shutdown_signal(sessions: Arc<SessionRegistry>) {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received, draining sessions");
    sessions.shutdown_all();
}

/// Flags come from `SNAPBACK_FLAGS` as `name=true,other=false` and are
/// re-read on a timer, swapping the whole snapshot at once.
fn flags_from_env() -> HashMap<String, bool> {
    let Ok(raw) = std::env::var("SNAPBACK_FLAGS") else {
        return HashMap::new();
    };
    parse_flags(&raw)
}

fn parse_flags(raw: &str) -> HashMap<String, bool> {
    raw.split(',')
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some((name.to_string(), value.trim().eq_ignore_ascii_case("true")))
        })
        .collect()
}

fn spawn_flag_refresher(flags: Arc<FeatureFlags>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(30));
        loop {
            interval.tick().await;
            flags.replace(flags_from_env());
        }
    });
}
