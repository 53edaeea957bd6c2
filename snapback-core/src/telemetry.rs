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

//! Telemetry event contract. The sink is fire-and-forget: recording never
//! blocks a request path, and overflow drops events rather than applying
//! back-pressure.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TelemetryEvent {
    PathValidationFailed {
        reason: &'static str,
        sample: String,
    },
    PerfBudgetExceeded {
        operation: String,
        elapsed_ms: u64,
        budget_ms: u64,
    },
    RateLimited {
        client: String,
    },
    UpstreamFallback {
        reason: String,
    },
}

pub trait TelemetrySink: Send + Sync {
    /// Record an event. Must never block.
    fn record(&self, event: TelemetryEvent);
}

/// Sink that discards everything. Useful in tests and stripped-down setups.
#[derive(Debug, Default)]
pub struct NoopSink;

impl TelemetrySink for NoopSink {
    fn record(&self, _event: TelemetryEvent) {}
}

/// Bounded-channel sink. `try_send` keeps producers non-blocking; dropped
/// events are only counted.
pub struct ChannelSink {
    tx: mpsc::Sender<TelemetryEvent>,
    dropped: AtomicU64,
}

impl ChannelSink {
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<TelemetryEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx,
                dropped: AtomicU64::new(0),
            },
            rx,
        )
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl TelemetrySink for ChannelSink {
    fn record(&self, event: TelemetryEvent) {
        if self.tx.try_send(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Drain task that logs events. Violations are warnings; the rest is debug.
pub fn spawn_drain(mut rx: mpsc::Receiver<TelemetryEvent>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match &event {
                TelemetryEvent::PathValidationFailed { reason, sample } => {
                    tracing::warn!(reason, sample = %sample, "path_validation_failed");
                }
                TelemetryEvent::PerfBudgetExceeded {
                    operation,
                    elapsed_ms,
                    budget_ms,
                } => {
                    tracing::warn!(
                        operation = %operation,
                        elapsed_ms,
                        budget_ms,
                        "perf_budget_exceeded"
                    );
                }
                TelemetryEvent::RateLimited { client } => {
                    tracing::debug!(client = %client, "rate_limited");
                }
                TelemetryEvent::UpstreamFallback { reason } => {
                    tracing::debug!(reason = %reason, "upstream_fallback");
                }
            }
        }
    })
}
