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

//! Performance wrapper: times named operations and warns when an operation
//! blows its declared budget. Budgets are operational thresholds, all in
//! one table, overridable from config.

use snapback_core::{TelemetryEvent, TelemetrySink};
use std::collections::HashMap;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct PerfBudgets {
    budgets_ms: HashMap<String, u64>,
}

impl PerfBudgets {
    /// The default per-operation budget table (milliseconds).
    pub fn defaults() -> Self {
        let budgets_ms = [
            ("analyze_risk", 2_000),
            ("check_dependencies", 500),
            ("create_snapshot", 1_500),
            ("list_snapshots", 250),
            ("restore_snapshot", 3_000),
            ("resolve_library_id", 5_000),
            ("get_library_docs", 8_000),
            ("authenticate", 500),
        ]
        .into_iter()
        .map(|(name, ms)| (name.to_string(), ms))
        .collect();
        Self { budgets_ms }
    }

    pub fn with_overrides(mut self, overrides: &HashMap<String, u64>) -> Self {
        for (name, ms) in overrides {
            self.budgets_ms.insert(name.clone(), *ms);
        }
        self
    }

    pub fn budget_for(&self, operation: &str) -> Option<u64> {
        self.budgets_ms.get(operation).copied()
    }
}

/// Run `fut`, log one completion line, and flag budget breaches.
pub async fn measured<T, F>(
    operation: &str,
    budgets: &PerfBudgets,
    telemetry: &dyn TelemetrySink,
    fut: F,
) -> T
where
    F: std::future::Future<Output = T>,
{
    let started = Instant::now();
    let out = fut.await;
    let elapsed_ms = started.elapsed().as_millis() as u64;
    tracing::info!(operation, elapsed_ms, "operation completed");
    if let Some(budget_ms) = budgets.budget_for(operation) {
        if elapsed_ms > budget_ms {
            tracing::warn!(operation, elapsed_ms, budget_ms, "operation exceeded budget");
            telemetry.record(TelemetryEvent::PerfBudgetExceeded {
                operation: operation.to_string(),
                elapsed_ms,
                budget_ms,
            });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use snapback_core::ChannelSink;
    use std::time::Duration;

    #[test]
    fn overrides_replace_defaults() {
        let overrides = HashMap::from([("analyze_risk".to_string(), 50u64)]);
        let budgets = PerfBudgets::defaults().with_overrides(&overrides);
        assert_eq!(budgets.budget_for("analyze_risk"), Some(50));
        assert_eq!(budgets.budget_for("list_snapshots"), Some(250));
        assert_eq!(budgets.budget_for("unknown_op"), None);
    }

    #[tokio::test]
    async fn breach_emits_a_telemetry_event() {
        let overrides = HashMap::from([("slow_op".to_string(), 1u64)]);
        let budgets = PerfBudgets::defaults().with_overrides(&overrides);
        let (sink, mut rx) = ChannelSink::bounded(4);

        let value = measured("slow_op", &budgets, &sink, async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            42
        })
        .await;
        assert_eq!(value, 42);

        match rx.recv().await.unwrap() {
            TelemetryEvent::PerfBudgetExceeded { operation, .. } => {
                assert_eq!(operation, "slow_op");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn within_budget_emits_nothing() {
        let budgets = PerfBudgets::defaults();
        let (sink, mut rx) = ChannelSink::bounded(4);
        measured("list_snapshots", &budgets, &sink, async { () }).await;
        assert!(rx.try_recv().is_err());
    }
}
