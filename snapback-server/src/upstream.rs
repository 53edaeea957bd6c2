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

//! Upstream analysis client.
//!
//! Resilience composition, outermost first: total deadline, then the retry
//! loop, with the circuit breaker sitting closest to the network call. The
//! network itself hides behind the `RemoteAnalyzer` contract so the policy
//! stack is testable without sockets.

use crate::auth::AuthResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use snapback_core::{
    AnalysisReport, CircuitBreaker, CircuitError, Issue, RetryPolicy, RiskLevel,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Risk labels the upstream service is allowed to return.
const UPSTREAM_RISK_LABELS: &[&str] = &["safe", "low", "medium", "high", "critical"];

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("circuit breaker is open")]
    CircuitOpen,
    #[error("upstream request timed out")]
    DeadlineExceeded,
    #[error("upstream returned status {status}")]
    Status { status: u16 },
    #[error("upstream response failed validation: {0}")]
    Schema(String),
    #[error("upstream transport error: {0}")]
    Transport(String),
    #[error("request cancelled")]
    Cancelled,
}

impl UpstreamError {
    /// Schema failures and client errors are final; everything else is
    /// worth another attempt inside the deadline.
    pub fn is_retryable(&self) -> bool {
        match self {
            UpstreamError::Transport(_) => true,
            UpstreamError::Status { status } => *status >= 500,
            UpstreamError::Schema(_)
            | UpstreamError::CircuitOpen
            | UpstreamError::DeadlineExceeded
            | UpstreamError::Cancelled => false,
        }
    }
}

/// Raw verdict shape returned by the upstream API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamVerdict {
    #[serde(rename = "riskLevel")]
    pub risk_level: String,
    pub confidence: f64,
    #[serde(default)]
    pub issues: Vec<Issue>,
    #[serde(rename = "analysisTimeMs", default)]
    pub analysis_ms: u64,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

/// Shape validation applied before mapping. A failure here is treated as a
/// non-retryable error.
pub fn validate_verdict(verdict: &UpstreamVerdict) -> Result<(), UpstreamError> {
    if !UPSTREAM_RISK_LABELS.contains(&verdict.risk_level.as_str()) {
        return Err(UpstreamError::Schema(format!(
            "unknown riskLevel {:?}",
            verdict.risk_level
        )));
    }
    if !verdict.confidence.is_finite() {
        return Err(UpstreamError::Schema("confidence is not a number".into()));
    }
    Ok(())
}

/// The remote analysis contract; the HTTP implementation is below, tests
/// substitute their own.
#[async_trait]
pub trait RemoteAnalyzer: Send + Sync {
    async fn analyze(
        &self,
        code: &str,
        auth: &AuthResult,
    ) -> Result<UpstreamVerdict, UpstreamError>;
}

/// Reqwest-backed implementation of the upstream contract.
pub struct HttpRemoteAnalyzer {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpRemoteAnalyzer {
    pub fn new(base_url: String, api_key: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }
}

#[async_trait]
impl RemoteAnalyzer for HttpRemoteAnalyzer {
    async fn analyze(
        &self,
        code: &str,
        auth: &AuthResult,
    ) -> Result<UpstreamVerdict, UpstreamError> {
        let url = format!("{}/v1/analyze", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "code": code,
                "userId": auth.user_id,
                "tier": auth.tier,
            }))
            .send()
            .await
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::Status {
                status: status.as_u16(),
            });
        }

        let verdict: UpstreamVerdict = response
            .json()
            .await
            .map_err(|e| UpstreamError::Schema(e.to_string()))?;
        validate_verdict(&verdict)?;
        Ok(verdict)
    }
}

pub struct UpstreamClient {
    remote: Arc<dyn RemoteAnalyzer>,
    retry: RetryPolicy,
    breaker: Arc<CircuitBreaker>,
    total_deadline: Duration,
}

impl UpstreamClient {
    pub fn new(
        remote: Arc<dyn RemoteAnalyzer>,
        retry: RetryPolicy,
        breaker: Arc<CircuitBreaker>,
        total_deadline: Duration,
    ) -> Self {
        Self {
            remote,
            retry,
            breaker,
            total_deadline,
        }
    }

    pub fn breaker(&self) -> Arc<CircuitBreaker> {
        self.breaker.clone()
    }

    /// One logical call: deadline over retry over breaker over the wire.
    pub async fn analyze(
        &self,
        code: &str,
        auth: &AuthResult,
        cancel: &CancellationToken,
    ) -> Result<AnalysisReport, UpstreamError> {
        let attempt_loop = self.call_with_retry(code, auth);
        tokio::select! {
            _ = cancel.cancelled() => Err(UpstreamError::Cancelled),
            outcome = tokio::time::timeout(self.total_deadline, attempt_loop) => {
                match outcome {
                    Ok(result) => result.map(map_verdict),
                    Err(_) => Err(UpstreamError::DeadlineExceeded),
                }
            }
        }
    }

    async fn call_with_retry(
        &self,
        code: &str,
        auth: &AuthResult,
    ) -> Result<UpstreamVerdict, UpstreamError> {
        let mut last_error = UpstreamError::Transport("no attempts made".into());
        for attempt in 0..self.retry.max_attempts {
            if attempt > 0 {
                tokio::time::sleep(self.retry.delay_for_attempt(attempt - 1)).await;
            }
            let result = self
                .breaker
                .call(|| self.remote.analyze(code, auth))
                .await;
            match result {
                Ok(verdict) => return Ok(verdict),
                Err(CircuitError::Open { .. }) => return Err(UpstreamError::CircuitOpen),
                Err(CircuitError::Inner(error)) => {
                    if !error.is_retryable() {
                        return Err(error);
                    }
                    tracing::debug!(attempt, error = %error, "upstream attempt failed");
                    last_error = error;
                }
            }
        }
        Err(last_error)
    }
}

/// Map a validated upstream verdict onto the local report shape.
/// `upgradePrompt` is always false on upstream results.
fn map_verdict(verdict: UpstreamVerdict) -> AnalysisReport {
    AnalysisReport {
        risk_level: RiskLevel::from_upstream(&verdict.risk_level),
        confidence: verdict.confidence,
        issues: verdict.issues,
        analysis_ms: verdict.analysis_ms,
        upgrade_prompt: false,
        recommendations: verdict.recommendations,
    }
    .clamp_confidence()
}

#[cfg(test)]
mod tests {
    use super::*;
    use snapback_core::CircuitConfig;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ScriptedRemote {
        calls: AtomicU32,
        fail_first: u32,
    }

    #[async_trait]
    impl RemoteAnalyzer for ScriptedRemote {
        async fn analyze(
            &self,
            _code: &str,
            _auth: &AuthResult,
        ) -> Result<UpstreamVerdict, UpstreamError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                return Err(UpstreamError::Transport("flaky".into()));
            }
            Ok(UpstreamVerdict {
                risk_level: "critical".into(),
                confidence: 1.4,
                issues: vec![],
                analysis_ms: 12,
                recommendations: vec!["patch it".into()],
            })
        }
    }

    fn client(remote: Arc<dyn RemoteAnalyzer>, deadline: Duration) -> UpstreamClient {
        let mut retry = RetryPolicy::upstream();
        retry.initial_delay = Duration::from_millis(1);
        UpstreamClient::new(
            remote,
            retry,
            Arc::new(CircuitBreaker::new(CircuitConfig::default())),
            deadline,
        )
    }

    fn pro_auth() -> AuthResult {
        AuthResult {
            valid: true,
            tier: snapback_core::Tier::Pro,
            permissions: vec![],
            user_id: Some("u1".into()),
            org_id: None,
            error: None,
        }
    }

    #[tokio::test]
    async fn retries_transient_failures_then_succeeds() {
        let remote = Arc::new(ScriptedRemote {
            calls: AtomicU32::new(0),
            fail_first: 2,
        });
        let client = client(remote.clone(), Duration::from_secs(5));
        let cancel = CancellationToken::new();

        let report = client.analyze("code", &pro_auth(), &cancel).await.unwrap();
        assert_eq!(remote.calls.load(Ordering::SeqCst), 3);
        // critical maps to high, confidence clamps to 1.0
        assert_eq!(report.risk_level, RiskLevel::High);
        assert_eq!(report.confidence, 1.0);
        assert!(!report.upgrade_prompt);
    }

    #[tokio::test]
    async fn schema_failures_are_not_retried() {
        struct BadShape(AtomicU32);
        #[async_trait]
        impl RemoteAnalyzer for BadShape {
            async fn analyze(
                &self,
                _code: &str,
                _auth: &AuthResult,
            ) -> Result<UpstreamVerdict, UpstreamError> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Err(UpstreamError::Schema("unknown riskLevel".into()))
            }
        }
        let remote = Arc::new(BadShape(AtomicU32::new(0)));
        let client = client(remote.clone(), Duration::from_secs(5));
        let cancel = CancellationToken::new();

        let err = client
            .analyze("code", &pro_auth(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::Schema(_)));
        assert_eq!(remote.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn deadline_caps_the_whole_attempt_loop() {
        struct Slow;
        #[async_trait]
        impl RemoteAnalyzer for Slow {
            async fn analyze(
                &self,
                _code: &str,
                _auth: &AuthResult,
            ) -> Result<UpstreamVerdict, UpstreamError> {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Err(UpstreamError::Transport("never".into()))
            }
        }
        let client = client(Arc::new(Slow), Duration::from_millis(20));
        let cancel = CancellationToken::new();
        let err = client
            .analyze("code", &pro_auth(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn open_breaker_short_circuits() {
        let remote = Arc::new(ScriptedRemote {
            calls: AtomicU32::new(0),
            fail_first: u32::MAX,
        });
        let breaker = Arc::new(CircuitBreaker::new(CircuitConfig {
            failure_threshold: 3,
            success_threshold: 2,
            recovery_window: Duration::from_secs(30),
        }));
        let mut retry = RetryPolicy::upstream();
        retry.initial_delay = Duration::from_millis(1);
        let client = UpstreamClient::new(
            remote.clone(),
            retry,
            breaker,
            Duration::from_secs(5),
        );
        let cancel = CancellationToken::new();

        // First logical call burns three attempts, opening the breaker.
        let err = client
            .analyze("code", &pro_auth(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::Transport(_)));
        assert_eq!(remote.calls.load(Ordering::SeqCst), 3);

        // Second logical call never reaches the wire.
        let err = client
            .analyze("code", &pro_auth(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::CircuitOpen));
        assert_eq!(remote.calls.load(Ordering::SeqCst), 3);
        assert_eq!(err.to_string(), "circuit breaker is open");
    }

    #[tokio::test]
    async fn cancellation_unwinds_promptly() {
        struct Slow;
        #[async_trait]
        impl RemoteAnalyzer for Slow {
            async fn analyze(
                &self,
                _code: &str,
                _auth: &AuthResult,
            ) -> Result<UpstreamVerdict, UpstreamError> {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Err(UpstreamError::Transport("never".into()))
            }
        }
        let client = client(Arc::new(Slow), Duration::from_secs(30));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = client
            .analyze("code", &pro_auth(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::Cancelled));
    }

    #[test]
    fn verdict_validation_checks_enum_and_range() {
        let mut verdict = UpstreamVerdict {
            risk_level: "medium".into(),
            confidence: 0.5,
            issues: vec![],
            analysis_ms: 1,
            recommendations: vec![],
        };
        assert!(validate_verdict(&verdict).is_ok());

        verdict.risk_level = "catastrophic".into();
        assert!(validate_verdict(&verdict).is_err());

        verdict.risk_level = "low".into();
        verdict.confidence = f64::NAN;
        assert!(validate_verdict(&verdict).is_err());
    }
}
