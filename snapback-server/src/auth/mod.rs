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

//! Auth resolver: verifies caller credentials through an external verifier
//! contract, maps plan metadata onto a tier, and caches results in a
//! bounded TTL cache keyed by a hash of the raw key.
//!
//! `authenticate` never errors. A verifier outage degrades to an invalid
//! free-tier principal with a stable error string.

pub mod rate_limit;

use async_trait::async_trait;
use moka::sync::Cache;
use serde::Serialize;
use sha2::{Digest, Sha256};
use snapback_core::Tier;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Auth cache bounds: at most 1,000 entries for at most 60 seconds.
const AUTH_CACHE_CAPACITY: u64 = 1_000;
const AUTH_CACHE_TTL: Duration = Duration::from_secs(60);

/// Error string surfaced when the verifier cannot be reached.
pub const VERIFIER_UNAVAILABLE: &str = "authentication service unavailable";

/// Tools requiring an explicit permission. Tools absent from this table are
/// open to any valid principal.
const TOOL_PERMISSIONS: &[(&str, &str)] = &[
    ("snapback.create_snapshot", "snapshots:write"),
    ("snapback.restore_snapshot", "snapshots:write"),
    ("snapback.list_snapshots", "snapshots:read"),
];

/// Resolved identity of a caller.
#[derive(Debug, Clone, Serialize)]
pub struct AuthResult {
    pub valid: bool,
    pub tier: Tier,
    pub permissions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuthResult {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            tier: Tier::Free,
            permissions: Vec::new(),
            user_id: None,
            org_id: None,
            error: Some(reason.into()),
        }
    }

    /// Anonymous development principal (empty key in development mode).
    fn anonymous() -> Self {
        Self {
            valid: true,
            tier: Tier::Free,
            permissions: Tier::Free
                .default_permissions()
                .iter()
                .map(|s| s.to_string())
                .collect(),
            user_id: None,
            org_id: None,
            error: None,
        }
    }

    fn from_principal(principal: VerifiedPrincipal) -> Self {
        let tier = Tier::from_plan(&principal.plan);
        let mut permissions: Vec<String> = tier
            .default_permissions()
            .iter()
            .map(|s| s.to_string())
            .collect();
        for extra in principal.permissions {
            if !permissions.contains(&extra) {
                permissions.push(extra);
            }
        }
        Self {
            valid: true,
            tier,
            permissions,
            user_id: Some(principal.user_id),
            org_id: principal.org_id,
            error: None,
        }
    }
}

/// What the external identity service asserts about a key.
#[derive(Debug, Clone)]
pub struct VerifiedPrincipal {
    pub user_id: String,
    pub org_id: Option<String>,
    pub plan: String,
    pub permissions: Vec<String>,
}

#[derive(Debug, Error)]
pub enum VerifyError {
    /// The service answered and the key is bad.
    #[error("key rejected: {0}")]
    Rejected(String),
    /// The service could not be reached or answered garbage.
    #[error("verifier unavailable: {0}")]
    Unavailable(String),
}

/// The verification contract. The concrete identity service lives outside
/// this process.
#[async_trait]
pub trait KeyVerifier: Send + Sync {
    async fn verify(&self, raw_key: &str) -> Result<VerifiedPrincipal, VerifyError>;
}

/// Verifier backed by a static `key:plan` table from config.
pub struct StaticKeyVerifier {
    keys: HashMap<String, VerifiedPrincipal>,
}

impl StaticKeyVerifier {
    /// Entries use the config format `key:plan`, e.g. `s3cr3t...:pro`.
    pub fn from_entries(entries: &[String]) -> Self {
        let mut keys = HashMap::new();
        for (index, entry) in entries.iter().enumerate() {
            let Some((key, plan)) = entry.rsplit_once(':') else {
                tracing::warn!(index, "ignoring malformed api key entry (want key:plan)");
                continue;
            };
            keys.insert(
                key.to_string(),
                VerifiedPrincipal {
                    user_id: format!("static-{index}"),
                    org_id: None,
                    plan: plan.to_string(),
                    permissions: Vec::new(),
                },
            );
        }
        Self { keys }
    }
}

#[async_trait]
impl KeyVerifier for StaticKeyVerifier {
    async fn verify(&self, raw_key: &str) -> Result<VerifiedPrincipal, VerifyError> {
        self.keys
            .get(raw_key)
            .cloned()
            .ok_or_else(|| VerifyError::Rejected("unknown api key".to_string()))
    }
}

pub struct AuthResolver {
    verifier: Arc<dyn KeyVerifier>,
    cache: Cache<String, AuthResult>,
    development: bool,
    verifier_calls: AtomicU64,
}

impl AuthResolver {
    pub fn new(verifier: Arc<dyn KeyVerifier>, development: bool) -> Self {
        let cache = Cache::builder()
            .max_capacity(AUTH_CACHE_CAPACITY)
            .time_to_live(AUTH_CACHE_TTL)
            .build();
        Self {
            verifier,
            cache,
            development,
            verifier_calls: AtomicU64::new(0),
        }
    }

    /// Resolve a raw key to an identity. Never errors.
    pub async fn authenticate(&self, raw_key: Option<&str>) -> AuthResult {
        let raw_key = raw_key.unwrap_or("").trim();
        if raw_key.is_empty() {
            if self.development {
                return AuthResult::anonymous();
            }
            return AuthResult::invalid("missing credential");
        }

        // The cache never holds raw keys; entries are keyed by digest.
        let cache_key = hex::encode(Sha256::digest(raw_key.as_bytes()));
        if let Some(cached) = self.cache.get(&cache_key) {
            return cached;
        }

        self.verifier_calls.fetch_add(1, Ordering::Relaxed);
        let result = match self.verifier.verify(raw_key).await {
            Ok(principal) => AuthResult::from_principal(principal),
            Err(VerifyError::Rejected(reason)) => AuthResult::invalid(reason),
            Err(VerifyError::Unavailable(reason)) => {
                tracing::warn!(reason = %reason, "key verifier unavailable");
                // Outage results are not cached: the next call should probe
                // the verifier again.
                return AuthResult::invalid(VERIFIER_UNAVAILABLE);
            }
        };
        self.cache.insert(cache_key, result.clone());
        result
    }

    /// Permission gate. Tools without a table entry are open to any valid
    /// principal; admins pass every gate.
    pub fn has_tool_access(&self, auth: &AuthResult, tool: &str) -> bool {
        if !auth.valid {
            return false;
        }
        let Some((_, required)) = TOOL_PERMISSIONS.iter().find(|(name, _)| *name == tool)
        else {
            return true;
        };
        auth.tier == Tier::Admin || auth.permissions.iter().any(|p| p == required)
    }

    /// Number of calls that reached the verifier (cache misses).
    pub fn verifier_call_count(&self) -> u64 {
        self.verifier_calls.load(Ordering::Relaxed)
    }
}

/// Key format rules, enforced at startup. Development/test allows an empty
/// key; production keys must be at least 32 characters of `[A-Za-z0-9_-]`.
pub fn validate_key_format(key: &str, development: bool) -> Result<(), String> {
    if key.is_empty() {
        if development {
            return Ok(());
        }
        return Err("api key must be set in production".to_string());
    }
    if !development && key.len() < 32 {
        return Err(format!(
            "api key too short: {} characters (minimum 32)",
            key.len()
        ));
    }
    if !key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err("api key contains characters outside [A-Za-z0-9_-]".to_string());
    }
    Ok(())
}
