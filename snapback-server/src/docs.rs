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

//! Documentation proxy: cached fan-out to the external documentation
//! service. Search results and document bodies live in separate TTL caches
//! (search ~1 h, docs ~24 h by default). Cache trouble never fails a call;
//! at worst the remote is asked again.

use async_trait::async_trait;
use moka::sync::Cache;
use serde_json::Value;
use snapback_core::RetryPolicy;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_SEARCH_TTL_SECS: u64 = 3_600;
const DEFAULT_DOCS_TTL_SECS: u64 = 86_400;
const CACHE_CAPACITY: u64 = 10_000;

#[derive(Debug, Error)]
pub enum DocsError {
    #[error("documentation service returned status {0}")]
    Status(u16),
    #[error("documentation service transport error: {0}")]
    Transport(String),
    #[error("documentation service is not configured")]
    NotConfigured,
}

impl DocsError {
    /// 401/403/404/429 abort immediately; 5xx and transport errors retry.
    fn is_fatal(&self) -> bool {
        match self {
            DocsError::Status(status) => matches!(status, 401 | 403 | 404 | 429),
            DocsError::Transport(_) => false,
            DocsError::NotConfigured => true,
        }
    }
}

/// The remote documentation service contract.
#[async_trait]
pub trait DocsRemote: Send + Sync {
    async fn resolve_library(&self, name: &str) -> Result<Value, DocsError>;
    async fn fetch_docs(
        &self,
        library_id: &str,
        topic: Option<&str>,
        tokens: Option<u32>,
    ) -> Result<Value, DocsError>;
}

/// Reqwest implementation of the documentation service contract.
pub struct HttpDocsRemote {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpDocsRemote {
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    async fn get_json(&self, url: String) -> Result<Value, DocsError> {
        let mut request = self.http.get(&url);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| DocsError::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(DocsError::Status(status.as_u16()));
        }
        response
            .json()
            .await
            .map_err(|e| DocsError::Transport(e.to_string()))
    }
}

#[async_trait]
impl DocsRemote for HttpDocsRemote {
    async fn resolve_library(&self, name: &str) -> Result<Value, DocsError> {
        let url = format!(
            "{}/v1/search?query={}",
            self.base_url,
            encode_component(name)
        );
        self.get_json(url).await
    }

    async fn fetch_docs(
        &self,
        library_id: &str,
        topic: Option<&str>,
        tokens: Option<u32>,
    ) -> Result<Value, DocsError> {
        let mut url = format!("{}/v1/docs/{}", self.base_url, encode_component(library_id));
        let mut sep = '?';
        if let Some(topic) = topic {
            url.push(sep);
            url.push_str(&format!("topic={}", encode_component(topic)));
            sep = '&';
        }
        if let Some(tokens) = tokens {
            url.push(sep);
            url.push_str(&format!("tokens={tokens}"));
        }
        self.get_json(url).await
    }
}

/// TTLs per query class. Negative or otherwise invalid configured values
/// fall back to the defaults.
#[derive(Debug, Clone)]
pub struct DocsCacheConfig {
    pub search_ttl: Duration,
    pub docs_ttl: Duration,
}

impl Default for DocsCacheConfig {
    fn default() -> Self {
        Self {
            search_ttl: Duration::from_secs(DEFAULT_SEARCH_TTL_SECS),
            docs_ttl: Duration::from_secs(DEFAULT_DOCS_TTL_SECS),
        }
    }
}

impl DocsCacheConfig {
    pub fn from_secs(search_ttl_secs: i64, docs_ttl_secs: i64) -> Self {
        Self {
            search_ttl: sanitize_ttl(search_ttl_secs, DEFAULT_SEARCH_TTL_SECS),
            docs_ttl: sanitize_ttl(docs_ttl_secs, DEFAULT_DOCS_TTL_SECS),
        }
    }
}

fn sanitize_ttl(secs: i64, default_secs: u64) -> Duration {
    if secs > 0 {
        Duration::from_secs(secs as u64)
    } else {
        Duration::from_secs(default_secs)
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct DocsProxyStats {
    pub hits: u64,
    pub misses: u64,
    pub remote_calls: u64,
    pub search_entries: u64,
    pub docs_entries: u64,
}

pub struct DocsProxy {
    remote: Arc<dyn DocsRemote>,
    search_cache: Cache<String, Arc<Value>>,
    docs_cache: Cache<String, Arc<Value>>,
    retry: RetryPolicy,
    hits: AtomicU64,
    misses: AtomicU64,
    remote_calls: AtomicU64,
}

impl DocsProxy {
    pub fn new(remote: Arc<dyn DocsRemote>, cache_config: DocsCacheConfig) -> Self {
        Self {
            remote,
            search_cache: Cache::builder()
                .max_capacity(CACHE_CAPACITY)
                .time_to_live(cache_config.search_ttl)
                .build(),
            docs_cache: Cache::builder()
                .max_capacity(CACHE_CAPACITY)
                .time_to_live(cache_config.docs_ttl)
                .build(),
            retry: RetryPolicy::docs(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            remote_calls: AtomicU64::new(0),
        }
    }

    pub async fn resolve_library_id(&self, name: &str) -> Result<Arc<Value>, DocsError> {
        let key = format!("search:{}", encode_component(name));
        if let Some(cached) = self.search_cache.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(cached);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let value = self
            .fetch_with_retry(|| self.remote.resolve_library(name))
            .await?;
        let value = Arc::new(value);
        self.search_cache.insert(key, value.clone());
        Ok(value)
    }

    pub async fn get_library_docs(
        &self,
        library_id: &str,
        topic: Option<&str>,
        tokens: Option<u32>,
    ) -> Result<Arc<Value>, DocsError> {
        let mut key = format!("docs:{}", encode_component(library_id));
        if let Some(topic) = topic {
            key.push(':');
            key.push_str(&encode_component(topic));
        }
        if let Some(tokens) = tokens {
            key.push(':');
            key.push_str(&tokens.to_string());
        }
        if let Some(cached) = self.docs_cache.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(cached);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let value = self
            .fetch_with_retry(|| self.remote.fetch_docs(library_id, topic, tokens))
            .await?;
        let value = Arc::new(value);
        self.docs_cache.insert(key, value.clone());
        Ok(value)
    }

    async fn fetch_with_retry<F, Fut>(&self, mut call: F) -> Result<Value, DocsError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<Value, DocsError>>,
    {
        let mut last_error = DocsError::Transport("no attempts made".into());
        for attempt in 0..self.retry.max_attempts {
            if attempt > 0 {
                tokio::time::sleep(self.retry.delay_for_attempt(attempt - 1)).await;
            }
            self.remote_calls.fetch_add(1, Ordering::Relaxed);
            match call().await {
                Ok(value) => return Ok(value),
                Err(error) if error.is_fatal() => return Err(error),
                Err(error) => {
                    tracing::debug!(attempt, error = %error, "documentation fetch failed");
                    last_error = error;
                }
            }
        }
        Err(last_error)
    }

    pub fn stats(&self) -> DocsProxyStats {
        DocsProxyStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            remote_calls: self.remote_calls.load(Ordering::Relaxed),
            search_entries: self.search_cache.entry_count(),
            docs_entries: self.docs_cache.entry_count(),
        }
    }
}

/// Percent-encode a cache-key / query component.
pub fn encode_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}
