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

//! Coprocessor configuration: TOML file, environment overrides, CLI on
//! top. `validate()` fails fast before anything binds or opens.

use crate::auth::validate_key_format;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid listen address {addr}: {reason}")]
    InvalidAddr { addr: String, reason: String },
    #[error("invalid upstream url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("invalid api key: {0}")]
    InvalidKey(String),
    #[error("workspace root {0} is not a readable directory")]
    BadWorkspaceRoot(PathBuf),
    #[error("wildcard CORS origin is only permitted in development mode")]
    WildcardCors,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CoprocessorConfig {
    #[serde(default)]
    pub server: HttpConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub docs: DocsConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    /// Per-operation performance budget overrides (milliseconds).
    #[serde(default)]
    pub perf_budgets: HashMap<String, u64>,
    /// Development mode relaxes key strictness and error redaction.
    #[serde(default)]
    pub development: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Exact-origin CORS allow-list; `*` only in development.
    #[serde(default)]
    pub cors_origins: Vec<String>,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    #[serde(default = "default_rate_limit_window_ms")]
    pub rate_limit_window_ms: u64,
    #[serde(default = "default_rate_limit_max_requests")]
    pub rate_limit_max_requests: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    #[serde(default = "default_upstream_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    #[serde(default = "default_recovery_secs")]
    pub recovery_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DocsConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    #[serde(default = "default_search_ttl_secs")]
    pub search_ttl_secs: i64,
    #[serde(default = "default_docs_ttl_secs")]
    pub docs_ttl_secs: i64,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuthConfig {
    /// Static API keys (format: "key:plan").
    #[serde(default)]
    pub api_keys: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WorkspaceConfig {
    /// Defaults to the process working directory.
    pub root: Option<PathBuf>,
    /// Offline vulnerability database fixture for dependency hygiene.
    pub advisory_db: Option<PathBuf>,
}

fn default_listen_addr() -> String {
    "127.0.0.1:47200".to_string()
}

fn default_max_body_bytes() -> usize {
    4 * 1024 * 1024
}

fn default_rate_limit_window_ms() -> u64 {
    60_000
}

fn default_rate_limit_max_requests() -> u32 {
    100
}

fn default_upstream_timeout_ms() -> u64 {
    10_000
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_success_threshold() -> u32 {
    2
}

fn default_recovery_secs() -> u64 {
    30
}

fn default_search_ttl_secs() -> i64 {
    3_600
}

fn default_docs_ttl_secs() -> i64 {
    86_400
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            cors_origins: Vec::new(),
            max_body_bytes: default_max_body_bytes(),
            rate_limit_window_ms: default_rate_limit_window_ms(),
            rate_limit_max_requests: default_rate_limit_max_requests(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            timeout_ms: default_upstream_timeout_ms(),
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            recovery_secs: default_recovery_secs(),
        }
    }
}

impl Default for DocsConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            search_ttl_secs: default_search_ttl_secs(),
            docs_ttl_secs: default_docs_ttl_secs(),
        }
    }
}

impl Default for CoprocessorConfig {
    fn default() -> Self {
        Self {
            server: HttpConfig::default(),
            upstream: UpstreamConfig::default(),
            docs: DocsConfig::default(),
            auth: AuthConfig::default(),
            workspace: WorkspaceConfig::default(),
            perf_budgets: HashMap::new(),
            development: false,
        }
    }
}

impl CoprocessorConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Environment overrides. Only variables that are actually set take
    /// effect.
    pub fn apply_env(&mut self) {
        if let Ok(addr) = std::env::var("SNAPBACK_HTTP_ADDR") {
            self.server.listen_addr = addr;
        }
        if let Ok(origins) = std::env::var("SNAPBACK_CORS_ORIGINS") {
            self.server.cors_origins = origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Ok(bytes) = std::env::var("SNAPBACK_MAX_BODY_BYTES") {
            if let Ok(value) = bytes.parse() {
                self.server.max_body_bytes = value;
            }
        }
        if let Ok(window) = std::env::var("SNAPBACK_RATE_LIMIT_WINDOW_MS") {
            if let Ok(value) = window.parse() {
                self.server.rate_limit_window_ms = value;
            }
        }
        if let Ok(max) = std::env::var("SNAPBACK_RATE_LIMIT_MAX") {
            if let Ok(value) = max.parse() {
                self.server.rate_limit_max_requests = value;
            }
        }
        if let Ok(url) = std::env::var("SNAPBACK_UPSTREAM_URL") {
            self.upstream.base_url = Some(url);
        }
        if let Ok(key) = std::env::var("SNAPBACK_UPSTREAM_API_KEY") {
            self.upstream.api_key = Some(key);
        }
        if let Ok(url) = std::env::var("SNAPBACK_DOCS_URL") {
            self.docs.base_url = Some(url);
        }
        if let Ok(key) = std::env::var("SNAPBACK_DOCS_API_KEY") {
            self.docs.api_key = Some(key);
        }
        if let Ok(ttl) = std::env::var("SNAPBACK_DOCS_SEARCH_TTL_SECS") {
            if let Ok(value) = ttl.parse() {
                self.docs.search_ttl_secs = value;
            }
        }
        if let Ok(ttl) = std::env::var("SNAPBACK_DOCS_DOCS_TTL_SECS") {
            if let Ok(value) = ttl.parse() {
                self.docs.docs_ttl_secs = value;
            }
        }
        if let Ok(root) = std::env::var("SNAPBACK_WORKSPACE_ROOT") {
            self.workspace.root = Some(PathBuf::from(root));
        }
        if let Ok(keys) = std::env::var("SNAPBACK_API_KEYS") {
            self.auth.api_keys = keys.split(',').map(String::from).collect();
        }
        if let Ok(mode) = std::env::var("SNAPBACK_MODE") {
            self.development = mode.eq_ignore_ascii_case("development");
        }
    }

    /// Load with priority: file < env.
    pub fn load(config_file: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut config = match config_file {
            Some(path) if path.exists() => {
                tracing::info!(path = %path.display(), "loading configuration file");
                Self::from_file(&path)?
            }
            Some(path) => {
                tracing::warn!(path = %path.display(), "config file not found, using defaults");
                Self::default()
            }
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.server
            .listen_addr
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::InvalidAddr {
                addr: self.server.listen_addr.clone(),
                reason: e.to_string(),
            })
    }

    pub fn workspace_root(&self) -> PathBuf {
        self.workspace
            .root
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }

    /// Fatal-configuration checks. A failure here is exit code 1.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.socket_addr()?;

        for url in [&self.upstream.base_url, &self.docs.base_url]
            .into_iter()
            .flatten()
        {
            reqwest::Url::parse(url).map_err(|e| ConfigError::InvalidUrl {
                url: url.clone(),
                reason: e.to_string(),
            })?;
        }

        if self.upstream.base_url.is_some() {
            let key = self.upstream.api_key.as_deref().unwrap_or("");
            validate_key_format(key, self.development).map_err(ConfigError::InvalidKey)?;
        }

        let root = self.workspace_root();
        if !root.is_dir() {
            return Err(ConfigError::BadWorkspaceRoot(root));
        }

        if !self.development && self.server.cors_origins.iter().any(|o| o == "*") {
            return Err(ConfigError::WildcardCors);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let config = CoprocessorConfig {
            development: true,
            ..CoprocessorConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn production_requires_a_real_upstream_key() {
        let mut config = CoprocessorConfig::default();
        config.upstream.base_url = Some("https://api.example.com".into());
        config.upstream.api_key = Some("short".into());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidKey(_))
        ));

        config.upstream.api_key = Some("a".repeat(32));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn development_allows_an_empty_upstream_key() {
        let mut config = CoprocessorConfig {
            development: true,
            ..CoprocessorConfig::default()
        };
        config.upstream.base_url = Some("https://api.example.com".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn invalid_urls_fail_fast() {
        let mut config = CoprocessorConfig {
            development: true,
            ..CoprocessorConfig::default()
        };
        config.upstream.base_url = Some("not a url".into());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn wildcard_cors_is_development_only() {
        let mut config = CoprocessorConfig::default();
        config.server.cors_origins = vec!["*".into()];
        assert!(matches!(config.validate(), Err(ConfigError::WildcardCors)));

        config.development = true;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn bad_listen_addr_is_rejected() {
        let mut config = CoprocessorConfig {
            development: true,
            ..CoprocessorConfig::default()
        };
        config.server.listen_addr = "nonsense".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidAddr { .. })
        ));
    }

    #[test]
    fn missing_workspace_root_is_fatal() {
        let config = CoprocessorConfig {
            development: true,
            workspace: WorkspaceConfig {
                root: Some(PathBuf::from("/no/such/directory/anywhere")),
                advisory_db: None,
            },
            ..CoprocessorConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::BadWorkspaceRoot(_))
        ));
    }

    #[test]
    fn file_parsing_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapback.toml");
        std::fs::write(
            &path,
            r#"
development = true

[server]
listen_addr = "127.0.0.1:9000"

[docs]
search_ttl_secs = 120
"#,
        )
        .unwrap();
        let config = CoprocessorConfig::from_file(&path).unwrap();
        assert!(config.development);
        assert_eq!(config.server.listen_addr, "127.0.0.1:9000");
        assert_eq!(config.docs.search_ttl_secs, 120);
        // Unset sections keep their defaults.
        assert_eq!(config.docs.docs_ttl_secs, default_docs_ttl_secs());
        assert_eq!(config.server.rate_limit_max_requests, 100);
    }
}
