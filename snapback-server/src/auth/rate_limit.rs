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

//! Fixed-window rate limiting per client identifier.
//!
//! Per-client state lives in a moka cache with idle-based eviction so the
//! window map stays bounded no matter how many distinct clients show up.

use moka::sync::Cache;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum requests per window
    pub max_requests: u32,
    /// Window duration
    pub window: Duration,
    /// Enable rate limiting
    pub enabled: bool,
    /// Maximum number of tracked clients
    pub max_clients: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window: Duration::from_secs(60),
            enabled: true,
            max_clients: 100_000,
        }
    }
}

/// One client's fixed window: a counter plus the window start.
#[derive(Debug)]
struct FixedWindow {
    count: AtomicU32,
    window_start_ms: AtomicU64,
}

pub struct RateLimiter {
    config: RateLimitConfig,
    windows: Cache<String, Arc<FixedWindow>>,
    epoch: Instant,
}

/// Result of a rate limit check
#[derive(Debug)]
pub enum RateLimitResult {
    Allowed {
        remaining: u32,
    },
    RateLimited {
        retry_after: Duration,
    },
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        // Entries idle for 10 windows are evicted automatically.
        let ttl = config.window * 10;
        let windows = Cache::builder()
            .max_capacity(config.max_clients)
            .time_to_idle(ttl)
            .build();
        Self {
            config,
            windows,
            epoch: Instant::now(),
        }
    }

    /// Check whether a request from `identifier` (client ip or key) fits in
    /// the current window.
    pub fn check(&self, identifier: &str) -> RateLimitResult {
        if !self.config.enabled {
            return RateLimitResult::Allowed {
                remaining: self.config.max_requests,
            };
        }

        let now_ms = self.epoch.elapsed().as_millis() as u64;
        let window_ms = self.config.window.as_millis() as u64;

        let window = self.windows.get_with(identifier.to_string(), || {
            Arc::new(FixedWindow {
                count: AtomicU32::new(0),
                window_start_ms: AtomicU64::new(now_ms),
            })
        });

        let start = window.window_start_ms.load(Ordering::Relaxed);
        if now_ms.saturating_sub(start) >= window_ms {
            // Window elapsed: first writer resets, the rest observe it.
            if window
                .window_start_ms
                .compare_exchange(start, now_ms, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                window.count.store(0, Ordering::Relaxed);
            }
        }

        let used = window.count.fetch_add(1, Ordering::Relaxed) + 1;
        if used <= self.config.max_requests {
            RateLimitResult::Allowed {
                remaining: self.config.max_requests - used,
            }
        } else {
            let elapsed = now_ms.saturating_sub(window.window_start_ms.load(Ordering::Relaxed));
            RateLimitResult::RateLimited {
                retry_after: Duration::from_millis(window_ms.saturating_sub(elapsed)),
            }
        }
    }

    pub fn window_secs(&self) -> u64 {
        self.config.window.as_secs()
    }

    pub fn client_count(&self) -> u64 {
        self.windows.entry_count()
    }
}

/// Extract the client ip from proxy headers, falling back to nothing.
pub fn extract_client_ip(headers: &axum::http::HeaderMap) -> Option<String> {
    if let Some(forwarded) = headers.get("X-Forwarded-For") {
        if let Ok(forwarded_str) = forwarded.to_str() {
            if let Some(first_ip) = forwarded_str.split(',').next() {
                return Some(first_ip.trim().to_string());
            }
        }
    }
    if let Some(real_ip) = headers.get("X-Real-IP") {
        if let Ok(ip_str) = real_ip.to_str() {
            return Some(ip_str.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(cap: u32, window: Duration) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            max_requests: cap,
            window,
            enabled: true,
            max_clients: 1_000,
        })
    }

    #[test]
    fn cap_th_request_succeeds_and_cap_plus_one_fails() {
        let limiter = limiter(5, Duration::from_secs(60));
        for i in 0..5 {
            match limiter.check("client") {
                RateLimitResult::Allowed { .. } => {}
                RateLimitResult::RateLimited { .. } => panic!("request {i} should pass"),
            }
        }
        assert!(matches!(
            limiter.check("client"),
            RateLimitResult::RateLimited { .. }
        ));
    }

    #[test]
    fn windows_are_per_client() {
        let limiter = limiter(1, Duration::from_secs(60));
        assert!(matches!(
            limiter.check("a"),
            RateLimitResult::Allowed { .. }
        ));
        assert!(matches!(
            limiter.check("b"),
            RateLimitResult::Allowed { .. }
        ));
        assert!(matches!(
            limiter.check("a"),
            RateLimitResult::RateLimited { .. }
        ));
    }

    #[test]
    fn window_reset_readmits() {
        let limiter = limiter(1, Duration::from_millis(30));
        assert!(matches!(
            limiter.check("c"),
            RateLimitResult::Allowed { .. }
        ));
        assert!(matches!(
            limiter.check("c"),
            RateLimitResult::RateLimited { .. }
        ));
        std::thread::sleep(Duration::from_millis(40));
        assert!(matches!(
            limiter.check("c"),
            RateLimitResult::Allowed { .. }
        ));
    }

    #[test]
    fn retry_after_is_within_the_window() {
        let limiter = limiter(1, Duration::from_secs(60));
        limiter.check("d");
        match limiter.check("d") {
            RateLimitResult::RateLimited { retry_after } => {
                assert!(retry_after <= Duration::from_secs(60));
            }
            _ => panic!("expected rate limited"),
        }
    }

    #[test]
    fn disabled_limiter_allows_everything() {
        let limiter = RateLimiter::new(RateLimitConfig {
            max_requests: 1,
            window: Duration::from_secs(60),
            enabled: false,
            max_clients: 10,
        });
        for _ in 0..50 {
            assert!(matches!(
                limiter.check("e"),
                RateLimitResult::Allowed { .. }
            ));
        }
    }

    #[test]
    fn client_ip_extraction_prefers_forwarded_for() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert("X-Forwarded-For", "1.2.3.4, 10.0.0.1".parse().unwrap());
        headers.insert("X-Real-IP", "9.9.9.9".parse().unwrap());
        assert_eq!(extract_client_ip(&headers).as_deref(), Some("1.2.3.4"));

        let mut headers = axum::http::HeaderMap::new();
        headers.insert("X-Real-IP", "9.9.9.9".parse().unwrap());
        assert_eq!(extract_client_ip(&headers).as_deref(), Some("9.9.9.9"));

        assert_eq!(extract_client_ip(&axum::http::HeaderMap::new()), None);
    }
}
