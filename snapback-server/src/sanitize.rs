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

//! Error sanitizer: the single outbound path for unexpected errors.
//!
//! In development the caller sees the original message; in production the
//! public message is one fixed sentence, and the log id is the only link
//! between what the caller saw and what landed in the error log.

use std::time::{SystemTime, UNIX_EPOCH};

/// The production-mode public message. Fixed for any input.
pub const GENERIC_PUBLIC_MESSAGE: &str =
    "An internal error occurred. Please contact support and include the reference id.";

#[derive(Debug, Clone)]
pub struct Sanitized {
    pub public_message: String,
    pub code: i32,
    pub log_id: String,
}

#[derive(Debug, Clone)]
pub struct ErrorSanitizer {
    development: bool,
}

impl ErrorSanitizer {
    pub fn new(development: bool) -> Self {
        Self { development }
    }

    pub fn sanitize(&self, error: &dyn std::fmt::Display, context: &str) -> Sanitized {
        let log_id = new_log_id();
        tracing::error!(
            log_id = %log_id,
            context = %context,
            error = %error,
            "internal error"
        );
        let public_message = if self.development {
            error.to_string()
        } else {
            GENERIC_PUBLIC_MESSAGE.to_string()
        };
        Sanitized {
            public_message,
            code: -32603,
            log_id,
        }
    }
}

/// Time-plus-random token, unique per call for log correlation.
fn new_log_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!("{:x}-{:04x}", millis, rand::random::<u16>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn production_message_is_fixed_for_any_input() {
        let sanitizer = ErrorSanitizer::new(false);
        for message in ["db path /secret/key leaked", "panic at src/lib.rs:42"] {
            let out = sanitizer.sanitize(&message, "test");
            assert_eq!(out.public_message, GENERIC_PUBLIC_MESSAGE);
            assert!(!out.public_message.contains("secret"));
        }
    }

    #[test]
    fn development_echoes_the_original() {
        let sanitizer = ErrorSanitizer::new(true);
        let out = sanitizer.sanitize(&"boom happened", "test");
        assert_eq!(out.public_message, "boom happened");
    }

    #[test]
    fn log_ids_are_unique_per_call() {
        let sanitizer = ErrorSanitizer::new(false);
        let ids: HashSet<String> = (0..64)
            .map(|_| sanitizer.sanitize(&"x", "test").log_id)
            .collect();
        assert_eq!(ids.len(), 64);
    }
}
