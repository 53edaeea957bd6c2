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

//! Sessions and the session registry.
//!
//! A session owns the write side of one transport: all responses funnel
//! through its channel into a single writer, so writes are serialized and
//! never interleave at the byte level. Closing a session happens exactly
//! once and cancels every in-flight request derived from it.

use crate::mcp::protocol::JsonRpcResponse;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub struct Session {
    pub id: String,
    tx: mpsc::Sender<JsonRpcResponse>,
    pub created_at: Instant,
    last_activity_ms: AtomicU64,
    pub cancel: CancellationToken,
    closed: AtomicBool,
}

impl Session {
    pub fn new(id: impl Into<String>, tx: mpsc::Sender<JsonRpcResponse>) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            tx,
            created_at: Instant::now(),
            last_activity_ms: AtomicU64::new(0),
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
        })
    }

    /// Queue a response for the session writer. Returns false once the
    /// session is closed; further responses are dropped.
    pub async fn send(&self, response: JsonRpcResponse) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        match self.tx.send(response).await {
            Ok(()) => {
                self.touch();
                true
            }
            Err(_) => {
                // Writer gone: treat as a write error and close.
                self.close();
                false
            }
        }
    }

    pub fn touch(&self) {
        self.last_activity_ms
            .store(self.created_at.elapsed().as_millis() as u64, Ordering::Relaxed);
    }

    /// Close exactly once; cancellation cascades to every in-flight request
    /// holding a child token.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.cancel.cancel();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// The single synchronization point for transport lifetimes. No business
/// logic lives here.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, session: Arc<Session>) {
        self.sessions.insert(session.id.clone(), session);
    }

    pub fn lookup(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    /// Remove and close. In-flight requests are cancelled through the
    /// session token; their tasks drain on their own.
    pub fn remove(&self, id: &str) -> Option<Arc<Session>> {
        let (_, session) = self.sessions.remove(id)?;
        session.close();
        Some(session)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Close every session. Safe against concurrent removals: ids are
    /// snapshotted first, and `remove` tolerates already-gone entries.
    pub fn shutdown_all(&self) {
        let ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.remove(&id);
        }
    }
}
