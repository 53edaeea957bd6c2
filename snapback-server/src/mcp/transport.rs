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

//! Stream transport: newline-delimited JSON-RPC over stdin/stdout.
//!
//! Stdin carries requests only, stdout carries responses only (logs go to
//! stderr). Each parsed request runs in its own task; the single writer
//! task serializes every response and terminates each with one newline.
//! A malformed frame answers with id `null` and keeps the session open;
//! stdin EOF terminates the session and cancels in-flight requests.

use crate::mcp::handlers::{Dispatcher, RequestContext};
use crate::mcp::protocol::{JsonRpcError, JsonRpcId, JsonRpcRequest, JsonRpcResponse};
use crate::mcp::session::{Session, SessionRegistry};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

/// Session id used by the single stdio connection.
pub const STDIO_SESSION_ID: &str = "stdio";

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Run the stdio transport until stdin closes.
pub async fn run_stdio(
    dispatcher: Arc<Dispatcher>,
    registry: Arc<SessionRegistry>,
    raw_key: Option<String>,
) -> Result<(), TransportError> {
    let (tx, mut rx) = mpsc::channel::<JsonRpcResponse>(64);
    let session = Session::new(STDIO_SESSION_ID, tx);
    registry.register(session.clone());

    // The one writer: responses never interleave at the byte level.
    let writer_session = session.clone();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(response) = rx.recv().await {
            let mut line = match serde_json::to_vec(&response) {
                Ok(line) => line,
                Err(e) => {
                    tracing::error!(error = %e, "failed to serialize response");
                    continue;
                }
            };
            line.push(b'\n');
            if stdout.write_all(&line).await.is_err() || stdout.flush().await.is_err() {
                writer_session.close();
                break;
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::error!(error = %e, "stdin read error, terminating session");
                registry.remove(STDIO_SESSION_ID);
                writer.abort();
                return Err(TransportError::Io(e));
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<JsonRpcRequest>(&line) {
            Err(e) => {
                // Bad frame: answer with id null, keep the session open.
                let response = JsonRpcResponse::error(
                    JsonRpcId::Null,
                    JsonRpcError::parse_error(format!("invalid JSON-RPC frame: {e}")),
                );
                session.send(response).await;
            }
            Ok(request) => {
                let dispatcher = dispatcher.clone();
                let session = session.clone();
                let ctx = RequestContext {
                    raw_key: raw_key.clone(),
                    cancel: session.cancel.child_token(),
                };
                tokio::spawn(async move {
                    if let Some(response) = dispatcher.handle_request(request, &ctx).await {
                        session.send(response).await;
                    }
                });
            }
        }
    }

    registry.remove(STDIO_SESSION_ID);
    writer.abort();
    Ok(())
}
