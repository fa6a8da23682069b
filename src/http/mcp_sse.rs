//! SSE transport for the MCP tool surface, mirroring the pre-streamable-HTTP
//! MCP convention: a client opens `GET /api/mcp/sse` and receives an
//! `endpoint` event naming the per-session URL it must `POST` JSON-RPC
//! requests to; replies arrive back over the same SSE stream as `message`
//! events.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_stream::stream;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures_util::Stream;
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::mcp::{self, JsonRpcRequest};
use crate::util::new_id;
use crate::SharedState;

#[derive(Default, Clone)]
pub struct McpSessions {
    senders: Arc<Mutex<HashMap<String, mpsc::UnboundedSender<String>>>>,
}

impl McpSessions {
    fn register(&self, session_id: String, sender: mpsc::UnboundedSender<String>) {
        self.senders.lock().unwrap().insert(session_id, sender);
    }

    fn remove(&self, session_id: &str) {
        self.senders.lock().unwrap().remove(session_id);
    }

    fn get(&self, session_id: &str) -> Option<mpsc::UnboundedSender<String>> {
        self.senders.lock().unwrap().get(session_id).cloned()
    }
}

pub async fn sse_handler(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = std::result::Result<Event, std::convert::Infallible>>> {
    let session_id = new_id();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    state.mcp_sessions.register(session_id.clone(), tx);

    let endpoint = format!("/api/mcp/messages?session_id={session_id}");
    let sessions = state.mcp_sessions.clone();
    let cleanup_id = session_id.clone();

    let stream = stream! {
        yield Ok(Event::default().event("endpoint").data(endpoint));
        while let Some(payload) = rx.recv().await {
            yield Ok(Event::default().event("message").data(payload));
        }
        sessions.remove(&cleanup_id);
    };

    Sse::new(stream)
}

#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    pub session_id: String,
}

pub async fn messages_handler(
    State(state): State<SharedState>,
    Query(q): Query<MessagesQuery>,
    Json(request): Json<JsonRpcRequest>,
) -> impl IntoResponse {
    let Some(sender) = state.mcp_sessions.get(&q.session_id) else {
        return (StatusCode::NOT_FOUND, "unknown MCP session").into_response();
    };

    if let Some(response) = mcp::dispatch(&state.pool, request).await {
        match serde_json::to_string(&response) {
            Ok(json) => {
                let _ = sender.send(json);
            }
            Err(e) => log::error!("failed to serialize MCP response: {e}"),
        }
    }

    StatusCode::ACCEPTED.into_response()
}
