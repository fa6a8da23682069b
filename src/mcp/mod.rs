//! Minimal MCP (Model Context Protocol) tool surface: JSON-RPC 2.0 dispatch
//! shared by the stdio binary and the HTTP SSE transport. Exposes
//! `ingest_trace`, `list_runs`, and `get_run` as callable tools.

pub mod tools;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::db::DbPool;
use crate::ingest;
use crate::query;

pub const PROTOCOL_VERSION: &str = "2024-11-05";

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub id: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

impl JsonRpcResponse {
    fn ok(id: Value, result: Value) -> Self {
        Self { jsonrpc: "2.0", id, result: Some(result), error: None }
    }

    fn err(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(JsonRpcError { code, message: message.into() }),
        }
    }
}

/// Handle one decoded JSON-RPC request. Returns `None` for notifications
/// (requests with no `id`), which per the JSON-RPC spec never get a reply.
pub async fn dispatch(pool: &DbPool, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
    let id = request.id.clone();

    if request.method == "notifications/initialized" {
        return None;
    }

    let id = match id {
        Some(id) => id,
        None => return None,
    };

    let response = match request.method.as_str() {
        "initialize" => JsonRpcResponse::ok(id, tools::initialize_result()),
        "tools/list" => JsonRpcResponse::ok(id, json!({ "tools": tools::tool_definitions() })),
        "tools/call" => handle_tools_call(pool, id, request.params).await,
        other => JsonRpcResponse::err(id, METHOD_NOT_FOUND, format!("method not found: {other}")),
    };

    Some(response)
}

/// A tool call can fail for a caller reason (bad/missing arguments) or a
/// callee reason (storage, not-found, validation inside the delegated
/// engine) — these map to different JSON-RPC error codes.
enum ToolError {
    InvalidParams(String),
    Internal(String),
}

async fn handle_tools_call(pool: &DbPool, id: Value, params: Value) -> JsonRpcResponse {
    let Some(name) = params.get("name").and_then(Value::as_str) else {
        return JsonRpcResponse::err(id, INVALID_PARAMS, "missing required field 'name'");
    };
    let arguments = params.get("arguments").cloned().unwrap_or(json!({}));

    let result = match name {
        "ingest_trace" => call_ingest_trace(pool, arguments).await,
        "list_runs" => call_list_runs(pool, arguments).await,
        "get_run" => call_get_run(pool, arguments).await,
        other => return JsonRpcResponse::err(id, METHOD_NOT_FOUND, format!("unknown tool: {other}")),
    };

    match result {
        Ok(content) => JsonRpcResponse::ok(id, tool_result_envelope(content)),
        Err(ToolError::InvalidParams(message)) => JsonRpcResponse::err(id, INVALID_PARAMS, message),
        Err(ToolError::Internal(message)) => JsonRpcResponse::err(id, INTERNAL_ERROR, message),
    }
}

/// Successful MCP tool results are wrapped in a `content` array of typed
/// blocks.
fn tool_result_envelope(payload: Value) -> Value {
    json!({
        "content": [{ "type": "text", "text": payload.to_string() }],
        "isError": false,
    })
}

async fn call_ingest_trace(pool: &DbPool, arguments: Value) -> Result<Value, ToolError> {
    let payload = serde_json::from_value(arguments)
        .map_err(|e| ToolError::InvalidParams(format!("invalid arguments: {e}")))?;
    let result = ingest::ingest_trace(pool, payload)
        .await
        .map_err(classify_engine_error)?;
    serde_json::to_value(result).map_err(|e| ToolError::Internal(e.to_string()))
}

async fn call_list_runs(pool: &DbPool, arguments: Value) -> Result<Value, ToolError> {
    let limit = arguments.get("limit").and_then(Value::as_i64);
    let offset = arguments.get("offset").and_then(Value::as_i64);
    let mut filter = query::RunListFilter::new(limit, offset);
    filter.framework = arguments.get("framework").and_then(Value::as_str).map(str::to_string);
    filter.status = arguments.get("status").and_then(Value::as_str).map(str::to_string);
    filter.agent_id = arguments.get("agent_id").and_then(Value::as_str).map(str::to_string);
    filter.graph_id = arguments.get("graph_id").and_then(Value::as_str).map(str::to_string);

    let runs = query::list_runs(pool, filter).await.map_err(classify_engine_error)?;
    serde_json::to_value(runs).map_err(|e| ToolError::Internal(e.to_string()))
}

async fn call_get_run(pool: &DbPool, arguments: Value) -> Result<Value, ToolError> {
    let run_id = arguments
        .get("run_id")
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::InvalidParams("missing required argument 'run_id'".to_string()))?
        .to_string();
    let detail = query::get_run_detail(pool, run_id).await.map_err(classify_engine_error)?;
    serde_json::to_value(detail).map_err(|e| ToolError::Internal(e.to_string()))
}

/// A delegated engine's own [`crate::error::Error::Validation`] is still a
/// caller mistake (bad params); everything else (not-found, storage) is
/// internal from the MCP caller's point of view.
fn classify_engine_error(err: crate::error::Error) -> ToolError {
    match err {
        crate::error::Error::Validation(_) => ToolError::InvalidParams(err.to_string()),
        other => ToolError::Internal(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn req(method: &str, params: Value, id: Option<Value>) -> JsonRpcRequest {
        JsonRpcRequest { jsonrpc: Some("2.0".to_string()), method: method.to_string(), params, id }
    }

    #[tokio::test]
    async fn initialize_returns_protocol_version() {
        let pool = db::test_pool();
        let response = dispatch(&pool, req("initialize", json!({}), Some(json!(1)))).await.unwrap();
        assert_eq!(
            response.result.unwrap()["protocolVersion"],
            Value::String(PROTOCOL_VERSION.to_string())
        );
    }

    #[tokio::test]
    async fn notification_gets_no_response() {
        let pool = db::test_pool();
        let response = dispatch(&pool, req("notifications/initialized", json!({}), None)).await;
        assert!(response.is_none());
    }

    #[tokio::test]
    async fn unknown_method_is_method_not_found() {
        let pool = db::test_pool();
        let response = dispatch(&pool, req("bogus", json!({}), Some(json!(1))))
            .await
            .unwrap();
        assert_eq!(response.error.unwrap().code, METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn tools_list_includes_ingest_trace() {
        let pool = db::test_pool();
        let response = dispatch(&pool, req("tools/list", json!({}), Some(json!(1)))).await.unwrap();
        let tools = response.result.unwrap()["tools"].as_array().unwrap().len();
        assert_eq!(tools, 3);
    }

    #[tokio::test]
    async fn tools_call_ingest_trace_then_get_run_round_trips() {
        let pool = db::test_pool();
        let ingest_params = json!({
            "name": "ingest_trace",
            "arguments": { "run_id": "r1", "nodes": [], "edges": [] },
        });
        let response = dispatch(&pool, req("tools/call", ingest_params, Some(json!(1))))
            .await
            .unwrap();
        assert_eq!(response.result.unwrap()["isError"], Value::Bool(false));

        let get_params = json!({ "name": "get_run", "arguments": { "run_id": "r1" } });
        let response = dispatch(&pool, req("tools/call", get_params, Some(json!(2))))
            .await
            .unwrap();
        let result = response.result.unwrap();
        assert_eq!(result["isError"], Value::Bool(false));
        let text = result["content"][0]["text"].as_str().unwrap();
        assert!(text.contains("\"r1\""));
    }

    #[tokio::test]
    async fn tools_call_unknown_tool_is_method_not_found() {
        let pool = db::test_pool();
        let params = json!({ "name": "delete_everything", "arguments": {} });
        let response = dispatch(&pool, req("tools/call", params, Some(json!(1)))).await.unwrap();
        assert_eq!(response.error.unwrap().code, METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn tools_call_get_run_missing_run_id_is_invalid_params() {
        let pool = db::test_pool();
        let params = json!({ "name": "get_run", "arguments": {} });
        let response = dispatch(&pool, req("tools/call", params, Some(json!(1)))).await.unwrap();
        assert_eq!(response.error.unwrap().code, INVALID_PARAMS);
    }

    #[tokio::test]
    async fn tools_call_get_run_unknown_run_is_internal_error() {
        let pool = db::test_pool();
        let params = json!({ "name": "get_run", "arguments": { "run_id": "missing" } });
        let response = dispatch(&pool, req("tools/call", params, Some(json!(1)))).await.unwrap();
        assert_eq!(response.error.unwrap().code, INTERNAL_ERROR);
    }
}
