//! Row types for every stored entity, plus the JSON wire shapes accepted by
//! `POST /api/traces` and returned by the query API. Storage rows carry
//! `serde_json::Value` for the free-form JSON columns (`state_in`,
//! `manifest`, tool call payloads, ...) rather than a typed shape, keeping
//! permissively shaped fields next to strongly typed ones on the same row.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(RunStatus::Running),
            "completed" => Some(RunStatus::Completed),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Run {
    pub id: String,
    pub graph_id: Option<String>,
    pub graph_version: Option<String>,
    pub framework: Option<String>,
    pub agent_id: Option<String>,
    pub status: String,
    pub started_at: String,
    pub ended_at: Option<String>,
    #[schema(value_type = Object)]
    pub input_state: Option<Value>,
    #[schema(value_type = Object)]
    pub output_state: Option<Value>,
    pub tags: Vec<String>,
    pub total_tokens: i64,
    pub total_cost: f64,
    pub total_latency_ms: i64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct NodeExecution {
    pub id: String,
    pub run_id: String,
    pub node_key: String,
    pub node_type: Option<String>,
    pub order: i64,
    pub status: String,
    pub started_at: Option<String>,
    pub ended_at: Option<String>,
    pub latency_ms: i64,
    #[schema(value_type = Object)]
    pub state_in: Option<Value>,
    #[schema(value_type = Object)]
    pub state_out: Option<Value>,
    #[schema(value_type = Object)]
    pub state_diff: Option<Value>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Message {
    pub id: String,
    pub node_execution_id: String,
    pub order: i64,
    pub role: String,
    #[schema(value_type = Object)]
    pub content: Option<Value>,
    pub model: Option<String>,
    pub provider: Option<String>,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub total_tokens: i64,
    pub cost: f64,
    pub latency_ms: i64,
    #[schema(value_type = Object)]
    pub tool_calls: Option<Value>,
    #[schema(value_type = Object)]
    pub tool_results: Option<Value>,
    #[schema(value_type = Object)]
    pub raw_request: Option<Value>,
    #[schema(value_type = Object)]
    pub raw_response: Option<Value>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Edge {
    pub id: String,
    pub run_id: String,
    pub from_node: String,
    pub to_node: String,
    pub condition_label: Option<String>,
    pub order: i64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Evaluation {
    pub id: String,
    pub run_id: String,
    pub node_execution_id: Option<String>,
    pub evaluator: String,
    pub score: Option<f64>,
    pub label: Option<String>,
    pub comment: Option<String>,
    pub is_automated: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RunDetail {
    #[serde(flatten)]
    pub run: Run,
    pub nodes: Vec<NodeExecutionDetail>,
    pub edges: Vec<Edge>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct NodeExecutionDetail {
    #[serde(flatten)]
    pub node: NodeExecution,
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ExtensionStatus {
    Enabled,
    Disabled,
}

impl ExtensionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtensionStatus::Enabled => "enabled",
            ExtensionStatus::Disabled => "disabled",
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Extension {
    pub id: String,
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    pub status: String,
    #[schema(value_type = Object)]
    pub manifest: Value,
    pub install_path: String,
    pub has_backend: bool,
    pub has_frontend: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ExtensionData {
    pub id: String,
    pub extension_id: String,
    pub key: String,
    #[schema(value_type = Object)]
    pub value: Value,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ExtensionNetworkAudit {
    pub id: String,
    pub extension_id: String,
    pub extension_name: String,
    pub target_url: String,
    pub method: String,
    #[schema(value_type = Object)]
    pub request_headers: Value,
    pub request_body_hash: Option<String>,
    pub request_body_size: Option<i64>,
    pub response_status: Option<i64>,
    pub response_time_ms: Option<i64>,
    #[schema(value_type = Object)]
    pub response_headers: Option<Value>,
    pub response_body_excerpt: Option<String>,
    pub response_body_size: Option<i64>,
    pub allowed: bool,
    pub blocked_reason: Option<String>,
    pub error: Option<String>,
    pub created_at: String,
}

// ---------------------------------------------------------------------------
// Ingest payload (inbound JSON for POST /api/traces)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct TracePayload {
    pub run_id: Option<String>,
    pub graph_id: Option<String>,
    pub graph_version: Option<String>,
    pub framework: Option<String>,
    pub agent_id: Option<String>,
    pub status: Option<String>,
    pub started_at: Option<String>,
    pub ended_at: Option<String>,
    #[schema(value_type = Object)]
    pub input_state: Option<Value>,
    #[schema(value_type = Object)]
    pub output_state: Option<Value>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub error: Option<String>,
    #[serde(default)]
    pub nodes: Vec<NodePayload>,
    #[serde(default)]
    pub edges: Vec<EdgePayload>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NodePayload {
    pub node_key: String,
    pub node_type: Option<String>,
    pub order: Option<i64>,
    pub status: Option<String>,
    pub started_at: Option<String>,
    pub ended_at: Option<String>,
    #[schema(value_type = Object)]
    pub state_in: Option<Value>,
    #[schema(value_type = Object)]
    pub state_out: Option<Value>,
    pub error: Option<String>,
    #[serde(default)]
    pub messages: Vec<MessagePayload>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct MessagePayload {
    pub role: String,
    #[schema(value_type = Object)]
    pub content: Option<Value>,
    pub model: Option<String>,
    pub provider: Option<String>,
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
    pub total_tokens: Option<i64>,
    pub cost: Option<f64>,
    pub latency_ms: Option<i64>,
    #[schema(value_type = Object)]
    pub tool_calls: Option<Value>,
    #[schema(value_type = Object)]
    pub tool_results: Option<Value>,
    #[schema(value_type = Object)]
    pub raw_request: Option<Value>,
    #[schema(value_type = Object)]
    pub raw_response: Option<Value>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct EdgePayload {
    pub from_node: String,
    pub to_node: String,
    pub condition_label: Option<String>,
    pub order: Option<i64>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct IngestResult {
    pub status: &'static str,
    pub run_id: String,
    pub node_count: usize,
    pub edge_count: usize,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct EvaluationPayload {
    pub run_id: String,
    pub node_execution_id: Option<String>,
    pub evaluator: String,
    pub score: Option<f64>,
    pub label: Option<String>,
    pub comment: Option<String>,
    #[serde(default)]
    pub is_automated: bool,
}
