//! Static `initialize` response and `tools/list` schema definitions for the
//! tool surface dispatched in [`super`].

use serde_json::{json, Value};

pub fn initialize_result() -> Value {
    json!({
        "protocolVersion": super::PROTOCOL_VERSION,
        "serverInfo": { "name": "tracehub", "version": env!("CARGO_PKG_VERSION") },
        "capabilities": { "tools": {} },
    })
}

pub fn tool_definitions() -> Vec<Value> {
    vec![
        json!({
            "name": "ingest_trace",
            "description": "Ingest (or re-ingest) a full agent run trace: the run's metadata, its node executions, messages, and edges.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "run_id": { "type": "string", "description": "Stable id for the run; a new one is generated if omitted." },
                    "graph_id": { "type": "string" },
                    "framework": { "type": "string" },
                    "status": { "type": "string", "enum": ["running", "completed", "failed"] },
                    "nodes": { "type": "array" },
                    "edges": { "type": "array" },
                },
            },
        }),
        json!({
            "name": "list_runs",
            "description": "List ingested runs, most recent first, optionally filtered by framework, status, agent, or graph.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "limit": { "type": "integer" },
                    "offset": { "type": "integer" },
                    "framework": { "type": "string" },
                    "status": { "type": "string" },
                    "agent_id": { "type": "string" },
                    "graph_id": { "type": "string" },
                },
            },
        }),
        json!({
            "name": "get_run",
            "description": "Fetch one run's full detail: metadata plus every node execution, its messages, and the run's edges.",
            "inputSchema": {
                "type": "object",
                "properties": { "run_id": { "type": "string" } },
                "required": ["run_id"],
            },
        }),
    ]
}
