//! Trace ingestion engine: transactional, idempotent-by-`run_id` upsert of
//! a whole run graph plus derived aggregates.

pub mod diff;

use rusqlite::{params, Connection};
use serde_json::Value;

use crate::db::{self, DbPool};
use crate::error::{Error, Result};
use crate::models::{IngestResult, TracePayload};
use crate::util::{new_id, now_str};

/// Validate a payload before touching storage.
fn validate(payload: &TracePayload) -> Result<()> {
    if let Some(status) = &payload.status {
        if !["running", "completed", "failed"].contains(&status.as_str()) {
            return Err(Error::validation(
                "status",
                format!("must be one of running, completed, failed, got '{status}'"),
            ));
        }
    }
    for (idx, node) in payload.nodes.iter().enumerate() {
        if node.node_key.is_empty() {
            return Err(Error::validation(
                format!("nodes[{idx}].node_key"),
                "must not be empty",
            ));
        }
        for (midx, msg) in node.messages.iter().enumerate() {
            if !["system", "user", "assistant", "tool"].contains(&msg.role.as_str()) {
                return Err(Error::validation(
                    format!("nodes[{idx}].messages[{midx}].role"),
                    format!("must be one of system, user, assistant, tool, got '{}'", msg.role),
                ));
            }
        }
    }
    for (idx, edge) in payload.edges.iter().enumerate() {
        if edge.from_node.is_empty() || edge.to_node.is_empty() {
            return Err(Error::validation(
                format!("edges[{idx}]"),
                "from_node and to_node must not be empty",
            ));
        }
    }
    Ok(())
}

pub async fn ingest_trace(pool: &DbPool, payload: TracePayload) -> Result<IngestResult> {
    validate(&payload)?;
    db::with_conn(pool, move |conn| ingest_trace_sync(conn, payload)).await
}

/// Upsert a run, its nodes, messages, tool calls, and edges, then recompute
/// the run's aggregates, all inside a single transaction. Synchronous:
/// always called from `spawn_blocking` via [`ingest_trace`].
fn ingest_trace_sync(conn: &mut Connection, payload: TracePayload) -> Result<IngestResult> {
    let tx = conn.transaction().map_err(Error::storage)?;

    let run_id = payload.run_id.clone().unwrap_or_else(new_id);

    // Step 2: idempotent replacement — delete any existing run (cascades).
    tx.execute("DELETE FROM runs WHERE id = ?1", params![run_id])
        .map_err(Error::storage)?;

    let started_at = payload.started_at.clone().unwrap_or_else(now_str);
    let status = payload.status.clone().unwrap_or_else(|| "completed".to_string());
    let tags_json = serde_json::to_string(&payload.tags).map_err(Error::Json)?;

    // Step 3: placeholder row — aggregates patched at the end.
    tx.execute(
        "INSERT INTO runs (id, graph_id, graph_version, framework, agent_id, status,
                            started_at, ended_at, input_state, output_state, tags,
                            total_tokens, total_cost, total_latency_ms, error)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, ?8, ?9, ?10, 0, 0, 0, ?11)",
        params![
            run_id,
            payload.graph_id,
            payload.graph_version,
            payload.framework,
            payload.agent_id,
            status,
            started_at,
            payload.input_state.as_ref().map(|v| v.to_string()),
            payload.output_state.as_ref().map(|v| v.to_string()),
            tags_json,
            payload.error,
        ],
    )
    .map_err(Error::storage)?;

    let mut run_tokens: i64 = 0;
    let mut run_cost: f64 = 0.0;
    let mut run_latency: i64 = 0;

    for (idx, node) in payload.nodes.iter().enumerate() {
        let node_id = new_id();
        let order = node.order.unwrap_or(idx as i64);

        let state_diff = match (&node.state_in, &node.state_out) {
            (Some(a), Some(b)) => Some(diff::compute_state_diff(a, b)),
            _ => None,
        };

        let node_status = if node.error.is_some() {
            "failed".to_string()
        } else {
            node.status.clone().unwrap_or_else(|| "completed".to_string())
        };

        tx.execute(
            "INSERT INTO node_executions (id, run_id, node_key, node_type, \"order\", status,
                                           started_at, ended_at, latency_ms, state_in, state_out,
                                           state_diff, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9, ?10, ?11, ?12)",
            params![
                node_id,
                run_id,
                node.node_key,
                node.node_type,
                order,
                node_status,
                node.started_at,
                node.ended_at,
                node.state_in.as_ref().map(|v| v.to_string()),
                node.state_out.as_ref().map(|v| v.to_string()),
                state_diff.as_ref().map(|v: &Value| v.to_string()),
                node.error,
            ],
        )
        .map_err(Error::storage)?;

        let mut node_latency: i64 = 0;

        for (midx, msg) in node.messages.iter().enumerate() {
            let msg_id = new_id();
            let total_tokens = msg.total_tokens.unwrap_or(0);
            let cost = msg.cost.unwrap_or(0.0);
            let latency_ms = msg.latency_ms.unwrap_or(0);

            tx.execute(
                "INSERT INTO messages (id, node_execution_id, \"order\", role, content, model,
                                        provider, input_tokens, output_tokens, total_tokens, cost,
                                        latency_ms, tool_calls, tool_results, raw_request, raw_response)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                params![
                    msg_id,
                    node_id,
                    midx as i64,
                    msg.role,
                    msg.content.as_ref().map(|v| v.to_string()),
                    msg.model,
                    msg.provider,
                    msg.input_tokens.unwrap_or(0),
                    msg.output_tokens.unwrap_or(0),
                    total_tokens,
                    cost,
                    latency_ms,
                    msg.tool_calls.as_ref().map(|v| v.to_string()),
                    msg.tool_results.as_ref().map(|v| v.to_string()),
                    msg.raw_request.as_ref().map(|v| v.to_string()),
                    msg.raw_response.as_ref().map(|v| v.to_string()),
                ],
            )
            .map_err(Error::storage)?;

            node_latency += latency_ms;
            run_tokens += total_tokens;
            run_cost += cost;
        }

        tx.execute(
            "UPDATE node_executions SET latency_ms = ?1 WHERE id = ?2",
            params![node_latency, node_id],
        )
        .map_err(Error::storage)?;

        run_latency += node_latency;
    }

    for (idx, edge) in payload.edges.iter().enumerate() {
        let edge_id = new_id();
        let order = edge.order.unwrap_or(idx as i64);
        tx.execute(
            "INSERT INTO edges (id, run_id, from_node, to_node, condition_label, \"order\")
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![edge_id, run_id, edge.from_node, edge.to_node, edge.condition_label, order],
        )
        .map_err(Error::storage)?;
    }

    let ended_at = if status == "running" {
        None
    } else {
        Some(payload.ended_at.clone().unwrap_or_else(now_str))
    };

    tx.execute(
        "UPDATE runs SET total_tokens = ?1, total_cost = ?2, total_latency_ms = ?3, ended_at = ?4
         WHERE id = ?5",
        params![run_tokens, run_cost, run_latency, ended_at, run_id],
    )
    .map_err(Error::storage)?;

    tx.commit().map_err(Error::storage)?;

    Ok(IngestResult {
        status: "ingested",
        run_id,
        node_count: payload.nodes.len(),
        edge_count: payload.edges.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MessagePayload, NodePayload};

    fn minimal_payload(run_id: &str) -> TracePayload {
        TracePayload {
            run_id: Some(run_id.to_string()),
            graph_id: Some("g".to_string()),
            graph_version: None,
            framework: None,
            agent_id: None,
            status: None,
            started_at: None,
            ended_at: None,
            input_state: None,
            output_state: None,
            tags: vec![],
            error: None,
            nodes: vec![NodePayload {
                node_key: "n1".to_string(),
                node_type: None,
                order: None,
                status: None,
                started_at: None,
                ended_at: None,
                state_in: None,
                state_out: None,
                error: None,
                messages: vec![MessagePayload {
                    role: "user".to_string(),
                    content: Some(Value::String("hi".to_string())),
                    model: None,
                    provider: None,
                    input_tokens: None,
                    output_tokens: None,
                    total_tokens: Some(3),
                    cost: Some(0.001),
                    latency_ms: Some(50),
                    tool_calls: None,
                    tool_results: None,
                    raw_request: None,
                    raw_response: None,
                }],
            }],
            edges: vec![],
        }
    }

    #[test]
    fn ingest_computes_token_cost_and_latency_aggregates() {
        let mut conn = Connection::open_in_memory().unwrap();
        db::bootstrap_schema(&conn).unwrap();

        let result = ingest_trace_sync(&mut conn, minimal_payload("r1")).unwrap();
        assert_eq!(result.run_id, "r1");
        assert_eq!(result.node_count, 1);
        assert_eq!(result.edge_count, 0);

        let (tokens, cost, latency): (i64, f64, i64) = conn
            .query_row(
                "SELECT total_tokens, total_cost, total_latency_ms FROM runs WHERE id = 'r1'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();
        assert_eq!(tokens, 3);
        assert_eq!(cost, 0.001);
        assert_eq!(latency, 50);
    }

    #[test]
    fn reingesting_same_run_id_replaces_nodes_and_edges() {
        let mut conn = Connection::open_in_memory().unwrap();
        db::bootstrap_schema(&conn).unwrap();

        ingest_trace_sync(&mut conn, minimal_payload("r1")).unwrap();

        let mut empty = minimal_payload("r1");
        empty.nodes.clear();
        let result = ingest_trace_sync(&mut conn, empty).unwrap();
        assert_eq!(result.node_count, 0);

        let node_count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM node_executions WHERE run_id = 'r1'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(node_count, 0);

        let message_count: i64 = conn
            .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))
            .unwrap();
        assert_eq!(message_count, 0, "cascaded messages must not be orphaned");

        let (tokens, cost): (i64, f64) = conn
            .query_row(
                "SELECT total_tokens, total_cost FROM runs WHERE id = 'r1'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(tokens, 0);
        assert_eq!(cost, 0.0);
    }

    #[test]
    fn order_defaults_to_source_index() {
        let mut conn = Connection::open_in_memory().unwrap();
        db::bootstrap_schema(&conn).unwrap();

        let mut payload = minimal_payload("r1");
        payload.nodes.push(NodePayload {
            node_key: "n2".to_string(),
            node_type: None,
            order: None,
            status: None,
            started_at: None,
            ended_at: None,
            state_in: None,
            state_out: None,
            error: None,
            messages: vec![],
        });
        ingest_trace_sync(&mut conn, payload).unwrap();

        let mut stmt = conn
            .prepare("SELECT node_key FROM node_executions WHERE run_id = 'r1' ORDER BY \"order\"")
            .unwrap();
        let keys: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(keys, vec!["n1".to_string(), "n2".to_string()]);
    }

    #[test]
    fn missing_run_id_generates_one() {
        let mut conn = Connection::open_in_memory().unwrap();
        db::bootstrap_schema(&conn).unwrap();

        let mut payload = minimal_payload("unused");
        payload.run_id = None;
        let result = ingest_trace_sync(&mut conn, payload).unwrap();
        assert!(!result.run_id.is_empty());
    }

    #[test]
    fn invalid_message_role_is_rejected_before_storage() {
        let mut payload = minimal_payload("r1");
        payload.nodes[0].messages[0].role = "narrator".to_string();
        let err = validate(&payload).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn run_status_defaults_to_completed_and_is_not_escalated_by_node_error() {
        let mut conn = Connection::open_in_memory().unwrap();
        db::bootstrap_schema(&conn).unwrap();

        let mut payload = minimal_payload("r1");
        payload.nodes[0].error = Some("boom".to_string());
        ingest_trace_sync(&mut conn, payload).unwrap();

        let (run_status, node_status): (String, String) = conn
            .query_row(
                "SELECT r.status, n.status FROM runs r JOIN node_executions n ON n.run_id = r.id
                 WHERE r.id = 'r1'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(run_status, "completed");
        assert_eq!(node_status, "failed");
    }
}
