//! Read-side query API backing the `GET /api/runs*` surface and the `list_runs`
//! / `get_run` MCP tools. Kept free of the HTTP layer (handler functions in
//! `http::runs` are thin adapters over these) so the logic can be tested
//! independent of `axum`.

use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;
use serde_json::Value;

use crate::db::{self, DbPool};
use crate::error::{Error, Result};
use crate::models::{Edge, Evaluation, Message, NodeExecution, NodeExecutionDetail, Run, RunDetail};
use crate::util::now_str;

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunListFilter {
    pub limit: i64,
    pub offset: i64,
    pub framework: Option<String>,
    pub status: Option<String>,
    pub agent_id: Option<String>,
    pub graph_id: Option<String>,
}

impl RunListFilter {
    pub fn new(limit: Option<i64>, offset: Option<i64>) -> Self {
        Self {
            limit: limit.unwrap_or(50).clamp(1, 1000),
            offset: offset.unwrap_or(0).max(0),
            ..Default::default()
        }
    }
}

fn parse_json_opt(s: Option<String>) -> Option<Value> {
    s.and_then(|s| serde_json::from_str(&s).ok())
}

fn run_from_row(row: &Row) -> rusqlite::Result<Run> {
    let tags_json: String = row.get("tags")?;
    let tags: Vec<String> = serde_json::from_str(&tags_json).unwrap_or_default();
    Ok(Run {
        id: row.get("id")?,
        graph_id: row.get("graph_id")?,
        graph_version: row.get("graph_version")?,
        framework: row.get("framework")?,
        agent_id: row.get("agent_id")?,
        status: row.get("status")?,
        started_at: row.get("started_at")?,
        ended_at: row.get("ended_at")?,
        input_state: parse_json_opt(row.get("input_state")?),
        output_state: parse_json_opt(row.get("output_state")?),
        tags,
        total_tokens: row.get("total_tokens")?,
        total_cost: row.get("total_cost")?,
        total_latency_ms: row.get("total_latency_ms")?,
        error: row.get("error")?,
    })
}

fn node_from_row(row: &Row) -> rusqlite::Result<NodeExecution> {
    Ok(NodeExecution {
        id: row.get("id")?,
        run_id: row.get("run_id")?,
        node_key: row.get("node_key")?,
        node_type: row.get("node_type")?,
        order: row.get("order")?,
        status: row.get("status")?,
        started_at: row.get("started_at")?,
        ended_at: row.get("ended_at")?,
        latency_ms: row.get("latency_ms")?,
        state_in: parse_json_opt(row.get("state_in")?),
        state_out: parse_json_opt(row.get("state_out")?),
        state_diff: parse_json_opt(row.get("state_diff")?),
        error: row.get("error")?,
    })
}

fn message_from_row(row: &Row) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get("id")?,
        node_execution_id: row.get("node_execution_id")?,
        order: row.get("order")?,
        role: row.get("role")?,
        content: parse_json_opt(row.get("content")?),
        model: row.get("model")?,
        provider: row.get("provider")?,
        input_tokens: row.get("input_tokens")?,
        output_tokens: row.get("output_tokens")?,
        total_tokens: row.get("total_tokens")?,
        cost: row.get("cost")?,
        latency_ms: row.get("latency_ms")?,
        tool_calls: parse_json_opt(row.get("tool_calls")?),
        tool_results: parse_json_opt(row.get("tool_results")?),
        raw_request: parse_json_opt(row.get("raw_request")?),
        raw_response: parse_json_opt(row.get("raw_response")?),
    })
}

fn edge_from_row(row: &Row) -> rusqlite::Result<Edge> {
    Ok(Edge {
        id: row.get("id")?,
        run_id: row.get("run_id")?,
        from_node: row.get("from_node")?,
        to_node: row.get("to_node")?,
        condition_label: row.get("condition_label")?,
        order: row.get("order")?,
    })
}

fn evaluation_from_row(row: &Row) -> rusqlite::Result<Evaluation> {
    Ok(Evaluation {
        id: row.get("id")?,
        run_id: row.get("run_id")?,
        node_execution_id: row.get("node_execution_id")?,
        evaluator: row.get("evaluator")?,
        score: row.get("score")?,
        label: row.get("label")?,
        comment: row.get("comment")?,
        is_automated: row.get::<_, i64>("is_automated")? != 0,
        created_at: row.get("created_at")?,
    })
}

pub async fn list_runs(pool: &DbPool, filter: RunListFilter) -> Result<Vec<Run>> {
    db::with_conn(pool, move |conn| {
        let mut sql = String::from("SELECT * FROM runs WHERE 1=1");
        let mut args: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(f) = &filter.framework {
            sql.push_str(" AND framework = ?");
            args.push(Box::new(f.clone()));
        }
        if let Some(s) = &filter.status {
            sql.push_str(" AND status = ?");
            args.push(Box::new(s.clone()));
        }
        if let Some(a) = &filter.agent_id {
            sql.push_str(" AND agent_id = ?");
            args.push(Box::new(a.clone()));
        }
        if let Some(g) = &filter.graph_id {
            sql.push_str(" AND graph_id = ?");
            args.push(Box::new(g.clone()));
        }
        sql.push_str(" ORDER BY started_at DESC LIMIT ? OFFSET ?");
        args.push(Box::new(filter.limit));
        args.push(Box::new(filter.offset));

        let mut stmt = conn.prepare(&sql).map_err(Error::storage)?;
        let refs: Vec<&dyn rusqlite::types::ToSql> = args.iter().map(|b| b.as_ref()).collect();
        let rows = stmt
            .query_map(refs.as_slice(), run_from_row)
            .map_err(Error::storage)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(Error::storage)?);
        }
        Ok(out)
    })
    .await
}

pub async fn get_run_detail(pool: &DbPool, run_id: String) -> Result<RunDetail> {
    db::with_conn(pool, move |conn| {
        let run = conn
            .query_row("SELECT * FROM runs WHERE id = ?1", params![run_id], run_from_row)
            .optional()
            .map_err(Error::storage)?
            .ok_or_else(|| Error::NotFound(format!("run '{run_id}' not found")))?;

        let mut node_stmt = conn
            .prepare("SELECT * FROM node_executions WHERE run_id = ?1 ORDER BY \"order\"")
            .map_err(Error::storage)?;
        let nodes: Vec<NodeExecution> = node_stmt
            .query_map(params![run_id], node_from_row)
            .map_err(Error::storage)?
            .collect::<rusqlite::Result<_>>()
            .map_err(Error::storage)?;

        let mut node_details = Vec::with_capacity(nodes.len());
        for node in nodes {
            let mut msg_stmt = conn
                .prepare("SELECT * FROM messages WHERE node_execution_id = ?1 ORDER BY \"order\"")
                .map_err(Error::storage)?;
            let messages: Vec<Message> = msg_stmt
                .query_map(params![node.id], message_from_row)
                .map_err(Error::storage)?
                .collect::<rusqlite::Result<_>>()
                .map_err(Error::storage)?;
            node_details.push(NodeExecutionDetail { node, messages });
        }

        let mut edge_stmt = conn
            .prepare("SELECT * FROM edges WHERE run_id = ?1 ORDER BY \"order\"")
            .map_err(Error::storage)?;
        let edges: Vec<Edge> = edge_stmt
            .query_map(params![run_id], edge_from_row)
            .map_err(Error::storage)?
            .collect::<rusqlite::Result<_>>()
            .map_err(Error::storage)?;

        Ok(RunDetail { run, nodes: node_details, edges })
    })
    .await
}

#[derive(Debug, Serialize)]
pub struct RunGraph {
    pub nodes: Vec<NodeExecution>,
    pub edges: Vec<Edge>,
}

pub async fn get_run_graph(pool: &DbPool, run_id: String) -> Result<RunGraph> {
    db::with_conn(pool, move |conn| {
        let exists: Option<String> = conn
            .query_row("SELECT id FROM runs WHERE id = ?1", params![run_id], |r| r.get(0))
            .optional()
            .map_err(Error::storage)?;
        if exists.is_none() {
            return Err(Error::NotFound(format!("run '{run_id}' not found")));
        }

        let mut node_stmt = conn
            .prepare("SELECT * FROM node_executions WHERE run_id = ?1 ORDER BY \"order\"")
            .map_err(Error::storage)?;
        let nodes: Vec<NodeExecution> = node_stmt
            .query_map(params![run_id], node_from_row)
            .map_err(Error::storage)?
            .collect::<rusqlite::Result<_>>()
            .map_err(Error::storage)?;

        let mut edge_stmt = conn
            .prepare("SELECT * FROM edges WHERE run_id = ?1 ORDER BY \"order\"")
            .map_err(Error::storage)?;
        let edges: Vec<Edge> = edge_stmt
            .query_map(params![run_id], edge_from_row)
            .map_err(Error::storage)?
            .collect::<rusqlite::Result<_>>()
            .map_err(Error::storage)?;

        Ok(RunGraph { nodes, edges })
    })
    .await
}

pub async fn get_node_detail(
    pool: &DbPool,
    run_id: String,
    node_id: String,
) -> Result<NodeExecutionDetail> {
    db::with_conn(pool, move |conn| {
        let node = conn
            .query_row(
                "SELECT * FROM node_executions WHERE run_id = ?1 AND id = ?2",
                params![run_id, node_id],
                node_from_row,
            )
            .optional()
            .map_err(Error::storage)?
            .ok_or_else(|| Error::NotFound(format!("node '{node_id}' not found in run '{run_id}'")))?;

        let mut msg_stmt = conn
            .prepare("SELECT * FROM messages WHERE node_execution_id = ?1 ORDER BY \"order\"")
            .map_err(Error::storage)?;
        let messages: Vec<Message> = msg_stmt
            .query_map(params![node.id], message_from_row)
            .map_err(Error::storage)?
            .collect::<rusqlite::Result<_>>()
            .map_err(Error::storage)?;

        Ok(NodeExecutionDetail { node, messages })
    })
    .await
}

pub async fn delete_run(pool: &DbPool, run_id: String) -> Result<bool> {
    db::with_conn(pool, move |conn| {
        let affected = conn
            .execute("DELETE FROM runs WHERE id = ?1", params![run_id])
            .map_err(Error::storage)?;
        Ok(affected > 0)
    })
    .await
}

pub async fn create_evaluation(
    pool: &DbPool,
    payload: crate::models::EvaluationPayload,
) -> Result<Evaluation> {
    db::with_conn(pool, move |conn| {
        let run_exists: Option<String> = conn
            .query_row(
                "SELECT id FROM runs WHERE id = ?1",
                params![payload.run_id],
                |r| r.get(0),
            )
            .optional()
            .map_err(Error::storage)?;
        if run_exists.is_none() {
            return Err(Error::NotFound(format!("run '{}' not found", payload.run_id)));
        }
        if let Some(node_id) = &payload.node_execution_id {
            let node_exists: Option<String> = conn
                .query_row(
                    "SELECT id FROM node_executions WHERE id = ?1 AND run_id = ?2",
                    params![node_id, payload.run_id],
                    |r| r.get(0),
                )
                .optional()
                .map_err(Error::storage)?;
            if node_exists.is_none() {
                return Err(Error::NotFound(format!("node '{node_id}' not found in run")));
            }
        }

        let id = crate::util::new_id();
        let created_at = now_str();
        conn.execute(
            "INSERT INTO evaluations (id, run_id, node_execution_id, evaluator, score, label,
                                       comment, is_automated, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                id,
                payload.run_id,
                payload.node_execution_id,
                payload.evaluator,
                payload.score,
                payload.label,
                payload.comment,
                payload.is_automated as i64,
                created_at,
            ],
        )
        .map_err(Error::storage)?;

        Ok(Evaluation {
            id,
            run_id: payload.run_id,
            node_execution_id: payload.node_execution_id,
            evaluator: payload.evaluator,
            score: payload.score,
            label: payload.label,
            comment: payload.comment,
            is_automated: payload.is_automated,
            created_at,
        })
    })
    .await
}

pub async fn list_evaluations(pool: &DbPool, run_id: String) -> Result<Vec<Evaluation>> {
    db::with_conn(pool, move |conn| {
        let mut stmt = conn
            .prepare("SELECT * FROM evaluations WHERE run_id = ?1 ORDER BY created_at")
            .map_err(Error::storage)?;
        let rows = stmt
            .query_map(params![run_id], evaluation_from_row)
            .map_err(Error::storage)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(Error::storage)?);
        }
        Ok(out)
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::ingest_trace;
    use crate::models::{MessagePayload, NodePayload, TracePayload};

    fn payload(run_id: &str) -> TracePayload {
        TracePayload {
            run_id: Some(run_id.to_string()),
            graph_id: Some("g".to_string()),
            graph_version: None,
            framework: Some("langgraph".to_string()),
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
                    content: None,
                    model: None,
                    provider: None,
                    input_tokens: None,
                    output_tokens: None,
                    total_tokens: Some(1),
                    cost: None,
                    latency_ms: None,
                    tool_calls: None,
                    tool_results: None,
                    raw_request: None,
                    raw_response: None,
                }],
            }],
            edges: vec![],
        }
    }

    #[tokio::test]
    async fn get_run_detail_round_trips_nodes_and_messages() {
        let pool = db::test_pool();
        ingest_trace(&pool, payload("r1")).await.unwrap();

        let detail = get_run_detail(&pool, "r1".to_string()).await.unwrap();
        assert_eq!(detail.run.id, "r1");
        assert_eq!(detail.nodes.len(), 1);
        assert_eq!(detail.nodes[0].messages.len(), 1);
    }

    #[tokio::test]
    async fn get_run_detail_missing_is_not_found() {
        let pool = db::test_pool();
        let err = get_run_detail(&pool, "missing".to_string()).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn list_runs_filters_by_framework() {
        let pool = db::test_pool();
        ingest_trace(&pool, payload("r1")).await.unwrap();
        let mut other = payload("r2");
        other.framework = Some("crewai".to_string());
        ingest_trace(&pool, other).await.unwrap();

        let filter = RunListFilter {
            framework: Some("langgraph".to_string()),
            ..RunListFilter::new(None, None)
        };
        let runs = list_runs(&pool, filter).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].id, "r1");
    }

    #[tokio::test]
    async fn deleting_run_cascades_to_children_and_404s_afterward() {
        let pool = db::test_pool();
        ingest_trace(&pool, payload("r1")).await.unwrap();

        let deleted = delete_run(&pool, "r1".to_string()).await.unwrap();
        assert!(deleted);

        let err = get_run_detail(&pool, "r1".to_string()).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn evaluation_requires_existing_run() {
        let pool = db::test_pool();
        let payload = crate::models::EvaluationPayload {
            run_id: "missing".to_string(),
            node_execution_id: None,
            evaluator: "judge".to_string(),
            score: Some(0.9),
            label: None,
            comment: None,
            is_automated: true,
        };
        let err = create_evaluation(&pool, payload).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
