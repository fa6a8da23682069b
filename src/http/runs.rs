use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

use crate::error::Result;
use crate::models::{Evaluation, EvaluationPayload, NodeExecutionDetail, Run, RunDetail};
use crate::query::{self, RunGraph, RunListFilter};
use crate::SharedState;

#[derive(Debug, Deserialize)]
pub struct ListRunsQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub framework: Option<String>,
    pub status: Option<String>,
    pub agent_id: Option<String>,
    pub graph_id: Option<String>,
}

pub async fn list_runs(
    State(state): State<SharedState>,
    Query(q): Query<ListRunsQuery>,
) -> Result<Json<Vec<Run>>> {
    let mut filter = RunListFilter::new(q.limit, q.offset);
    filter.framework = q.framework;
    filter.status = q.status;
    filter.agent_id = q.agent_id;
    filter.graph_id = q.graph_id;
    let runs = query::list_runs(&state.pool, filter).await?;
    Ok(Json(runs))
}

pub async fn get_run(
    State(state): State<SharedState>,
    Path(run_id): Path<String>,
) -> Result<Json<RunDetail>> {
    let detail = query::get_run_detail(&state.pool, run_id).await?;
    Ok(Json(detail))
}

pub async fn get_run_graph(
    State(state): State<SharedState>,
    Path(run_id): Path<String>,
) -> Result<Json<RunGraph>> {
    let graph = query::get_run_graph(&state.pool, run_id).await?;
    Ok(Json(graph))
}

pub async fn get_node(
    State(state): State<SharedState>,
    Path((run_id, node_id)): Path<(String, String)>,
) -> Result<Json<NodeExecutionDetail>> {
    let node = query::get_node_detail(&state.pool, run_id, node_id).await?;
    Ok(Json(node))
}

pub async fn delete_run(
    State(state): State<SharedState>,
    Path(run_id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let deleted = query::delete_run(&state.pool, run_id).await?;
    Ok(Json(serde_json::json!({ "deleted": deleted })))
}

pub async fn create_evaluation(
    State(state): State<SharedState>,
    Json(payload): Json<EvaluationPayload>,
) -> Result<Json<Evaluation>> {
    let evaluation = query::create_evaluation(&state.pool, payload).await?;
    Ok(Json(evaluation))
}

pub async fn list_evaluations(
    State(state): State<SharedState>,
    Path(run_id): Path<String>,
) -> Result<Json<Vec<Evaluation>>> {
    let evaluations = query::list_evaluations(&state.pool, run_id).await?;
    Ok(Json(evaluations))
}
