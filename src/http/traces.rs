use axum::extract::State;
use axum::Json;

use crate::error::Result;
use crate::ingest;
use crate::models::{IngestResult, TracePayload};
use crate::SharedState;

pub async fn ingest_trace(
    State(state): State<SharedState>,
    Json(payload): Json<TracePayload>,
) -> Result<Json<IngestResult>> {
    let result = ingest::ingest_trace(&state.pool, payload).await?;
    Ok(Json(result))
}
