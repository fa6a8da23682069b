//! Callback endpoint an extension's backend process uses to make an
//! outbound HTTP request. The backend process has no network access of its
//! own permission-wise; every `fetch`-like call it wants to make comes back
//! to the host as a POST here, which is where [`crate::sandbox::Sandbox`]
//! actually mediates the request.

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::extensions::manifest::ExtensionManifest;
use crate::extensions::registry;
use crate::sandbox::OutboundRequest;
use crate::SharedState;

#[derive(Debug, Deserialize)]
pub struct EgressPayload {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub body: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EgressResult {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

/// `POST /api/ext-backends/{name}/_egress` — resolve `name`'s declared network
/// permissions and proxy the request through the sandbox.
pub async fn egress(
    State(state): State<SharedState>,
    Path(name): Path<String>,
    Json(payload): Json<EgressPayload>,
) -> Result<Json<EgressResult>> {
    let ext = registry::get_by_name(&state.pool, name.clone()).await?;
    let manifest: ExtensionManifest = serde_json::from_value(ext.manifest.clone())
        .map_err(|e| Error::storage(format!("corrupt stored manifest: {e}")))?;

    let req = OutboundRequest {
        method: payload.method,
        url: payload.url,
        headers: payload.headers,
        body: payload.body.map(String::into_bytes),
    };

    let response = state
        .sandbox
        .proxy_request(&ext.id, &ext.name, &manifest.permissions.network, req)
        .await?;

    Ok(Json(EgressResult {
        status: response.status,
        headers: response.headers,
        body: String::from_utf8_lossy(&response.body).to_string(),
    }))
}
