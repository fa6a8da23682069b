//! Forwards `/api/ext-backends/<name>/*rest` to a mounted extension's backend
//! process. A single wildcard route backs every extension rather than one
//! route per mount, since axum has no API for adding/removing routes from a
//! running router — the mount table in [`crate::extensions::lifecycle`] is
//! the live source of truth, checked on every request. Lives under its own
//! static prefix, separate from `/api/extensions/{id}`, so the two routers'
//! path parameters (`name` here, `id` there) never share a tree position.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::Value;

use crate::error::Error;
use crate::SharedState;

pub async fn proxy_to_backend(
    State(state): State<SharedState>,
    Path((name, rest)): Path<(String, String)>,
    method: axum::http::Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(mount) = state.lifecycle.mount_for(&name).await else {
        return (StatusCode::NOT_FOUND, format!("extension '{name}' has no mounted backend")).into_response();
    };

    let forwarded_headers: Vec<(String, String)> = headers
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
        .collect();

    let body_value: Value = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap_or(Value::String(String::from_utf8_lossy(&body).to_string()))
    };

    let path = format!("/{rest}");
    let result = mount
        .process
        .execute(method.as_str(), &path, &forwarded_headers, &body_value)
        .await;

    match result {
        Ok(backend_response) => {
            let status = StatusCode::from_u16(backend_response.status).unwrap_or(StatusCode::OK);
            (status, Json(backend_response.body)).into_response()
        }
        Err(e @ Error::ExtensionLoad(_)) => (StatusCode::BAD_GATEWAY, e.to_string()).into_response(),
        Err(e) => e.into_response(),
    }
}
