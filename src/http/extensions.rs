use axum::extract::{Multipart, Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::extensions::manifest::{ExtensionManifest, Permissions};
use crate::extensions::storage;
use crate::extensions::registry;
use crate::models::{Extension, ExtensionNetworkAudit};
use crate::sandbox::audit_store::AuditQuery;
use crate::SharedState;

pub async fn list_extensions(State(state): State<SharedState>) -> Result<Json<Vec<Extension>>> {
    let extensions = registry::list(&state.pool).await?;
    Ok(Json(extensions))
}

pub async fn get_extension(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Extension>> {
    let ext = registry::get_by_id(&state.pool, id).await?;
    Ok(Json(ext))
}

#[derive(serde::Serialize)]
pub struct InstallResult {
    #[serde(flatten)]
    pub extension: Extension,
    pub load_diagnostic: Option<String>,
}

/// Accepts a `multipart/form-data` body with one `package` field holding the
/// extension's zipped `manifest.json` + `backend/`/`frontend/` tree.
pub async fn install_extension(
    State(state): State<SharedState>,
    mut multipart: Multipart,
) -> Result<Json<InstallResult>> {
    let mut package: Option<Vec<u8>> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::validation("package", format!("invalid multipart body: {e}")))?
    {
        if field.name() == Some("package") {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| Error::validation("package", format!("failed to read upload: {e}")))?;
            package = Some(bytes.to_vec());
        }
    }
    let package = package.ok_or_else(|| Error::validation("package", "missing 'package' field"))?;

    let (extension, load_diagnostic) = state.lifecycle.install(&package).await?;
    Ok(Json(InstallResult { extension, load_diagnostic }))
}

pub async fn uninstall_extension(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Extension>> {
    let ext = state.lifecycle.uninstall(&id).await?;
    Ok(Json(ext))
}

#[derive(Debug, Deserialize)]
pub struct SetStatusPayload {
    pub enabled: bool,
}

pub async fn set_extension_status(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(payload): Json<SetStatusPayload>,
) -> Result<Json<Extension>> {
    let ext = state.lifecycle.set_status(&id, payload.enabled).await?;
    Ok(Json(ext))
}

pub async fn get_extension_permissions(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Permissions>> {
    let ext = registry::get_by_id(&state.pool, id).await?;
    let manifest: ExtensionManifest = serde_json::from_value(ext.manifest)
        .map_err(|e| Error::storage(format!("corrupt stored manifest: {e}")))?;
    Ok(Json(manifest.permissions))
}

/// The subset of each enabled extension's manifest the frontend needs to
/// render contributed UI surfaces (sidebar panels, widgets, menu entries).
pub async fn frontend_manifest(State(state): State<SharedState>) -> Result<Json<Vec<Value>>> {
    let extensions = registry::list_enabled(&state.pool).await?;
    let manifests = extensions
        .into_iter()
        .filter(|ext| ext.has_frontend)
        .map(|ext| {
            serde_json::json!({
                "id": ext.id,
                "name": ext.name,
                "version": ext.version,
                "manifest": ext.manifest,
            })
        })
        .collect();
    Ok(Json(manifests))
}

#[derive(Debug, Deserialize)]
pub struct DataQuery {
    pub prefix: Option<String>,
}

pub async fn list_extension_data(
    State(state): State<SharedState>,
    Path(name): Path<String>,
    Query(q): Query<DataQuery>,
) -> Result<Json<Value>> {
    let entries = storage::get_all(&state.pool, &name, q.prefix).await?;
    let object: serde_json::Map<String, Value> = entries.into_iter().collect();
    Ok(Json(Value::Object(object)))
}

pub async fn get_extension_data(
    State(state): State<SharedState>,
    Path((name, key)): Path<(String, String)>,
) -> Result<Json<Value>> {
    let value = storage::get(&state.pool, &name, &key)
        .await?
        .ok_or_else(|| Error::NotFound(format!("key '{key}' not found for extension '{name}'")))?;
    Ok(Json(value))
}

pub async fn put_extension_data(
    State(state): State<SharedState>,
    Path((name, key)): Path<(String, String)>,
    Json(value): Json<Value>,
) -> Result<Json<Value>> {
    storage::set(&state.pool, &name, &key, value.clone()).await?;
    Ok(Json(value))
}

pub async fn delete_extension_data(
    State(state): State<SharedState>,
    Path((name, key)): Path<(String, String)>,
) -> Result<Json<Value>> {
    let deleted = storage::delete(&state.pool, &name, &key).await?;
    Ok(Json(serde_json::json!({ "deleted": deleted })))
}

/// The `{id}/data...` variants resolve the extension's name once, then
/// delegate to the same namespaced-storage functions the `by-name` routes
/// use — both paths into storage CRUD named in the HTTP surface.
pub async fn list_extension_data_by_id(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Query(q): Query<DataQuery>,
) -> Result<Json<Value>> {
    let ext = registry::get_by_id(&state.pool, id).await?;
    let entries = storage::get_all(&state.pool, &ext.name, q.prefix).await?;
    let object: serde_json::Map<String, Value> = entries.into_iter().collect();
    Ok(Json(Value::Object(object)))
}

pub async fn get_extension_data_by_id(
    State(state): State<SharedState>,
    Path((id, key)): Path<(String, String)>,
) -> Result<Json<Value>> {
    let ext = registry::get_by_id(&state.pool, id).await?;
    let value = storage::get(&state.pool, &ext.name, &key)
        .await?
        .ok_or_else(|| Error::NotFound(format!("key '{key}' not found for extension '{}'", ext.name)))?;
    Ok(Json(value))
}

pub async fn put_extension_data_by_id(
    State(state): State<SharedState>,
    Path((id, key)): Path<(String, String)>,
    Json(value): Json<Value>,
) -> Result<Json<Value>> {
    let ext = registry::get_by_id(&state.pool, id).await?;
    storage::set(&state.pool, &ext.name, &key, value.clone()).await?;
    Ok(Json(value))
}

pub async fn delete_extension_data_by_id(
    State(state): State<SharedState>,
    Path((id, key)): Path<(String, String)>,
) -> Result<Json<Value>> {
    let ext = registry::get_by_id(&state.pool, id).await?;
    let deleted = storage::delete(&state.pool, &ext.name, &key).await?;
    Ok(Json(serde_json::json!({ "deleted": deleted })))
}

#[derive(Debug, Deserialize)]
pub struct AuditListQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub allowed_only: Option<bool>,
    pub blocked_only: Option<bool>,
}

impl From<AuditListQuery> for AuditQuery {
    fn from(q: AuditListQuery) -> Self {
        let mut query = AuditQuery::new(q.limit, q.offset);
        query.allowed_only = q.allowed_only.unwrap_or(false);
        query.blocked_only = q.blocked_only.unwrap_or(false);
        query
    }
}

pub async fn get_extension_audit(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Query(q): Query<AuditListQuery>,
) -> Result<Json<Vec<ExtensionNetworkAudit>>> {
    let mut query: AuditQuery = q.into();
    query.extension_id = Some(id);
    let rows = crate::sandbox::audit_store::query(&state.pool, query).await?;
    Ok(Json(rows))
}

pub async fn get_all_audit(
    State(state): State<SharedState>,
    Query(q): Query<AuditListQuery>,
) -> Result<Json<Vec<ExtensionNetworkAudit>>> {
    let query: AuditQuery = q.into();
    let rows = crate::sandbox::audit_store::query(&state.pool, query).await?;
    Ok(Json(rows))
}
