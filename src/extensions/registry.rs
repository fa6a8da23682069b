//! Extension row CRUD against the `extensions` table — the persistent half
//! of the lifecycle manager. Mounting/unmounting live process state is
//! handled by [`super::lifecycle`]; this module only owns the database rows.

use rusqlite::{params, OptionalExtension, Row};
use serde_json::Value;

use crate::db::{self, DbPool};
use crate::error::{Error, Result};
use crate::models::Extension;
use crate::util::{new_id, now_str};

fn extension_from_row(row: &Row) -> rusqlite::Result<Extension> {
    let manifest_json: String = row.get("manifest")?;
    Ok(Extension {
        id: row.get("id")?,
        name: row.get("name")?,
        version: row.get("version")?,
        description: row.get("description")?,
        status: row.get("status")?,
        manifest: serde_json::from_str(&manifest_json).unwrap_or(Value::Null),
        install_path: row.get("install_path")?,
        has_backend: row.get::<_, i64>("has_backend")? != 0,
        has_frontend: row.get::<_, i64>("has_frontend")? != 0,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

pub struct NewExtension {
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    pub manifest: Value,
    pub install_path: String,
    pub has_backend: bool,
    pub has_frontend: bool,
    pub enabled: bool,
}

/// Insert a new extension row, or update it in place if `name` already
/// exists (an upgrade re-install). Returns the resulting row.
pub async fn upsert_extension(pool: &DbPool, new_ext: NewExtension) -> Result<Extension> {
    db::with_conn(pool, move |conn| {
        let existing_id: Option<String> = conn
            .query_row(
                "SELECT id FROM extensions WHERE name = ?1",
                params![new_ext.name],
                |r| r.get(0),
            )
            .optional()
            .map_err(Error::storage)?;

        let now = now_str();
        let manifest_json = new_ext.manifest.to_string();
        let status = if new_ext.enabled { "enabled" } else { "disabled" };

        let id = match existing_id {
            Some(id) => {
                conn.execute(
                    "UPDATE extensions SET version = ?1, description = ?2, status = ?3, manifest = ?4,
                                            install_path = ?5, has_backend = ?6, has_frontend = ?7,
                                            updated_at = ?8
                     WHERE id = ?9",
                    params![
                        new_ext.version,
                        new_ext.description,
                        status,
                        manifest_json,
                        new_ext.install_path,
                        new_ext.has_backend as i64,
                        new_ext.has_frontend as i64,
                        now,
                        id,
                    ],
                )
                .map_err(Error::storage)?;
                id
            }
            None => {
                let id = new_id();
                conn.execute(
                    "INSERT INTO extensions (id, name, version, description, status, manifest,
                                              install_path, has_backend, has_frontend, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    params![
                        id,
                        new_ext.name,
                        new_ext.version,
                        new_ext.description,
                        status,
                        manifest_json,
                        new_ext.install_path,
                        new_ext.has_backend as i64,
                        new_ext.has_frontend as i64,
                        now,
                        now,
                    ],
                )
                .map_err(Error::storage)?;
                id
            }
        };

        conn.query_row("SELECT * FROM extensions WHERE id = ?1", params![id], extension_from_row)
            .map_err(Error::storage)
    })
    .await
}

pub async fn get_by_id(pool: &DbPool, id: String) -> Result<Extension> {
    db::with_conn(pool, move |conn| {
        conn.query_row("SELECT * FROM extensions WHERE id = ?1", params![id], extension_from_row)
            .optional()
            .map_err(Error::storage)?
            .ok_or_else(|| Error::NotFound(format!("extension '{id}' not found")))
    })
    .await
}

pub async fn get_by_name(pool: &DbPool, name: String) -> Result<Extension> {
    db::with_conn(pool, move |conn| {
        conn.query_row("SELECT * FROM extensions WHERE name = ?1", params![name], extension_from_row)
            .optional()
            .map_err(Error::storage)?
            .ok_or_else(|| Error::NotFound(format!("extension '{name}' not found")))
    })
    .await
}

pub async fn list(pool: &DbPool) -> Result<Vec<Extension>> {
    db::with_conn(pool, move |conn| {
        let mut stmt = conn
            .prepare("SELECT * FROM extensions ORDER BY name")
            .map_err(Error::storage)?;
        let rows = stmt.query_map([], extension_from_row).map_err(Error::storage)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(Error::storage)?);
        }
        Ok(out)
    })
    .await
}

/// Enabled extensions only — used by the frontend-manifest endpoint and by
/// the MCP/HTTP surfaces that only care about live extensions.
pub async fn list_enabled(pool: &DbPool) -> Result<Vec<Extension>> {
    db::with_conn(pool, move |conn| {
        let mut stmt = conn
            .prepare("SELECT * FROM extensions WHERE status = 'enabled' ORDER BY name")
            .map_err(Error::storage)?;
        let rows = stmt.query_map([], extension_from_row).map_err(Error::storage)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(Error::storage)?);
        }
        Ok(out)
    })
    .await
}

pub async fn set_status(pool: &DbPool, id: String, enabled: bool) -> Result<Extension> {
    db::with_conn(pool, move |conn| {
        let status = if enabled { "enabled" } else { "disabled" };
        let now = now_str();
        let affected = conn
            .execute(
                "UPDATE extensions SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status, now, id],
            )
            .map_err(Error::storage)?;
        if affected == 0 {
            return Err(Error::NotFound(format!("extension '{id}' not found")));
        }
        conn.query_row("SELECT * FROM extensions WHERE id = ?1", params![id], extension_from_row)
            .map_err(Error::storage)
    })
    .await
}

pub async fn delete(pool: &DbPool, id: String) -> Result<Extension> {
    db::with_conn(pool, move |conn| {
        let ext = conn
            .query_row("SELECT * FROM extensions WHERE id = ?1", params![id], extension_from_row)
            .optional()
            .map_err(Error::storage)?
            .ok_or_else(|| Error::NotFound(format!("extension '{id}' not found")))?;
        conn.execute("DELETE FROM extensions WHERE id = ?1", params![id])
            .map_err(Error::storage)?;
        Ok(ext)
    })
    .await
}
