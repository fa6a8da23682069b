//! Append-only store for outbound network audit rows, sharing the main
//! connection pool so deleting an extension cascades its audit history
//! automatically instead of needing a separate retention sweep.

use rusqlite::{params, Row};

use crate::db::{self, DbPool};
use crate::error::{Error, Result};
use crate::models::ExtensionNetworkAudit;

fn audit_from_row(row: &Row) -> rusqlite::Result<ExtensionNetworkAudit> {
    Ok(ExtensionNetworkAudit {
        id: row.get::<_, i64>("id")?.to_string(),
        extension_id: row.get("extension_id")?,
        extension_name: row.get("extension_name")?,
        target_url: row.get("target_url")?,
        method: row.get("method")?,
        request_headers: serde_json::from_str(&row.get::<_, String>("request_headers")?)
            .unwrap_or(serde_json::Value::Null),
        request_body_hash: row.get("request_body_hash")?,
        request_body_size: row.get("request_body_size")?,
        response_status: row.get("response_status")?,
        response_time_ms: row.get("response_time_ms")?,
        response_headers: row
            .get::<_, Option<String>>("response_headers")?
            .and_then(|s| serde_json::from_str(&s).ok()),
        response_body_excerpt: row.get("response_body_excerpt")?,
        response_body_size: row.get("response_body_size")?,
        allowed: row.get::<_, i64>("allowed")? != 0,
        blocked_reason: row.get("blocked_reason")?,
        error: row.get("error")?,
        created_at: row.get("created_at")?,
    })
}

/// A fully-built audit row awaiting its rowid and timestamp, assigned by the
/// database at insert time.
pub struct NewAuditEntry {
    pub extension_id: String,
    pub extension_name: String,
    pub target_url: String,
    pub method: String,
    pub request_headers: serde_json::Value,
    pub request_body_hash: Option<String>,
    pub request_body_size: Option<i64>,
    pub response_status: Option<i64>,
    pub response_time_ms: Option<i64>,
    pub response_headers: Option<serde_json::Value>,
    pub response_body_excerpt: Option<String>,
    pub response_body_size: Option<i64>,
    pub allowed: bool,
    pub blocked_reason: Option<String>,
    pub error: Option<String>,
}

pub async fn insert(pool: &DbPool, entry: NewAuditEntry) -> Result<()> {
    db::with_conn(pool, move |conn| {
        let created_at = crate::util::now_str();
        conn.execute(
            "INSERT INTO extension_network_audit
               (extension_id, extension_name, target_url, method, request_headers,
                request_body_hash, request_body_size, response_status, response_time_ms,
                response_headers, response_body_excerpt, response_body_size, allowed,
                blocked_reason, error, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                entry.extension_id,
                entry.extension_name,
                entry.target_url,
                entry.method,
                entry.request_headers.to_string(),
                entry.request_body_hash,
                entry.request_body_size,
                entry.response_status,
                entry.response_time_ms,
                entry.response_headers.map(|v| v.to_string()),
                entry.response_body_excerpt,
                entry.response_body_size,
                entry.allowed as i64,
                entry.blocked_reason,
                entry.error,
                created_at,
            ],
        )
        .map_err(Error::storage)?;
        Ok(())
    })
    .await
}

#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub extension_id: Option<String>,
    pub limit: i64,
    pub offset: i64,
    pub allowed_only: bool,
    pub blocked_only: bool,
}

impl AuditQuery {
    pub fn new(limit: Option<i64>, offset: Option<i64>) -> Self {
        Self {
            limit: limit.unwrap_or(50).clamp(1, 1000),
            offset: offset.unwrap_or(0).max(0),
            ..Default::default()
        }
    }
}

pub async fn query(pool: &DbPool, q: AuditQuery) -> Result<Vec<ExtensionNetworkAudit>> {
    db::with_conn(pool, move |conn| {
        let mut sql = String::from("SELECT * FROM extension_network_audit WHERE 1=1");
        let mut args: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(ext_id) = &q.extension_id {
            sql.push_str(" AND extension_id = ?");
            args.push(Box::new(ext_id.clone()));
        }
        if q.allowed_only {
            sql.push_str(" AND allowed = 1");
        }
        if q.blocked_only {
            sql.push_str(" AND allowed = 0");
        }
        sql.push_str(" ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?");
        args.push(Box::new(q.limit));
        args.push(Box::new(q.offset));

        let mut stmt = conn.prepare(&sql).map_err(Error::storage)?;
        let refs: Vec<&dyn rusqlite::types::ToSql> = args.iter().map(|b| b.as_ref()).collect();
        let rows = stmt.query_map(refs.as_slice(), audit_from_row).map_err(Error::storage)?;
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
    use crate::extensions::registry::{self, NewExtension};

    async fn seed_extension(pool: &DbPool, name: &str) -> String {
        let ext = registry::upsert_extension(
            pool,
            NewExtension {
                name: name.to_string(),
                version: "1.0.0".to_string(),
                description: None,
                manifest: serde_json::json!({}),
                install_path: "/tmp/x".to_string(),
                has_backend: false,
                has_frontend: false,
                enabled: true,
            },
        )
        .await
        .unwrap();
        ext.id
    }

    fn denied_entry(ext_id: &str, ext_name: &str) -> NewAuditEntry {
        NewAuditEntry {
            extension_id: ext_id.to_string(),
            extension_name: ext_name.to_string(),
            target_url: "https://evil.com/x".to_string(),
            method: "GET".to_string(),
            request_headers: serde_json::json!({}),
            request_body_hash: None,
            request_body_size: None,
            response_status: None,
            response_time_ms: None,
            response_headers: None,
            response_body_excerpt: None,
            response_body_size: None,
            allowed: false,
            blocked_reason: Some("URL not in whitelist: https://evil.com/x".to_string()),
            error: None,
        }
    }

    #[tokio::test]
    async fn insert_and_query_denied_rows() {
        let pool = db::test_pool();
        let ext_id = seed_extension(&pool, "x").await;
        insert(&pool, denied_entry(&ext_id, "x")).await.unwrap();

        let rows = query(&pool, AuditQuery::new(None, None)).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].allowed);
        assert_eq!(
            rows[0].blocked_reason.as_deref(),
            Some("URL not in whitelist: https://evil.com/x")
        );
    }

    #[tokio::test]
    async fn blocked_only_filter() {
        let pool = db::test_pool();
        let ext_id = seed_extension(&pool, "x").await;
        insert(&pool, denied_entry(&ext_id, "x")).await.unwrap();
        let mut allowed = denied_entry(&ext_id, "x");
        allowed.allowed = true;
        allowed.blocked_reason = None;
        allowed.response_status = Some(200);
        insert(&pool, allowed).await.unwrap();

        let q = AuditQuery {
            blocked_only: true,
            ..AuditQuery::new(None, None)
        };
        let rows = query(&pool, q).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].allowed);
    }
}
