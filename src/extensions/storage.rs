//! Namespaced per-extension key/value store.

use rusqlite::{params, OptionalExtension};
use serde_json::Value;

use crate::db::{self, DbPool};
use crate::error::{Error, Result};
use crate::util::{new_id, now_str};

async fn resolve_extension_id(pool: &DbPool, ext_name: &str) -> Result<String> {
    let ext_name = ext_name.to_string();
    db::with_conn(pool, move |conn| {
        conn.query_row(
            "SELECT id FROM extensions WHERE name = ?1",
            params![ext_name],
            |r| r.get(0),
        )
        .optional()
        .map_err(Error::storage)?
        .ok_or_else(|| Error::NotFound(format!("unknown extension '{ext_name}'")))
    })
    .await
}

pub async fn get(pool: &DbPool, ext_name: &str, key: &str) -> Result<Option<Value>> {
    let ext_id = resolve_extension_id(pool, ext_name).await?;
    let key = key.to_string();
    db::with_conn(pool, move |conn| {
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM extension_data WHERE extension_id = ?1 AND key = ?2",
                params![ext_id, key],
                |r| r.get(0),
            )
            .optional()
            .map_err(Error::storage)?;
        Ok(value.and_then(|v| serde_json::from_str(&v).ok()))
    })
    .await
}

pub async fn set(pool: &DbPool, ext_name: &str, key: &str, value: Value) -> Result<()> {
    let ext_id = resolve_extension_id(pool, ext_name).await?;
    let key = key.to_string();
    db::with_conn(pool, move |conn| {
        let value_json = value.to_string();
        let updated_at = now_str();
        conn.execute(
            "INSERT INTO extension_data (id, extension_id, key, value, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(extension_id, key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![new_id(), ext_id, key, value_json, updated_at],
        )
        .map_err(Error::storage)?;
        Ok(())
    })
    .await
}

pub async fn delete(pool: &DbPool, ext_name: &str, key: &str) -> Result<bool> {
    let ext_id = resolve_extension_id(pool, ext_name).await?;
    let key = key.to_string();
    db::with_conn(pool, move |conn| {
        let affected = conn
            .execute(
                "DELETE FROM extension_data WHERE extension_id = ?1 AND key = ?2",
                params![ext_id, key],
            )
            .map_err(Error::storage)?;
        Ok(affected > 0)
    })
    .await
}

pub async fn list_keys(pool: &DbPool, ext_name: &str, prefix: Option<String>) -> Result<Vec<String>> {
    let ext_id = resolve_extension_id(pool, ext_name).await?;
    db::with_conn(pool, move |conn| {
        let mut stmt = conn
            .prepare("SELECT key FROM extension_data WHERE extension_id = ?1 AND key LIKE ?2 ORDER BY key")
            .map_err(Error::storage)?;
        let like_pattern = format!("{}%", prefix.unwrap_or_default().replace('%', "\\%"));
        let rows = stmt
            .query_map(params![ext_id, like_pattern], |r| r.get(0))
            .map_err(Error::storage)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(Error::storage)?);
        }
        Ok(out)
    })
    .await
}

pub async fn get_all(
    pool: &DbPool,
    ext_name: &str,
    prefix: Option<String>,
) -> Result<Vec<(String, Value)>> {
    let ext_id = resolve_extension_id(pool, ext_name).await?;
    db::with_conn(pool, move |conn| {
        let mut stmt = conn
            .prepare("SELECT key, value FROM extension_data WHERE extension_id = ?1 AND key LIKE ?2 ORDER BY key")
            .map_err(Error::storage)?;
        let like_pattern = format!("{}%", prefix.unwrap_or_default().replace('%', "\\%"));
        let rows = stmt
            .query_map(params![ext_id, like_pattern], |r| {
                let key: String = r.get(0)?;
                let value: String = r.get(1)?;
                Ok((key, value))
            })
            .map_err(Error::storage)?;
        let mut out = Vec::new();
        for row in rows {
            let (key, value) = row.map_err(Error::storage)?;
            out.push((key, serde_json::from_str(&value).unwrap_or(Value::Null)));
        }
        Ok(out)
    })
    .await
}

pub async fn clear(pool: &DbPool, ext_name: &str) -> Result<usize> {
    let ext_id = resolve_extension_id(pool, ext_name).await?;
    db::with_conn(pool, move |conn| {
        let affected = conn
            .execute("DELETE FROM extension_data WHERE extension_id = ?1", params![ext_id])
            .map_err(Error::storage)?;
        Ok(affected)
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extensions::registry;

    async fn seed_extension(pool: &DbPool, name: &str) {
        registry::upsert_extension(
            pool,
            registry::NewExtension {
                name: name.to_string(),
                version: "1.0.0".to_string(),
                description: None,
                manifest: serde_json::json!({}),
                install_path: format!("/tmp/{name}"),
                has_backend: false,
                has_frontend: false,
                enabled: true,
            },
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let pool = db::test_pool();
        seed_extension(&pool, "a").await;

        set(&pool, "a", "k", serde_json::json!({"x": 1})).await.unwrap();
        let v = get(&pool, "a", "k").await.unwrap();
        assert_eq!(v, Some(serde_json::json!({"x": 1})));
    }

    #[tokio::test]
    async fn set_is_upsert() {
        let pool = db::test_pool();
        seed_extension(&pool, "a").await;

        set(&pool, "a", "k", serde_json::json!(1)).await.unwrap();
        set(&pool, "a", "k", serde_json::json!(2)).await.unwrap();
        assert_eq!(get(&pool, "a", "k").await.unwrap(), Some(serde_json::json!(2)));

        let keys = list_keys(&pool, "a", None).await.unwrap();
        assert_eq!(keys, vec!["k".to_string()]);
    }

    #[tokio::test]
    async fn same_key_name_is_isolated_per_extension() {
        let pool = db::test_pool();
        seed_extension(&pool, "a").await;
        seed_extension(&pool, "b").await;

        set(&pool, "a", "shared_key", serde_json::json!("a-value")).await.unwrap();
        set(&pool, "b", "shared_key", serde_json::json!("b-value")).await.unwrap();

        assert_eq!(get(&pool, "a", "shared_key").await.unwrap(), Some(serde_json::json!("a-value")));
        assert_eq!(get(&pool, "b", "shared_key").await.unwrap(), Some(serde_json::json!("b-value")));

        let deleted = delete(&pool, "a", "shared_key").await.unwrap();
        assert!(deleted);
        assert_eq!(get(&pool, "a", "shared_key").await.unwrap(), None);
        assert_eq!(get(&pool, "b", "shared_key").await.unwrap(), Some(serde_json::json!("b-value")));
    }

    #[tokio::test]
    async fn unknown_extension_errors() {
        let pool = db::test_pool();
        let err = get(&pool, "ghost", "k").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn clear_removes_all_keys_for_extension_only() {
        let pool = db::test_pool();
        seed_extension(&pool, "a").await;
        seed_extension(&pool, "b").await;
        set(&pool, "a", "k1", serde_json::json!(1)).await.unwrap();
        set(&pool, "a", "k2", serde_json::json!(2)).await.unwrap();
        set(&pool, "b", "k1", serde_json::json!(1)).await.unwrap();

        let count = clear(&pool, "a").await.unwrap();
        assert_eq!(count, 2);
        assert!(list_keys(&pool, "a", None).await.unwrap().is_empty());
        assert_eq!(list_keys(&pool, "b", None).await.unwrap().len(), 1);
    }
}
