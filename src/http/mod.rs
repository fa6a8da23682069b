//! HTTP surface: thin `axum` handlers over the `ingest`/`query`/`extensions`/
//! `sandbox`/`mcp` modules.

pub mod egress;
pub mod extensions;
pub mod health;
pub mod mcp_sse;
pub mod proxy;
pub mod runs;
pub mod traces;

use axum::routing::{get, patch, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::SharedState;

pub fn router(state: SharedState) -> Router {
    let api = Router::new()
        .route("/health", get(health::health))
        .route("/traces", post(traces::ingest_trace))
        .route("/runs", get(runs::list_runs))
        .route("/runs/{id}", get(runs::get_run).delete(runs::delete_run))
        .route("/runs/{id}/graph", get(runs::get_run_graph))
        .route("/runs/{id}/nodes/{node_id}", get(runs::get_node))
        .route("/runs/{id}/evaluations", get(runs::list_evaluations))
        .route("/evaluations", post(runs::create_evaluation))
        .route(
            "/extensions",
            get(extensions::list_extensions).post(extensions::install_extension),
        )
        .route("/extensions/frontend-manifest", get(extensions::frontend_manifest))
        .route("/extensions/{id}", get(extensions::get_extension).delete(extensions::uninstall_extension))
        .route("/extensions/{id}/status", patch(extensions::set_extension_status))
        .route("/extensions/{id}/permissions", get(extensions::get_extension_permissions))
        .route("/extensions/{id}/audit", get(extensions::get_extension_audit))
        .route("/audit/all", get(extensions::get_all_audit))
        .route("/extensions/{id}/data", get(extensions::list_extension_data_by_id))
        .route(
            "/extensions/{id}/data/{*key}",
            get(extensions::get_extension_data_by_id)
                .put(extensions::put_extension_data_by_id)
                .delete(extensions::delete_extension_data_by_id),
        )
        .route("/extensions/by-name/{name}/data", get(extensions::list_extension_data))
        .route(
            "/extensions/by-name/{name}/data/{*key}",
            get(extensions::get_extension_data)
                .put(extensions::put_extension_data)
                .delete(extensions::delete_extension_data),
        )
        .route("/mcp/sse", get(mcp_sse::sse_handler))
        .route("/mcp/messages", post(mcp_sse::messages_handler))
        .route("/ext-backends/{name}/_egress", post(egress::egress))
        .route("/ext-backends/{name}/{*rest}", axum::routing::any(proxy::proxy_to_backend));

    Router::new()
        .nest("/api", api)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::db;
    use crate::AppState;

    /// Regression test for a router-build-time panic: axum's `matchit` router
    /// rejects two different path-parameter names (`{id}`, `{name}`)
    /// registered at the same tree position, which only surfaces when the
    /// full router is actually built — unit-testing handler functions in
    /// isolation never exercises route registration.
    #[test]
    fn router_builds_without_panicking() {
        let pool = db::test_pool();
        let config = AppConfig {
            database_url: "test.db".to_string(),
            extensions_dir: "extensions".to_string(),
            pool_size: 10,
            pool_burst: 20,
            http_addr: "0.0.0.0:8787".to_string(),
            sandbox_timeout_secs: 30,
        };
        let state = AppState::new(config, pool).unwrap();
        let _ = router(state);
    }
}
