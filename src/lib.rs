//! Library crate backing the `tracehub-server` and `tracehub-mcp` binaries:
//! trace ingestion, the extension platform (manifests, lifecycle, sandboxed
//! network egress, namespaced storage), and the MCP tool surface.

pub mod config;
pub mod db;
pub mod error;
pub mod extensions;
pub mod http;
pub mod ingest;
pub mod mcp;
pub mod models;
pub mod query;
pub mod sandbox;
pub mod util;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::error::Result;
use crate::extensions::lifecycle::LifecycleManager;
use crate::http::mcp_sse::McpSessions;
use crate::sandbox::Sandbox;

/// Shared application state handed to every axum handler via `State`.
pub struct AppState {
    pub pool: DbPool,
    pub lifecycle: Arc<LifecycleManager>,
    pub sandbox: Arc<Sandbox>,
    pub config: AppConfig,
    pub mcp_sessions: McpSessions,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(config: AppConfig, pool: DbPool) -> Result<Arc<Self>> {
        let lifecycle = Arc::new(LifecycleManager::new(pool.clone(), config.extensions_dir.clone()));
        let own_port = config
            .http_addr
            .rsplit(':')
            .next()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8787);
        let sandbox = Arc::new(Sandbox::new(pool.clone(), own_port)?);
        Ok(Arc::new(Self {
            pool,
            lifecycle,
            sandbox,
            config,
            mcp_sessions: McpSessions::default(),
        }))
    }
}
