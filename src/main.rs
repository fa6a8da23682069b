//! HTTP server entry point: loads configuration, opens the database pool,
//! restores any previously-enabled extension backends, then serves the
//! `axum` router built in [`tracehub::http`].

use tracehub::config::AppConfig;
use tracehub::{db, http, AppState};

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match AppConfig::load() {
        Ok(c) => c,
        Err(e) => {
            log::error!("failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    let pool = match db::build_pool(&config) {
        Ok(p) => p,
        Err(e) => {
            log::error!("failed to open database: {e}");
            std::process::exit(1);
        }
    };

    let addr = config.http_addr.clone();
    let state = match AppState::new(config, pool) {
        Ok(s) => s,
        Err(e) => {
            log::error!("failed to build application state: {e}");
            std::process::exit(1);
        }
    };

    state.lifecycle.restore_mounts().await;

    let app = http::router(state);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            log::error!("failed to bind {addr}: {e}");
            std::process::exit(1);
        }
    };

    log::info!("tracehub listening on {addr}");

    if let Err(e) = axum::serve(listener, app).await {
        log::error!("server error: {e}");
        std::process::exit(1);
    }
}
