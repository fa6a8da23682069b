//! MCP stdio transport: reads one JSON-RPC request per line from stdin,
//! writes one JSON-RPC reply per line to stdout. Logging must never touch
//! stdout — stdio *is* the protocol channel here — so it's routed to
//! stderr exclusively.

use std::io::Write;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use tracehub::config::AppConfig;
use tracehub::db;
use tracehub::mcp::{self, JsonRpcRequest};

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

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

    log::info!("tracehub MCP stdio transport ready");

    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                log::error!("error reading stdin: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let request: JsonRpcRequest = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(e) => {
                log::warn!("skipping malformed JSON-RPC line: {e}");
                continue;
            }
        };

        if let Some(response) = mcp::dispatch(&pool, request).await {
            match serde_json::to_string(&response) {
                Ok(mut json) => {
                    json.push('\n');
                    if let Err(e) = stdout.write_all(json.as_bytes()).await {
                        log::error!("error writing stdout: {e}");
                        break;
                    }
                    let _ = stdout.flush().await;
                }
                Err(e) => log::error!("failed to serialize response: {e}"),
            }
        }
    }

    let _ = std::io::stdout().flush();
}
