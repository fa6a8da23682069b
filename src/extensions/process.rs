//! Extension backend runtime: each extension's `backend/` entry point is
//! spawned as a child process speaking line-delimited JSON-RPC 2.0 over
//! stdio — the same envelope shape the MCP tool surface uses for its own
//! calls. "Mounting" registers a thin proxying router that forwards each
//! HTTP request to the child as an `execute` RPC and relays its response;
//! "unmounting" sends a `shutdown` RPC and kills the process if it does not
//! exit in time. Uses an async `tokio::process::Child` so a slow extension
//! call suspends only its own request task.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

use crate::error::{Error, Result};

/// What the mount table in [`crate::extensions::lifecycle`] actually holds:
/// a live backend able to proxy one HTTP request and accept a shutdown
/// request. [`BackendProcess`] is the only production implementation — the
/// trait exists so the lifecycle manager's tests can mount a backend that
/// never spawns a real child process.
#[async_trait]
pub trait ExtensionBackend: Send + Sync {
    async fn execute(
        &self,
        method: &str,
        path: &str,
        headers: &[(String, String)],
        body: &Value,
    ) -> Result<BackendResponse>;

    async fn shutdown(&self);
}

#[derive(Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: Value,
    id: u64,
}

#[derive(Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcErrorBody>,
}

#[derive(Deserialize)]
struct JsonRpcErrorBody {
    #[allow(dead_code)]
    code: i64,
    message: String,
}

/// What the extension's backend process returns for one proxied HTTP
/// request, via the `execute` RPC.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendResponse {
    pub status: u16,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub body: Value,
}

struct Handle {
    child: Child,
    stdin: BufWriter<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    next_id: u64,
}

/// A live handle onto one extension's backend process. Created by
/// [`BackendProcess::spawn`], held by the lifecycle manager's mount table,
/// and proxied to on every incoming request under `/api/extensions/<name>`.
pub struct BackendProcess {
    name: String,
    inner: Mutex<Handle>,
}

impl BackendProcess {
    /// Spawn `entry` (an opaque argument resolved by the extension's own
    /// backend runtime) from `cwd`, send `initialize`, and return once the
    /// child has acknowledged.
    pub async fn spawn(name: &str, cwd: &PathBuf, entry: &str) -> Result<Self> {
        let mut child = Command::new("node")
            .arg("backend/index.js")
            .arg(entry)
            .current_dir(cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::ExtensionLoad(format!("failed to spawn backend for '{name}': {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::ExtensionLoad("failed to capture backend stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::ExtensionLoad("failed to capture backend stdout".into()))?;

        let mut handle = Handle {
            child,
            stdin: BufWriter::new(stdin),
            stdout: BufReader::new(stdout),
            next_id: 0,
        };

        let init_id = handle.next_id;
        handle.next_id += 1;
        send(
            &mut handle.stdin,
            &JsonRpcRequest {
                jsonrpc: "2.0",
                method: "initialize",
                params: serde_json::json!({ "extension_name": name, "entry": entry }),
                id: init_id,
            },
        )
        .await?;
        let response = recv(&mut handle.stdout).await?;
        if let Some(err) = response.error {
            return Err(Error::ExtensionLoad(format!(
                "backend initialization failed for '{name}': {}",
                err.message
            )));
        }

        log::info!("mounted extension backend process: {name}");

        Ok(Self {
            name: name.to_string(),
            inner: Mutex::new(handle),
        })
    }

    /// Forward one HTTP request to the child as an `execute` RPC.
    pub async fn execute(
        &self,
        method: &str,
        path: &str,
        headers: &[(String, String)],
        body: &Value,
    ) -> Result<BackendResponse> {
        let mut handle = self.inner.lock().await;

        let id = handle.next_id;
        handle.next_id += 1;

        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method: "execute",
            params: serde_json::json!({
                "method": method,
                "path": path,
                "headers": headers,
                "body": body,
            }),
            id,
        };

        send(&mut handle.stdin, &request).await?;
        let response = recv(&mut handle.stdout).await?;

        if let Some(err) = response.error {
            return Err(Error::ExtensionLoad(format!(
                "extension '{}' backend error: {}",
                self.name, err.message
            )));
        }

        let result = response.result.unwrap_or(Value::Null);
        serde_json::from_value(result)
            .map_err(|e| Error::ExtensionLoad(format!("malformed backend response: {e}")))
    }

    /// Best-effort `shutdown` RPC, then kill the child if it lingers.
    pub async fn shutdown(&self) {
        let mut handle = self.inner.lock().await;

        let id = handle.next_id;
        handle.next_id += 1;
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method: "shutdown",
            params: Value::Null,
            id,
        };
        let _ = send(&mut handle.stdin, &request).await;
        let _ = tokio::time::timeout(Duration::from_secs(5), handle.child.wait()).await;

        if handle.child.try_wait().ok().flatten().is_none() {
            log::warn!("extension '{}' backend did not exit gracefully, killing", self.name);
            let _ = handle.child.kill().await;
        }
    }
}

#[async_trait]
impl ExtensionBackend for BackendProcess {
    async fn execute(
        &self,
        method: &str,
        path: &str,
        headers: &[(String, String)],
        body: &Value,
    ) -> Result<BackendResponse> {
        BackendProcess::execute(self, method, path, headers, body).await
    }

    async fn shutdown(&self) {
        BackendProcess::shutdown(self).await
    }
}

async fn send(writer: &mut BufWriter<ChildStdin>, request: &JsonRpcRequest<'_>) -> Result<()> {
    let mut json = serde_json::to_string(request).map_err(Error::Json)?;
    json.push('\n');
    writer.write_all(json.as_bytes()).await.map_err(Error::Io)?;
    writer.flush().await.map_err(Error::Io)?;
    Ok(())
}

async fn recv(reader: &mut BufReader<ChildStdout>) -> Result<JsonRpcResponse> {
    let mut line = String::new();
    let n = reader.read_line(&mut line).await.map_err(Error::Io)?;
    if n == 0 {
        return Err(Error::ExtensionLoad("backend process closed stdout".into()));
    }
    serde_json::from_str(&line).map_err(Error::Json)
}

#[cfg(test)]
pub mod mock {
    //! In-memory `ExtensionBackend` for tests that need a mounted extension
    //! without spawning a real child process.

    use super::*;
    use std::sync::Mutex as StdMutex;

    pub struct MockBackend {
        pub response: BackendResponse,
        pub calls: StdMutex<Vec<(String, String)>>,
        pub shutdown_called: StdMutex<bool>,
    }

    impl MockBackend {
        pub fn new(response: BackendResponse) -> Self {
            Self {
                response,
                calls: StdMutex::new(Vec::new()),
                shutdown_called: StdMutex::new(false),
            }
        }
    }

    #[async_trait]
    impl ExtensionBackend for MockBackend {
        async fn execute(
            &self,
            method: &str,
            path: &str,
            _headers: &[(String, String)],
            _body: &Value,
        ) -> Result<BackendResponse> {
            self.calls.lock().unwrap().push((method.to_string(), path.to_string()));
            Ok(self.response.clone())
        }

        async fn shutdown(&self) {
            *self.shutdown_called.lock().unwrap() = true;
        }
    }
}
