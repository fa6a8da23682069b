//! The extension network sandbox: matches an outbound request against an
//! extension's declared URL allow-list, re-validates the destination against
//! [`ssrf`], proxies the request through a redirect-hardened client, and
//! writes an audit row for every attempt, allowed or denied.

pub mod audit_store;
pub mod ssrf;

use std::time::{Duration, Instant};

use futures_util::StreamExt;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::db::DbPool;
use crate::error::{Error, Result};
use crate::extensions::manifest::NetworkPermission;

const REDACTED_HEADERS: &[&str] = &["authorization", "x-api-key", "api-key", "cookie", "set-cookie"];
const EXCERPT_CHARS: usize = 500;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// An outbound HTTP request an extension wants the platform to make on its
/// behalf.
pub struct OutboundRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct OutboundResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

pub struct Sandbox {
    pool: DbPool,
    client: reqwest::Client,
    own_http_port: u16,
}

impl Sandbox {
    pub fn new(pool: DbPool, own_http_port: u16) -> Result<Self> {
        let client = ssrf::build_client(own_http_port, REQUEST_TIMEOUT).map_err(Error::Http)?;
        Ok(Self { pool, client, own_http_port })
    }

    /// Validate `req` against `permissions`, re-check the destination for
    /// SSRF, forward it, and record an audit row. The audit row is written
    /// on every path, including denials and transport failures.
    pub async fn proxy_request(
        &self,
        extension_id: &str,
        extension_name: &str,
        permissions: &[NetworkPermission],
        req: OutboundRequest,
    ) -> Result<OutboundResponse> {
        let request_headers = redact_headers(&req.headers);
        let request_body_hash = req.body.as_deref().map(hash_body);
        let request_body_size = req.body.as_ref().map(|b| b.len() as i64);

        let url = match url::Url::parse(&req.url) {
            Ok(u) => u,
            Err(e) => {
                let reason = format!("invalid URL '{}': {e}", req.url);
                self.record(
                    extension_id,
                    extension_name,
                    &req,
                    request_headers,
                    request_body_hash,
                    request_body_size,
                    None,
                    Some(reason.clone()),
                )
                .await;
                return Err(Error::PermissionDenied(reason));
            }
        };

        if find_allowed_permission(permissions, &url, &req.method).is_none() {
            let reason = if permissions.is_empty() {
                "No network permissions defined in manifest".to_string()
            } else {
                format!("URL not in whitelist: {}", req.url)
            };
            self.record(
                extension_id,
                extension_name,
                &req,
                request_headers,
                request_body_hash,
                request_body_size,
                None,
                Some(reason.clone()),
            )
            .await;
            return Err(Error::PermissionDenied(reason));
        }

        if let Err(reason) = ssrf::pre_flight_check(&url, self.own_http_port) {
            self.record(
                extension_id,
                extension_name,
                &req,
                request_headers,
                request_body_hash,
                request_body_size,
                None,
                Some(reason.clone()),
            )
            .await;
            return Err(Error::PermissionDenied(reason));
        }

        let method = reqwest::Method::from_bytes(req.method.as_bytes())
            .map_err(|_| Error::validation("method", format!("invalid HTTP method '{}'", req.method)))?;

        let mut builder = self.client.request(method, url.clone());
        for (name, value) in &req.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = req.body.clone() {
            builder = builder.body(body);
        }

        let started = Instant::now();
        let send_result = builder.send().await;

        match send_result {
            Ok(resp) => {
                let status = resp.status().as_u16();
                let headers: Vec<(String, String)> = resp
                    .headers()
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
                    .collect();

                let body = match collect_capped(resp).await {
                    Ok(b) => b,
                    Err(e) => {
                        let elapsed_ms = started.elapsed().as_millis() as i64;
                        let reason = e.describe();
                        self.record_transport_failure(
                            extension_id,
                            extension_name,
                            &req,
                            redact_headers(&req.headers),
                            request_body_hash,
                            request_body_size,
                            elapsed_ms,
                            reason.clone(),
                        )
                        .await;
                        return Err(Error::Other(reason));
                    }
                };

                let elapsed_ms = started.elapsed().as_millis() as i64;
                self.record_allowed(
                    extension_id,
                    extension_name,
                    &req,
                    redact_headers(&req.headers),
                    request_body_hash,
                    request_body_size,
                    status,
                    elapsed_ms,
                    &headers,
                    &body,
                )
                .await;

                Ok(OutboundResponse { status, headers, body })
            }
            Err(e) => {
                let elapsed_ms = started.elapsed().as_millis() as i64;
                let reason = if e.is_timeout() { "timeout".to_string() } else { e.to_string() };
                self.record_transport_failure(
                    extension_id,
                    extension_name,
                    &req,
                    redact_headers(&req.headers),
                    request_body_hash,
                    request_body_size,
                    elapsed_ms,
                    reason,
                )
                .await;
                Err(Error::Http(e))
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn record(
        &self,
        extension_id: &str,
        extension_name: &str,
        req: &OutboundRequest,
        request_headers: Value,
        request_body_hash: Option<String>,
        request_body_size: Option<i64>,
        response_status: Option<i64>,
        blocked_reason: Option<String>,
    ) {
        let entry = audit_store::NewAuditEntry {
            extension_id: extension_id.to_string(),
            extension_name: extension_name.to_string(),
            target_url: req.url.clone(),
            method: req.method.clone(),
            request_headers,
            request_body_hash,
            request_body_size,
            response_status,
            response_time_ms: None,
            response_headers: None,
            response_body_excerpt: None,
            response_body_size: None,
            allowed: blocked_reason.is_none(),
            blocked_reason,
            error: None,
        };
        if let Err(e) = audit_store::insert(&self.pool, entry).await {
            log::error!("failed to write network audit row for extension '{extension_name}': {e}");
        }
    }

    /// An authorized request that reached (or attempted to reach) the remote
    /// host but failed in transport — connection error, TLS failure, timeout,
    /// or a response that exceeded the size cap while streaming. Unlike
    /// `record`, this is `allowed=true`: the sandbox let the call through,
    /// only the network call itself failed.
    #[allow(clippy::too_many_arguments)]
    async fn record_transport_failure(
        &self,
        extension_id: &str,
        extension_name: &str,
        req: &OutboundRequest,
        request_headers: Value,
        request_body_hash: Option<String>,
        request_body_size: Option<i64>,
        elapsed_ms: i64,
        error: String,
    ) {
        let entry = audit_store::NewAuditEntry {
            extension_id: extension_id.to_string(),
            extension_name: extension_name.to_string(),
            target_url: req.url.clone(),
            method: req.method.clone(),
            request_headers,
            request_body_hash,
            request_body_size,
            response_status: None,
            response_time_ms: Some(elapsed_ms),
            response_headers: None,
            response_body_excerpt: None,
            response_body_size: None,
            allowed: true,
            blocked_reason: None,
            error: Some(error),
        };
        if let Err(e) = audit_store::insert(&self.pool, entry).await {
            log::error!("failed to write network audit row for extension '{extension_name}': {e}");
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn record_allowed(
        &self,
        extension_id: &str,
        extension_name: &str,
        req: &OutboundRequest,
        request_headers: Value,
        request_body_hash: Option<String>,
        request_body_size: Option<i64>,
        status: u16,
        elapsed_ms: i64,
        headers: &[(String, String)],
        body: &[u8],
    ) {
        let response_headers = serde_json::to_value(headers).ok();
        let entry = audit_store::NewAuditEntry {
            extension_id: extension_id.to_string(),
            extension_name: extension_name.to_string(),
            target_url: req.url.clone(),
            method: req.method.clone(),
            request_headers,
            request_body_hash,
            request_body_size,
            response_status: Some(status as i64),
            response_time_ms: Some(elapsed_ms),
            response_headers,
            response_body_excerpt: Some(excerpt(body)),
            response_body_size: Some(body.len() as i64),
            allowed: true,
            blocked_reason: None,
            error: None,
        };
        if let Err(e) = audit_store::insert(&self.pool, entry).await {
            log::error!("failed to write network audit row for extension '{extension_name}': {e}");
        }
    }
}

/// A failure reading the response body after the request was already sent —
/// distinguished from a plain `String` so the caller can still recognize a
/// mid-stream timeout and report it as the literal `"timeout"`.
enum BodyReadError {
    Reqwest(reqwest::Error),
    Capped,
}

impl BodyReadError {
    fn describe(&self) -> String {
        match self {
            BodyReadError::Reqwest(e) if e.is_timeout() => "timeout".to_string(),
            BodyReadError::Reqwest(e) => e.to_string(),
            BodyReadError::Capped => {
                format!("response exceeded {} byte cap", ssrf::MAX_RESPONSE_BYTES)
            }
        }
    }
}

async fn collect_capped(resp: reqwest::Response) -> std::result::Result<Vec<u8>, BodyReadError> {
    let mut body = Vec::new();
    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(BodyReadError::Reqwest)?;
        if body.len() as u64 + chunk.len() as u64 > ssrf::MAX_RESPONSE_BYTES {
            return Err(BodyReadError::Capped);
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

fn hash_body(body: &[u8]) -> String {
    let digest = Sha256::digest(body);
    format!("{digest:x}")[..16].to_string()
}

fn excerpt(body: &[u8]) -> String {
    String::from_utf8_lossy(body).chars().take(EXCERPT_CHARS).collect()
}

fn redact_headers(headers: &[(String, String)]) -> Value {
    let map: serde_json::Map<String, Value> = headers
        .iter()
        .map(|(name, value)| {
            let redacted = REDACTED_HEADERS.contains(&name.to_ascii_lowercase().as_str());
            let shown = if redacted { Value::String("[REDACTED]".to_string()) } else { Value::String(value.clone()) };
            (name.clone(), shown)
        })
        .collect();
    Value::Object(map)
}

/// Split `scheme://host[/path]` without requiring `host` to be a
/// syntactically valid DNS name, since patterns may contain a `*` wildcard
/// segment that a real URL parser would reject.
fn parse_pattern(pattern: &str) -> Option<(&str, &str, &str)> {
    let (scheme, rest) = pattern.split_once("://")?;
    match rest.find('/') {
        Some(idx) => Some((scheme, &rest[..idx], &rest[idx..])),
        None => Some((scheme, rest, "/")),
    }
}

fn host_matches(pattern_host: &str, host: &str) -> bool {
    match pattern_host.strip_prefix("*.") {
        Some(suffix) => host.len() > suffix.len() && host.ends_with(suffix) && host[..host.len() - suffix.len()].ends_with('.'),
        None => pattern_host.eq_ignore_ascii_case(host),
    }
}

fn path_matches(pattern_path: &str, path: &str) -> bool {
    if pattern_path.is_empty() || pattern_path == "*" || pattern_path == "/" {
        return true;
    }
    if let Some(prefix) = pattern_path.strip_suffix('*') {
        return path.starts_with(prefix);
    }
    // Exact path match, ignoring a single trailing slash on either side.
    pattern_path.trim_end_matches('/') == path.trim_end_matches('/')
}

fn pattern_matches(permission: &NetworkPermission, url: &url::Url, method: &str) -> bool {
    if let Some(allowed_methods) = &permission.methods {
        if !allowed_methods.iter().any(|m| m.eq_ignore_ascii_case(method)) {
            return false;
        }
    }
    let Some((scheme, host, path)) = parse_pattern(&permission.url) else {
        return false;
    };
    let Some(target_host) = url.host_str() else {
        return false;
    };
    scheme.eq_ignore_ascii_case(url.scheme()) && host_matches(host, target_host) && path_matches(path, url.path())
}

pub fn find_allowed_permission<'a>(
    permissions: &'a [NetworkPermission],
    url: &url::Url,
    method: &str,
) -> Option<&'a NetworkPermission> {
    permissions.iter().find(|p| pattern_matches(p, url, method))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn perm(url: &str) -> NetworkPermission {
        NetworkPermission { url: url.to_string(), description: None, methods: None }
    }

    #[test]
    fn exact_host_and_prefix_path_match() {
        let permissions = vec![perm("https://api.example.com/v1/*")];
        let url = url::Url::parse("https://api.example.com/v1/users/42").unwrap();
        assert!(find_allowed_permission(&permissions, &url, "GET").is_some());
    }

    #[test]
    fn wildcard_subdomain_is_strict() {
        let permissions = vec![perm("https://*.example.com/")];
        let sub = url::Url::parse("https://a.example.com/x").unwrap();
        let bare = url::Url::parse("https://example.com/x").unwrap();
        let lookalike = url::Url::parse("https://evilexample.com/x").unwrap();
        assert!(find_allowed_permission(&permissions, &sub, "GET").is_some());
        assert!(find_allowed_permission(&permissions, &bare, "GET").is_none());
        assert!(find_allowed_permission(&permissions, &lookalike, "GET").is_none());
    }

    #[test]
    fn exact_path_pattern_does_not_match_as_prefix() {
        let permissions = vec![perm("https://api.example.com/v1")];
        let exact = url::Url::parse("https://api.example.com/v1").unwrap();
        let trailing_slash = url::Url::parse("https://api.example.com/v1/").unwrap();
        let nested = url::Url::parse("https://api.example.com/v1/users").unwrap();
        assert!(find_allowed_permission(&permissions, &exact, "GET").is_some());
        assert!(find_allowed_permission(&permissions, &trailing_slash, "GET").is_some());
        assert!(find_allowed_permission(&permissions, &nested, "GET").is_none());
    }

    #[test]
    fn root_path_pattern_matches_every_path_under_host() {
        let permissions = vec![perm("https://api.example.com/")];
        let nested = url::Url::parse("https://api.example.com/v1/users/42").unwrap();
        assert!(find_allowed_permission(&permissions, &nested, "GET").is_some());
    }

    #[test]
    fn method_restriction_is_enforced() {
        let permissions = vec![NetworkPermission {
            url: "https://api.example.com/hook".to_string(),
            description: None,
            methods: Some(vec!["POST".to_string()]),
        }];
        let url = url::Url::parse("https://api.example.com/hook").unwrap();
        assert!(find_allowed_permission(&permissions, &url, "POST").is_some());
        assert!(find_allowed_permission(&permissions, &url, "GET").is_none());
    }

    #[test]
    fn redact_headers_hides_sensitive_names_case_insensitively() {
        let headers = vec![
            ("Authorization".to_string(), "Bearer xyz".to_string()),
            ("X-Custom".to_string(), "value".to_string()),
        ];
        let redacted = redact_headers(&headers);
        assert_eq!(redacted["Authorization"], Value::String("[REDACTED]".to_string()));
        assert_eq!(redacted["X-Custom"], Value::String("value".to_string()));
    }

    #[test]
    fn body_hash_is_stable_and_truncated() {
        let h1 = hash_body(b"hello");
        let h2 = hash_body(b"hello");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 16);
    }

    #[test]
    fn capped_body_read_error_describes_as_byte_cap_message() {
        let err = BodyReadError::Capped;
        assert!(err.describe().contains("byte cap"));
    }

    #[tokio::test]
    async fn transport_failure_is_recorded_allowed_with_error_not_blocked_reason() {
        let pool = crate::db::test_pool();
        let ext_id = crate::extensions::registry::upsert_extension(
            &pool,
            crate::extensions::registry::NewExtension {
                name: "sandboxed".to_string(),
                version: "1.0.0".to_string(),
                description: None,
                manifest: serde_json::json!({"name": "sandboxed", "version": "1.0.0"}),
                install_path: "/tmp/sandboxed".to_string(),
                has_backend: false,
                has_frontend: false,
                enabled: true,
            },
        )
        .await
        .unwrap()
        .id;

        let sandbox = Sandbox::new(pool.clone(), 8787).unwrap();
        let permissions = vec![perm("http://127.0.0.1:1/*")];
        let req = OutboundRequest {
            method: "GET".to_string(),
            url: "http://127.0.0.1:1/unreachable".to_string(),
            headers: vec![],
            body: None,
        };

        let result = sandbox.proxy_request(&ext_id, "sandboxed", &permissions, req).await;
        assert!(result.is_err());

        let rows = audit_store::query(&pool, audit_store::AuditQuery::new(None, None))
            .await
            .unwrap();
        let row = rows.iter().find(|r| r.extension_id == ext_id).unwrap();
        assert!(row.allowed);
        assert!(row.blocked_reason.is_none());
        assert!(row.error.is_some());
    }
}
