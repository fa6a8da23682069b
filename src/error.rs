use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// A single field-level validation failure, returned verbatim to callers of
/// `POST /api/traces` and similar payload-accepting endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("validation failed")]
    Validation(Vec<FieldError>),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("extension load error: {0}")]
    ExtensionLoad(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("zip error: {0}")]
    Zip(String),

    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Validation(vec![FieldError {
            field: field.into(),
            message: message.into(),
        }])
    }

    /// `rusqlite` failures are always treated as permanent storage errors —
    /// there is no transient/retryable variant the bundled SQLite driver
    /// surfaces to us that is worth distinguishing (no separate connection
    /// pool exhaustion error reaches this path; r2d2 reports that itself).
    pub fn storage(err: impl std::fmt::Display) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<r2d2::Error> for Error {
    fn from(err: r2d2::Error) -> Self {
        Error::Storage(format!("connection pool: {err}"))
    }
}

#[derive(Serialize)]
struct ErrorBody {
    detail: serde_json::Value,
}

impl From<&Error> for StatusCode {
    fn from(err: &Error) -> Self {
        match err {
            Error::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::PermissionDenied(_) => StatusCode::FORBIDDEN,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::ExtensionLoad(_) => StatusCode::BAD_GATEWAY,
            Error::Io(_) | Error::Zip(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Json(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Http(_) => StatusCode::BAD_GATEWAY,
            Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = StatusCode::from(&self);

        // 5xx responses are loggable but content-free to the caller beyond a
        // generic message; the real cause still goes to the log.
        let detail = if status.is_server_error() {
            log::error!("internal error: {self}");
            serde_json::json!("internal server error")
        } else {
            match &self {
                Error::Validation(fields) => serde_json::to_value(fields).unwrap_or_default(),
                other => serde_json::Value::String(other.to_string()),
            }
        };

        (status, Json(ErrorBody { detail })).into_response()
    }
}

pub type Result<T> = std::result::Result<T, Error>;
