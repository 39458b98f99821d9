//! Error types for the badger engine.

use thiserror::Error;

use crate::change::ChangeStatus;

/// Maximum number of response bytes kept in an [`ApiError`] preview.
pub const RESPONSE_PREVIEW_LIMIT: usize = 500;

/// A failed call to the remote API.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}{}", .status.map(|s| format!(" (status {s})")).unwrap_or_default())]
pub struct ApiError {
    /// HTTP status code, when the request reached the server.
    pub status: Option<u16>,
    /// Human-readable description.
    pub message: String,
    /// Leading bytes of the response body.
    pub preview: Option<String>,
}

impl ApiError {
    /// Create an error that never reached the remote side.
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
            preview: None,
        }
    }

    /// Create an error for an unexpected response status.
    pub fn status(status: u16, message: impl Into<String>, body: &str) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
            preview: Some(preview(body, RESPONSE_PREVIEW_LIMIT)),
        }
    }
}

/// Truncate `body` to at most `max` bytes on a char boundary, marking the cut.
pub fn preview(body: &str, max: usize) -> String {
    if body.len() <= max {
        return body.to_string();
    }
    let mut end = max;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

/// A failed store operation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("unknown or unavailable SQL command: {0}")]
    UnknownCommand(String),

    #[error("database error: {0}")]
    Backend(String),

    #[error("column '{0}' not found in row")]
    MissingColumn(String),

    #[error("column '{column}' has unexpected value: {detail}")]
    Decode { column: String, detail: String },
}

/// All possible errors from the sync engine.
#[derive(Debug, Error)]
pub enum Error {
    #[error("api error: {0}")]
    Api(#[from] ApiError),

    #[error("{0}")]
    Store(#[from] StoreError),

    /// Per-item failures collected over a batch.
    #[error("encountered errors during {scope} pull:\n- {}", .failures.join("\n- "))]
    Batch {
        scope: String,
        succeeded: usize,
        failures: Vec<String>,
    },

    #[error("invalid pending change payload (change_id={change_id}): {detail}")]
    InvalidPayload { change_id: i64, detail: String },

    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition { from: ChangeStatus, to: ChangeStatus },

    #[error("invalid action configuration: {0}")]
    InvalidAction(String),

    #[error("action failed: {0}")]
    ActionFailed(String),

    #[error("event action not found: {0}")]
    EventActionNotFound(String),

    #[error("invalid action index {index} for '{name}'")]
    InvalidActionIndex { name: String, index: usize },

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<Error>,
    },

    #[error("internal error: {0}")]
    Internal(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Wrap this error with a leading description.
    pub fn context(self, context: impl Into<String>) -> Self {
        Error::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Number of successful items carried by a batch error.
    pub fn succeeded(&self) -> Option<usize> {
        match self {
            Error::Batch { succeeded, .. } => Some(*succeeded),
            Error::Context { source, .. } => source.succeeded(),
            _ => None,
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Result type for [`crate::store::Store`] operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result type for [`crate::api::RemoteApi`] operations.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
