//! Upload error types and failure classification.

use crate::types::TaskId;

/// Invalid configuration, detected before any network activity.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("chunk size must be positive, got {0}")]
    InvalidChunkSize(u64),

    #[error("compress quality must be within 0-100, got {0}")]
    InvalidCompress(i32),

    #[error("invalid crop rectangle: {0}")]
    InvalidCrop(String),

    #[error("no transport configured")]
    MissingTransport,
}

/// The token function failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("token fetch failed: {message}")]
pub struct TokenError {
    pub message: String,
}

impl TokenError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// An interceptor refused to build the request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct InterceptorError(pub String);

/// The transport could not deliver the request at all.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct TransportError(pub String);

/// Errors produced while uploading a file.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("network error: {0}")]
    Network(#[from] TransportError),

    #[error("server responded with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("interceptor error: {0}")]
    Interceptor(#[from] InterceptorError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transfer error: {0}")]
    Transfer(#[from] skyload_transfer::TransferError),
}

/// Errors loading an [`UploaderSettings`](crate::UploaderSettings) file.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// How the retry policy should treat a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Worth another attempt.
    Transient,
    /// Credentials were rejected; retry after invalidating the token.
    Unauthorized,
    /// Retrying cannot help.
    Terminal,
}

impl UploadError {
    /// Classifies this error for retry decisions.
    pub fn class(&self) -> FailureClass {
        match self {
            Self::Token(_) | Self::Network(_) => FailureClass::Transient,
            Self::Status { status, .. } => classify_status(*status),
            Self::Config(_) | Self::Interceptor(_) | Self::Io(_) | Self::Transfer(_) => {
                FailureClass::Terminal
            }
        }
    }

    /// Returns `true` if this is an authorization failure.
    pub fn is_unauthorized(&self) -> bool {
        self.class() == FailureClass::Unauthorized
    }
}

/// Classifies a non-2xx HTTP status.
pub fn classify_status(status: u16) -> FailureClass {
    match status {
        401 | 403 => FailureClass::Unauthorized,
        408 | 425 | 429 => FailureClass::Transient,
        500..=599 => FailureClass::Transient,
        _ => FailureClass::Terminal,
    }
}

/// Terminal failure delivered to the listener.
#[derive(Debug)]
pub struct UploadFailure {
    pub task_id: TaskId,
    pub file_name: String,
    /// Index of the chunk that failed, if the failure is chunk-specific.
    pub chunk: Option<usize>,
    pub error: UploadError,
}

impl std::fmt::Display for UploadFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.chunk {
            Some(index) => write!(
                f,
                "task {} ({}) failed at chunk {index}: {}",
                self.task_id, self.file_name, self.error
            ),
            None => write!(
                f,
                "task {} ({}) failed: {}",
                self.task_id, self.file_name, self.error
            ),
        }
    }
}
