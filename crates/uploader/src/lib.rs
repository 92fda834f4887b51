//! Upload orchestration engine.
//!
//! This crate turns a configuration snapshot plus selected files into chunk
//! requests with retry, bounded chunk concurrency, token lifecycle
//! management and interceptor-mediated request/response rewriting. It has
//! no HTTP dependency: the application supplies a [`Transport`].
//!
//! # Pipeline
//!
//! 1. **Select**: accept-pattern filtering, one `Pending` task per file
//! 2. **Token**: acquire a token (shared across tasks or per task)
//! 3. **Plan**: split the file into chunk descriptors
//! 4. **Transfer**: send chunks through the interceptor chain, retrying
//!    transient failures with backoff
//! 5. **Notify**: exactly one of success, failure or cancellation per task

pub mod accept;
pub mod config;
pub mod error;
pub mod interceptor;
pub mod listener;
pub mod retry;
mod scheduler;
pub mod token;
pub mod transport;
pub mod types;
pub mod uploader;

// Re-export primary types for convenience.
pub use accept::{AcceptFilter, AcceptPattern};
pub use config::{UploaderBuilder, UploaderConfig, UploaderSettings, parse_crop};
pub use error::{
    ConfigError, FailureClass, InterceptorError, SettingsError, TokenError, TransportError,
    UploadError, UploadFailure, classify_status,
};
pub use interceptor::{Interceptor, InterceptorChain, TracingInterceptor};
pub use listener::{ChannelListener, NoopListener, UploadEvent, UploadListener};
pub use retry::{BackoffConfig, DefaultRetryPolicy, RetryPolicy};
pub use token::{
    StaticToken, Token, TokenFuture, TokenProvider, TokenSource, sync_token_fn, token_fn,
};
pub use transport::{DirectoryTransport, Transport, TransportFuture};
pub use types::{
    ChunkStatus, FileData, TaskId, TaskOutcome, UploadFile, UploadResult, UploadTask, guess_mime,
};
pub use uploader::Uploader;
