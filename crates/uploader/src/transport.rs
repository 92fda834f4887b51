//! Transport seam and the bundled directory transport.
//!
//! `Transport` is implemented by the application to carry chunk requests to
//! the remote endpoint. Using a trait keeps the engine decoupled from any
//! HTTP client and testable with mocks.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use skyload_protocol::constants::{AUTHORIZATION_HEADER, bearer};
use skyload_protocol::{UploadRequest, UploadResponse};
use skyload_transfer::{ChunkData, ChunkWriter, TransferError};
use tracing::debug;

use crate::error::TransportError;

/// Future returned by [`Transport::send`].
pub type TransportFuture<'a> =
    Pin<Box<dyn Future<Output = Result<UploadResponse, TransportError>> + Send + 'a>>;

/// Sends one request and yields the server's response.
///
/// A non-2xx response is still `Ok`; `Err` means the request never got an
/// answer (connection refused, reset, timeout).
pub trait Transport: Send + Sync {
    fn send(&self, request: UploadRequest) -> TransportFuture<'_>;
}

/// Writes uploaded chunks into files below a local directory.
///
/// Behaves like a minimal upload endpoint: checks the bearer token when one
/// is required, verifies chunk checksums, and answers `202` for partial
/// files and `201` once every byte of a file has arrived.
pub struct DirectoryTransport {
    writer: Arc<Mutex<ChunkWriter>>,
    required_token: Option<String>,
}

impl DirectoryTransport {
    pub fn new(root: &Path) -> Self {
        Self {
            writer: Arc::new(Mutex::new(ChunkWriter::new(root))),
            required_token: None,
        }
    }

    /// Rejects requests whose bearer token differs from `token` with `401`.
    pub fn require_token(mut self, token: impl Into<String>) -> Self {
        self.required_token = Some(token.into());
        self
    }

    async fn store(&self, request: UploadRequest) -> Result<UploadResponse, TransportError> {
        if let Some(expected) = &self.required_token
            && request.header(AUTHORIZATION_HEADER) != Some(bearer(expected).as_str())
        {
            return Ok(UploadResponse::from_text(401, "invalid token"));
        }

        let meta = request.meta;
        let chunk = ChunkData {
            file_path: meta.file_name.clone(),
            offset: meta.offset,
            data: request.body,
            checksum: meta.checksum,
        };

        let writer = Arc::clone(&self.writer);
        let file_size = meta.file_size;
        let written = tokio::task::spawn_blocking(move || {
            let mut w = writer.lock().unwrap();
            let path = w.write_chunk(&chunk)?;
            let received = w.received_bytes(&chunk.file_path);
            if received >= file_size {
                w.finish(&chunk.file_path);
            }
            Ok::<_, TransferError>((path, received))
        })
        .await
        .map_err(|e| TransportError(format!("task join error: {e}")))?;

        let response = match written {
            Ok((path, received)) if received >= file_size => {
                debug!(path = %path.display(), bytes = received, "file assembled");
                UploadResponse::new(
                    201,
                    Some(&serde_json::json!({
                        "path": path.to_string_lossy(),
                        "size": file_size,
                    })),
                )
            }
            Ok((_, received)) => UploadResponse::new(
                202,
                Some(&serde_json::json!({
                    "chunk": meta.chunk_index,
                    "received": received,
                })),
            ),
            Err(TransferError::ChecksumMismatch) => {
                Ok(UploadResponse::from_text(422, "checksum mismatch"))
            }
            Err(TransferError::InvalidPath(reason)) => Ok(UploadResponse::from_text(400, &reason)),
            Err(e) => Ok(UploadResponse::from_text(500, &e.to_string())),
        };
        response.map_err(|e| TransportError(format!("response encoding: {e}")))
    }
}

impl Transport for DirectoryTransport {
    fn send(&self, request: UploadRequest) -> TransportFuture<'_> {
        Box::pin(self.store(request))
    }
}
