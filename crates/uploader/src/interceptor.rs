//! Request/response interceptor chain.
//!
//! Interceptors wrap the transport like middleware: `intercept` runs in
//! declaration order before the request is sent, `on_response` runs in
//! reverse order once a response or error is back.

use std::sync::Arc;

use skyload_protocol::{UploadRequest, UploadResponse};
use tracing::debug;

use crate::error::{InterceptorError, UploadError};
use crate::transport::Transport;

/// One link in the chain. Both hooks default to pass-through.
pub trait Interceptor: Send + Sync {
    /// Rewrites an outgoing request. An error aborts the chain before sending.
    fn intercept(&self, request: UploadRequest) -> Result<UploadRequest, InterceptorError> {
        Ok(request)
    }

    /// Rewrites a successful response, or translates or suppresses an error.
    fn on_response(
        &self,
        result: Result<UploadResponse, UploadError>,
    ) -> Result<UploadResponse, UploadError> {
        result
    }
}

/// Ordered interceptors composed around a transport.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl InterceptorChain {
    pub fn new(interceptors: Vec<Arc<dyn Interceptor>>) -> Self {
        Self { interceptors }
    }

    /// Runs `request` through the chain and `transport`.
    ///
    /// A non-2xx response enters the response path as
    /// [`UploadError::Status`], so interceptors can translate it.
    pub async fn execute(
        &self,
        request: UploadRequest,
        transport: &dyn Transport,
    ) -> Result<UploadResponse, UploadError> {
        let request = self
            .interceptors
            .iter()
            .try_fold(request, |req, interceptor| interceptor.intercept(req))?;

        let sent = match transport.send(request).await {
            Ok(response) if response.is_success() => Ok(response),
            Ok(response) => Err(UploadError::Status {
                status: response.status,
                body: response.body_text().to_string(),
            }),
            Err(e) => Err(UploadError::Network(e)),
        };

        self.interceptors
            .iter()
            .rev()
            .fold(sent, |result, interceptor| interceptor.on_response(result))
    }
}

/// Logs every request and response at debug level.
///
/// Installed at the head of the chain when the uploader's debug flag is on.
pub struct TracingInterceptor;

impl Interceptor for TracingInterceptor {
    fn intercept(&self, request: UploadRequest) -> Result<UploadRequest, InterceptorError> {
        debug!(
            task = request.meta.task_id,
            file = %request.meta.file_name,
            chunk = request.meta.chunk_index,
            of = request.meta.chunk_count,
            offset = request.meta.offset,
            bytes = request.body.len(),
            "sending chunk"
        );
        Ok(request)
    }

    fn on_response(
        &self,
        result: Result<UploadResponse, UploadError>,
    ) -> Result<UploadResponse, UploadError> {
        match &result {
            Ok(response) => debug!(status = response.status, "chunk response"),
            Err(e) => debug!(error = %e, "chunk error"),
        }
        result
    }
}
