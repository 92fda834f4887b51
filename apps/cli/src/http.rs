//! HTTP transport: one multipart `POST` per chunk.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::multipart::{Form, Part};
use skyload_protocol::{UploadRequest, UploadResponse};
use skyload_uploader::{Transport, TransportError, TransportFuture};

/// Posts each chunk to `endpoint` as `multipart/form-data` with two fields:
/// `meta` (chunk metadata as JSON) and `file` (the chunk bytes).
///
/// A request that does not complete within `timeout` fails as a
/// [`TransportError`], which the retry policy treats as transient.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    async fn post(&self, request: UploadRequest) -> Result<UploadResponse, TransportError> {
        let UploadRequest {
            headers,
            meta,
            body,
        } = request;

        let meta_json = serde_json::to_string(&meta)
            .map_err(|e| TransportError(format!("failed to encode chunk metadata: {e}")))?;
        let mut part = Part::bytes(body).file_name(meta.file_name.clone());
        if !meta.mime_type.is_empty() {
            part = part
                .mime_str(&meta.mime_type)
                .map_err(|e| TransportError(format!("invalid mime type: {e}")))?;
        }
        let form = Form::new().text("meta", meta_json).part("file", part);

        let mut builder = self.client.post(&self.endpoint).multipart(form);
        for (name, value) in &headers {
            builder = builder.header(name, value);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError(format!("request failed: {e}")))?;

        let status = response.status().as_u16();
        let response_headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let text = response
            .text()
            .await
            .map_err(|e| TransportError(format!("failed to read response body: {e}")))?;

        Ok(response_headers
            .into_iter()
            .fold(UploadResponse::from_text(status, &text), |resp, (k, v)| {
                resp.with_header(k, v)
            }))
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: UploadRequest) -> TransportFuture<'_> {
        Box::pin(self.post(request))
    }
}
