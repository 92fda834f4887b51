use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::constants::{AUTHORIZATION_HEADER, CHECKSUM_HEADER, TASK_ID_HEADER, bearer};
use crate::types::ImageTransform;

/// Describes which part of which file a request carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMeta {
    pub task_id: u64,
    pub file_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mime_type: String,
    pub file_size: u64,
    pub chunk_index: usize,
    pub chunk_count: usize,
    pub offset: u64,
    pub length: u64,
    /// SHA-256 hex checksum of the body.
    pub checksum: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<ImageTransform>,
}

impl ChunkMeta {
    /// Returns `true` if this request carries the whole file in one piece.
    pub fn is_whole_file(&self) -> bool {
        self.chunk_count == 1 && self.offset == 0 && self.length == self.file_size
    }
}

/// An outgoing chunk request, before and after interceptors touch it.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadRequest {
    pub headers: BTreeMap<String, String>,
    pub meta: ChunkMeta,
    pub body: Vec<u8>,
}

impl UploadRequest {
    /// Builds a request and fills the standard headers.
    pub fn new(meta: ChunkMeta, body: Vec<u8>, token: Option<&str>) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert(TASK_ID_HEADER.to_string(), meta.task_id.to_string());
        headers.insert(CHECKSUM_HEADER.to_string(), meta.checksum.clone());
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            headers.insert(AUTHORIZATION_HEADER.to_string(), bearer(token));
        }
        Self {
            headers,
            meta,
            body,
        }
    }

    /// Returns a header value, if set.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Sets a header, replacing any previous value.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name.into(), value.into());
    }
}
