use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::constants::is_success;

/// Response returned by the remote endpoint for one chunk request.
///
/// The `body` field uses `serde_json::value::RawValue` to defer
/// deserialization until the caller knows what shape to expect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub status: u16,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Box<serde_json::value::RawValue>>,
}

impl UploadResponse {
    /// Creates a response with the given status and JSON body.
    pub fn new<T: Serialize>(status: u16, body: Option<&T>) -> Result<Self, serde_json::Error> {
        let raw = match body {
            Some(b) => {
                let json = serde_json::to_string(b)?;
                Some(serde_json::value::RawValue::from_string(json)?)
            }
            None => None,
        };
        Ok(Self {
            status,
            headers: BTreeMap::new(),
            body: raw,
        })
    }

    /// Creates a response with no body.
    pub fn empty(status: u16) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: None,
        }
    }

    /// Creates a response from raw body text.
    ///
    /// Text that is not valid JSON is stored as a JSON string.
    pub fn from_text(status: u16, text: &str) -> Self {
        let body = if text.is_empty() {
            None
        } else {
            serde_json::value::RawValue::from_string(text.to_string())
                .or_else(|_| {
                    serde_json::to_string(text).and_then(serde_json::value::RawValue::from_string)
                })
                .ok()
        };
        Self {
            status,
            headers: BTreeMap::new(),
            body,
        }
    }

    /// Adds a header, returning the updated response.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Returns `true` for 2xx statuses.
    pub fn is_success(&self) -> bool {
        is_success(self.status)
    }

    /// Deserializes the body into the given type.
    pub fn parse_body<T: for<'de> Deserialize<'de>>(&self) -> Result<Option<T>, serde_json::Error> {
        match &self.body {
            Some(raw) => Ok(Some(serde_json::from_str(raw.get())?)),
            None => Ok(None),
        }
    }

    /// Returns the raw body text (empty when there is no body).
    pub fn body_text(&self) -> &str {
        self.body.as_ref().map(|raw| raw.get()).unwrap_or_default()
    }
}
