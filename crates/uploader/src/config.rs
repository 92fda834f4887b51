//! Uploader configuration: the immutable snapshot, its builder, and the
//! JSON settings file form.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use skyload_protocol::{CropRect, ImageTransform};
use skyload_transfer::DEFAULT_CHUNK_SIZE;

use crate::accept::AcceptFilter;
use crate::error::{ConfigError, SettingsError};
use crate::interceptor::Interceptor;
use crate::listener::UploadListener;
use crate::retry::{BackoffConfig, RetryPolicy};
use crate::token::TokenSource;
use crate::transport::Transport;
use crate::uploader::{Uploader, UploaderParts};

/// Default upper bound on in-flight chunks per task.
pub const DEFAULT_MAX_CONCURRENCY: usize = 3;

/// Validated, immutable configuration owned by an [`Uploader`].
#[derive(Debug, Clone)]
pub struct UploaderConfig {
    /// Maximum retries per chunk (0 = fail on first error).
    pub retry: u32,
    /// Chunk size in bytes. Zero is rejected when a task is planned.
    pub chunk_size: u64,
    /// Split files into chunks; otherwise each file is one request.
    pub chunk: bool,
    /// Start tasks as soon as files are selected.
    pub auto: bool,
    /// Keep every accepted file of a selection, not just the first.
    pub multiple: bool,
    pub accept: AcceptFilter,
    /// Image quality passed to the receiving side, 0-100.
    pub compress: u8,
    pub crop: Option<CropRect>,
    /// Share one token across all tasks.
    pub token_share: bool,
    /// Log every request and response.
    pub debug: bool,
    pub max_concurrency: usize,
    pub backoff: BackoffConfig,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            retry: 0,
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk: false,
            auto: true,
            multiple: true,
            accept: AcceptFilter::default(),
            compress: 100,
            crop: None,
            token_share: true,
            debug: false,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            backoff: BackoffConfig::default(),
        }
    }
}

impl UploaderConfig {
    /// Image parameters for image uploads, or `None` when nothing would change.
    pub fn image_transform(&self) -> Option<ImageTransform> {
        if self.compress >= 100 && self.crop.is_none() {
            return None;
        }
        Some(ImageTransform {
            quality: self.compress,
            crop: self.crop,
        })
    }
}

/// Validates a raw `[x, y, width, height]` crop.
///
/// An empty slice means no crop.
pub fn parse_crop(values: &[i64]) -> Result<Option<CropRect>, ConfigError> {
    match values {
        [] => Ok(None),
        &[x, y, width, height] => {
            if x < 0 || y < 0 {
                return Err(ConfigError::InvalidCrop(format!(
                    "origin must be non-negative, got ({x}, {y})"
                )));
            }
            if width <= 0 || height <= 0 {
                return Err(ConfigError::InvalidCrop(format!(
                    "size must be positive, got {width}x{height}"
                )));
            }
            let field = |v: i64| {
                u32::try_from(v).map_err(|_| ConfigError::InvalidCrop(format!("{v} out of range")))
            };
            Ok(Some(CropRect {
                x: field(x)?,
                y: field(y)?,
                width: field(width)?,
                height: field(height)?,
            }))
        }
        other => Err(ConfigError::InvalidCrop(format!(
            "expected 4 values, got {}",
            other.len()
        ))),
    }
}

/// Fluent builder for an [`Uploader`].
///
/// Setters only record values; [`build`](Self::build) validates them.
pub struct UploaderBuilder {
    retry: u32,
    chunk_size: u64,
    chunk: bool,
    auto: bool,
    multiple: bool,
    accept: Vec<String>,
    compress: i32,
    crop: Vec<i64>,
    token_share: bool,
    debug: bool,
    max_concurrency: usize,
    backoff: BackoffConfig,
    transport: Option<Arc<dyn Transport>>,
    token_source: Option<Arc<dyn TokenSource>>,
    listener: Option<Arc<dyn UploadListener>>,
    retry_policy: Option<Arc<dyn RetryPolicy>>,
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl Default for UploaderBuilder {
    fn default() -> Self {
        let defaults = UploaderConfig::default();
        Self {
            retry: defaults.retry,
            chunk_size: defaults.chunk_size,
            chunk: defaults.chunk,
            auto: defaults.auto,
            multiple: defaults.multiple,
            accept: Vec::new(),
            compress: i32::from(defaults.compress),
            crop: Vec::new(),
            token_share: defaults.token_share,
            debug: defaults.debug,
            max_concurrency: defaults.max_concurrency,
            backoff: defaults.backoff,
            transport: None,
            token_source: None,
            listener: None,
            retry_policy: None,
            interceptors: Vec::new(),
        }
    }
}

impl UploaderBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn retry(mut self, retry: u32) -> Self {
        self.retry = retry;
        self
    }

    pub fn chunk_size(mut self, bytes: u64) -> Self {
        self.chunk_size = bytes;
        self
    }

    pub fn chunk(mut self, enabled: bool) -> Self {
        self.chunk = enabled;
        self
    }

    pub fn auto(mut self, enabled: bool) -> Self {
        self.auto = enabled;
        self
    }

    pub fn multiple(mut self, enabled: bool) -> Self {
        self.multiple = enabled;
        self
    }

    /// Replaces the accept patterns (`.ext`, `type/*`, `type/subtype`).
    pub fn accept<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.accept = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn compress(mut self, quality: i32) -> Self {
        self.compress = quality;
        self
    }

    /// `[x, y, width, height]`, or empty for no crop.
    pub fn crop(mut self, rect: impl IntoIterator<Item = i64>) -> Self {
        self.crop = rect.into_iter().collect();
        self
    }

    pub fn token_source(mut self, source: Arc<dyn TokenSource>) -> Self {
        self.token_source = Some(source);
        self
    }

    pub fn token_share(mut self, share: bool) -> Self {
        self.token_share = share;
        self
    }

    pub fn debug(mut self, enabled: bool) -> Self {
        self.debug = enabled;
        self
    }

    /// Upper bound on simultaneously in-flight chunks per task (minimum 1).
    pub fn max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = limit.max(1);
        self
    }

    pub fn retry_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Overrides the default retry policy built from `retry` and the backoff.
    pub fn retry_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn listener(mut self, listener: Arc<dyn UploadListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Appends an interceptor. Order of calls is chain order.
    pub fn interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Validates the options and returns a ready [`Uploader`].
    pub fn build(self) -> Result<Uploader, ConfigError> {
        let compress = u8::try_from(self.compress)
            .ok()
            .filter(|q| *q <= 100)
            .ok_or(ConfigError::InvalidCompress(self.compress))?;
        let crop = parse_crop(&self.crop)?;
        let transport = self.transport.ok_or(ConfigError::MissingTransport)?;

        let config = UploaderConfig {
            retry: self.retry,
            chunk_size: self.chunk_size,
            chunk: self.chunk,
            auto: self.auto,
            multiple: self.multiple,
            accept: AcceptFilter::new(self.accept),
            compress,
            crop,
            token_share: self.token_share,
            debug: self.debug,
            max_concurrency: self.max_concurrency.max(1),
            backoff: self.backoff,
        };

        Ok(Uploader::from_parts(
            config,
            UploaderParts {
                transport,
                token_source: self.token_source,
                listener: self.listener,
                retry_policy: self.retry_policy,
                interceptors: self.interceptors,
            },
        ))
    }
}

fn default_backoff_initial_ms() -> u64 {
    250
}

fn default_backoff_max_ms() -> u64 {
    15_000
}

fn default_backoff_factor() -> f64 {
    2.0
}

/// Plain-data settings as stored in a JSON file.
///
/// Every field is optional in the file and falls back to the builder default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploaderSettings {
    pub retry: u32,
    pub chunk_size: u64,
    pub chunk: bool,
    pub auto: bool,
    pub multiple: bool,
    pub accept: Vec<String>,
    pub compress: i32,
    pub crop: Vec<i64>,
    pub token_share: bool,
    pub debug: bool,
    pub max_concurrency: usize,
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

impl Default for UploaderSettings {
    fn default() -> Self {
        let defaults = UploaderConfig::default();
        Self {
            retry: defaults.retry,
            chunk_size: defaults.chunk_size,
            chunk: defaults.chunk,
            auto: defaults.auto,
            multiple: defaults.multiple,
            accept: Vec::new(),
            compress: i32::from(defaults.compress),
            crop: Vec::new(),
            token_share: defaults.token_share,
            debug: defaults.debug,
            max_concurrency: defaults.max_concurrency,
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

impl UploaderSettings {
    /// Reads settings from a JSON file.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(path)?;
        let settings = Self::from_json(&content)?;
        tracing::debug!(path = %path.display(), "loaded uploader settings");
        Ok(settings)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn backoff(&self) -> BackoffConfig {
        BackoffConfig {
            initial_delay: Duration::from_millis(self.backoff_initial_ms),
            max_delay: Duration::from_millis(self.backoff_max_ms),
            factor: self.backoff_factor,
        }
    }

    /// Copies these settings onto `builder`. Validation still happens in
    /// [`UploaderBuilder::build`].
    pub fn apply(&self, builder: UploaderBuilder) -> UploaderBuilder {
        builder
            .retry(self.retry)
            .chunk_size(self.chunk_size)
            .chunk(self.chunk)
            .auto(self.auto)
            .multiple(self.multiple)
            .accept(self.accept.iter().cloned())
            .compress(self.compress)
            .crop(self.crop.iter().copied())
            .token_share(self.token_share)
            .debug(self.debug)
            .max_concurrency(self.max_concurrency)
            .retry_backoff(self.backoff())
    }
}
