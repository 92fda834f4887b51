//! Wire-level value types for skyload uploads.
//!
//! These types sit between the upload engine and whatever transport carries
//! the bytes: a chunk request going out, a server response coming back, and
//! the task/chunk states surfaced to observers.

pub mod constants;
pub mod envelope;
pub mod messages;
pub mod types;

pub use envelope::UploadResponse;
pub use messages::{ChunkMeta, UploadRequest};
pub use types::{ChunkState, CropRect, ImageTransform, TaskState, UploadProgress};
