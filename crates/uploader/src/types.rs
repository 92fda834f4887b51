//! Data types for files, tasks and their outcomes.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use skyload_protocol::{ChunkState, TaskState, UploadProgress, UploadResponse};
use skyload_transfer::ChunkSpec;

use crate::error::UploadFailure;

/// Identifies one upload task within an [`Uploader`](crate::Uploader).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a file's bytes live.
#[derive(Debug, Clone)]
pub enum FileData {
    /// On disk; ranges are read lazily at dispatch time.
    Disk(PathBuf),
    /// Already in memory.
    Memory(Arc<[u8]>),
}

/// A file selected for upload.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub name: String,
    /// Declared MIME type (empty if unknown).
    pub mime_type: String,
    pub size: u64,
    pub data: FileData,
}

impl UploadFile {
    /// Describes an on-disk file, guessing its MIME type from the extension.
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let metadata = std::fs::metadata(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self {
            mime_type: guess_mime(&name).unwrap_or_default().to_string(),
            name,
            size: metadata.len(),
            data: FileData::Disk(path.to_path_buf()),
        })
    }

    /// Wraps in-memory bytes.
    pub fn from_bytes(
        name: impl Into<String>,
        mime_type: impl Into<String>,
        bytes: impl Into<Arc<[u8]>>,
    ) -> Self {
        let bytes = bytes.into();
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            size: bytes.len() as u64,
            data: FileData::Memory(bytes),
        }
    }

    /// Returns `true` if the declared MIME type is `image/*`.
    pub fn is_image(&self) -> bool {
        self.mime_type
            .split_once('/')
            .is_some_and(|(kind, _)| kind.eq_ignore_ascii_case("image"))
    }

    /// Reads the bytes covered by `chunk`.
    pub async fn read_chunk(&self, chunk: &ChunkSpec) -> Result<Vec<u8>, crate::UploadError> {
        match &self.data {
            FileData::Disk(path) => {
                Ok(skyload_transfer::read_range(path, chunk.offset, chunk.length).await?)
            }
            FileData::Memory(bytes) => {
                let start = chunk.offset as usize;
                let end = chunk.end() as usize;
                bytes.get(start..end).map(<[u8]>::to_vec).ok_or(
                    crate::UploadError::Transfer(skyload_transfer::TransferError::RangeOutOfBounds {
                        offset: chunk.offset,
                        length: chunk.length,
                        file_size: bytes.len() as u64,
                    }),
                )
            }
        }
    }
}

/// Guesses a MIME type from a file name's extension.
pub fn guess_mime(name: &str) -> Option<&'static str> {
    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase());

    match ext.as_deref() {
        Some("png") => Some("image/png"),
        Some("jpg" | "jpeg") => Some("image/jpeg"),
        Some("webp") => Some("image/webp"),
        Some("gif") => Some("image/gif"),
        Some("mp4") => Some("video/mp4"),
        Some("mov") => Some("video/quicktime"),
        Some("webm") => Some("video/webm"),
        Some("mp3") => Some("audio/mpeg"),
        Some("pdf") => Some("application/pdf"),
        Some("json") => Some("application/json"),
        Some("txt") => Some("text/plain"),
        Some("zip") => Some("application/zip"),
        _ => None,
    }
}

/// Per-chunk bookkeeping visible in task snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkStatus {
    pub spec: ChunkSpec,
    pub state: ChunkState,
    /// Number of attempts made so far.
    pub attempts: u32,
}

/// Snapshot of an upload task.
#[derive(Debug, Clone)]
pub struct UploadTask {
    pub id: TaskId,
    pub file_name: String,
    pub mime_type: String,
    pub size: u64,
    pub state: TaskState,
    /// Empty until the task has been planned.
    pub chunks: Vec<ChunkStatus>,
}

impl UploadTask {
    /// Bytes of chunks that have been accepted by the server.
    pub fn transferred_bytes(&self) -> u64 {
        self.chunks
            .iter()
            .filter(|c| c.state == ChunkState::Succeeded)
            .map(|c| c.spec.length)
            .sum()
    }

    pub fn progress(&self) -> UploadProgress {
        UploadProgress {
            task_id: self.id.0,
            file_name: self.file_name.clone(),
            state: self.state,
            total_bytes: self.size,
            transferred_bytes: self.transferred_bytes(),
        }
    }
}

/// Successful result of a task.
#[derive(Debug, Clone)]
pub struct UploadResult {
    pub task_id: TaskId,
    pub file_name: String,
    pub bytes: u64,
    /// One response per chunk, ordered by chunk index.
    pub responses: Vec<UploadResponse>,
}

impl UploadResult {
    /// Response to the final chunk; usually carries the stored object's details.
    pub fn response(&self) -> Option<&UploadResponse> {
        self.responses.last()
    }
}

/// Final outcome of a task.
#[derive(Debug)]
pub enum TaskOutcome {
    Succeeded(UploadResult),
    Failed(UploadFailure),
    Cancelled,
}

impl TaskOutcome {
    pub fn state(&self) -> TaskState {
        match self {
            Self::Succeeded(_) => TaskState::Succeeded,
            Self::Failed(_) => TaskState::Failed,
            Self::Cancelled => TaskState::Cancelled,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }
}
