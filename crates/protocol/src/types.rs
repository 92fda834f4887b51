use serde::{Deserialize, Serialize};

/// Crop rectangle passed through to the image pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Image processing parameters attached to image uploads.
///
/// The engine never touches pixels; the receiving side applies these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageTransform {
    /// JPEG/WebP quality, 0–100.
    pub quality: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crop: Option<CropRect>,
}

/// Lifecycle state of one upload task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    TokenAcquiring,
    Planning,
    Transferring,
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskState {
    /// Returns `true` for absorbing states.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

/// Transfer state of one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkState {
    Pending,
    InFlight,
    Succeeded,
    Failed,
}

/// Byte-level progress for an active task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadProgress {
    pub task_id: u64,
    pub file_name: String,
    pub state: TaskState,
    pub total_bytes: u64,
    pub transferred_bytes: u64,
}

impl UploadProgress {
    /// Returns the upload progress as a percentage (0-100).
    pub fn percentage(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.transferred_bytes as f64 / self.total_bytes as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(TaskState::Succeeded.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(TaskState::Cancelled.is_terminal());
        assert!(!TaskState::Pending.is_terminal());
        assert!(!TaskState::Transferring.is_terminal());
    }

    #[test]
    fn task_state_serializes_snake_case() {
        let json = serde_json::to_string(&TaskState::TokenAcquiring).unwrap();
        assert_eq!(json, "\"token_acquiring\"");
    }

    #[test]
    fn transform_omits_missing_crop() {
        let t = ImageTransform {
            quality: 80,
            crop: None,
        };
        let json = serde_json::to_string(&t).unwrap();
        assert_eq!(json, r#"{"quality":80}"#);
    }

    #[test]
    fn percentage() {
        let mut p = UploadProgress {
            task_id: 1,
            file_name: "a.bin".into(),
            state: TaskState::Transferring,
            total_bytes: 200,
            transferred_bytes: 50,
        };
        assert!((p.percentage() - 25.0).abs() < f64::EPSILON);
        p.total_bytes = 0;
        assert_eq!(p.percentage(), 0.0);
    }
}
