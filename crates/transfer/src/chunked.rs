use std::collections::HashMap;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::TransferError;
use crate::validation::resolve_target_path;

// ---------------------------------------------------------------------------
// Checksum helpers
// ---------------------------------------------------------------------------

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

// ---------------------------------------------------------------------------
// Ranged reads
// ---------------------------------------------------------------------------

/// Reads `length` bytes starting at `offset` from the file at `path`.
///
/// Only the requested range is loaded, so a chunk is read at dispatch time
/// and never before.
pub async fn read_range(path: &Path, offset: u64, length: u64) -> Result<Vec<u8>, TransferError> {
    let mut file = tokio::fs::File::open(path).await?;
    let file_size = file.metadata().await?.len();
    if offset.saturating_add(length) > file_size {
        return Err(TransferError::RangeOutOfBounds {
            offset,
            length,
            file_size,
        });
    }

    file.seek(SeekFrom::Start(offset)).await?;
    let mut buf = vec![0u8; length as usize];
    file.read_exact(&mut buf).await?;
    Ok(buf)
}

// ---------------------------------------------------------------------------
// ChunkWriter
// ---------------------------------------------------------------------------

/// A received chunk, ready to be placed into its target file.
#[derive(Debug, Clone)]
pub struct ChunkData {
    /// Target path relative to the writer root.
    pub file_path: String,
    /// Byte offset within the target file.
    pub offset: u64,
    pub data: Vec<u8>,
    /// SHA-256 hex checksum of `data` (empty means no verification).
    pub checksum: String,
}

/// Assembles chunks into files below a root directory.
///
/// Chunks may arrive in any order; each one is written at its own offset.
pub struct ChunkWriter {
    root: PathBuf,
    received: HashMap<String, u64>,
}

impl ChunkWriter {
    /// Creates a writer rooted at `root`.
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            received: HashMap::new(),
        }
    }

    /// Writes a chunk to disk.
    ///
    /// - Rejects target paths that escape the root.
    /// - Verifies the checksum if non-empty.
    /// - Creates intermediate directories as needed.
    pub fn write_chunk(&mut self, chunk: &ChunkData) -> Result<PathBuf, TransferError> {
        let full_path = resolve_target_path(&self.root, &chunk.file_path)?;

        if !chunk.checksum.is_empty() && checksum_bytes(&chunk.data) != chunk.checksum {
            return Err(TransferError::ChecksumMismatch);
        }

        if let Some(parent) = full_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&full_path)?;
        file.seek(SeekFrom::Start(chunk.offset))?;
        file.write_all(&chunk.data)?;

        *self.received.entry(chunk.file_path.clone()).or_insert(0) += chunk.data.len() as u64;

        Ok(full_path)
    }

    /// Returns the number of bytes received so far for `file_path`.
    pub fn received_bytes(&self, file_path: &str) -> u64 {
        self.received.get(file_path).copied().unwrap_or(0)
    }

    /// Forgets the byte count for `file_path` (after the file is complete).
    pub fn finish(&mut self, file_path: &str) -> u64 {
        self.received.remove(file_path).unwrap_or(0)
    }

    /// Returns the root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn chunk(path: &str, offset: u64, data: &[u8]) -> ChunkData {
        ChunkData {
            file_path: path.into(),
            offset,
            data: data.to_vec(),
            checksum: checksum_bytes(data),
        }
    }

    #[test]
    fn checksum_bytes_deterministic() {
        let c1 = checksum_bytes(b"hello world");
        let c2 = checksum_bytes(b"hello world");
        assert_eq!(c1, c2);
        assert_eq!(c1.len(), 64);
        assert_ne!(c1, checksum_bytes(b"hello"));
    }

    #[tokio::test]
    async fn read_range_reads_only_requested_bytes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, b"AABBCCDDEE").unwrap();

        assert_eq!(read_range(&path, 0, 4).await.unwrap(), b"AABB");
        assert_eq!(read_range(&path, 4, 4).await.unwrap(), b"CCDD");
        assert_eq!(read_range(&path, 8, 2).await.unwrap(), b"EE");
        assert!(read_range(&path, 10, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn read_range_past_end_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, b"0123").unwrap();

        let err = read_range(&path, 2, 4).await.unwrap_err();
        assert!(matches!(
            err,
            TransferError::RangeOutOfBounds { file_size: 4, .. }
        ));
    }

    #[tokio::test]
    async fn read_range_missing_file() {
        let result = read_range(Path::new("/nonexistent/skyload/file"), 0, 1).await;
        assert!(matches!(result, Err(TransferError::Io(_))));
    }

    #[test]
    fn writer_assembles_out_of_order_chunks() {
        let dir = TempDir::new().unwrap();
        let mut writer = ChunkWriter::new(dir.path());

        writer.write_chunk(&chunk("out.bin", 6, b" World")).unwrap();
        writer.write_chunk(&chunk("out.bin", 0, b"Hello,")).unwrap();
        assert_eq!(writer.received_bytes("out.bin"), 12);

        let content = std::fs::read(dir.path().join("out.bin")).unwrap();
        assert_eq!(&content, b"Hello, World");

        assert_eq!(writer.finish("out.bin"), 12);
        assert_eq!(writer.received_bytes("out.bin"), 0);
    }

    #[test]
    fn writer_creates_subdirectories() {
        let dir = TempDir::new().unwrap();
        let mut writer = ChunkWriter::new(dir.path());
        let written = writer.write_chunk(&chunk("sub/dir/file.txt", 0, b"data")).unwrap();
        assert_eq!(written, dir.path().join("sub/dir/file.txt"));
        assert_eq!(std::fs::read(written).unwrap(), b"data");
    }

    #[test]
    fn writer_verifies_checksum() {
        let dir = TempDir::new().unwrap();
        let mut writer = ChunkWriter::new(dir.path());
        let mut bad = chunk("bad.bin", 0, b"payload");
        bad.checksum = "00".repeat(32);

        let result = writer.write_chunk(&bad);
        assert!(matches!(result, Err(TransferError::ChecksumMismatch)));
        assert!(!dir.path().join("bad.bin").exists());
    }

    #[test]
    fn writer_skips_verification_without_checksum() {
        let dir = TempDir::new().unwrap();
        let mut writer = ChunkWriter::new(dir.path());
        let mut c = chunk("plain.bin", 0, b"xyz");
        c.checksum.clear();
        writer.write_chunk(&c).unwrap();
        assert_eq!(writer.root(), dir.path());
    }

    #[test]
    fn writer_rejects_traversal() {
        let dir = TempDir::new().unwrap();
        let mut writer = ChunkWriter::new(dir.path());
        let result = writer.write_chunk(&chunk("../../etc/passwd", 0, b"evil"));
        assert!(matches!(result, Err(TransferError::InvalidPath(_))));
    }
}
