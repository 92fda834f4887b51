use crate::TransferError;

/// Byte range of one chunk within a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpec {
    /// 0-based position; defines merge order on the receiving side.
    pub index: usize,
    pub offset: u64,
    pub length: u64,
}

impl ChunkSpec {
    /// Exclusive end offset.
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// Splits a file of `file_size` bytes into ordered chunk descriptors.
///
/// With `chunking` off the whole file is one chunk, whatever `chunk_size`
/// says. With it on, every chunk is `chunk_size` long except the last, which
/// holds the remainder. A zero `chunk_size` is rejected here rather than at
/// configuration time. An empty file still yields one zero-length chunk so
/// that the upload produces a request.
pub fn plan_chunks(
    file_size: u64,
    chunk_size: u64,
    chunking: bool,
) -> Result<Vec<ChunkSpec>, TransferError> {
    if chunk_size == 0 {
        return Err(TransferError::InvalidChunkSize(chunk_size));
    }

    if !chunking || file_size <= chunk_size {
        return Ok(vec![ChunkSpec {
            index: 0,
            offset: 0,
            length: file_size,
        }]);
    }

    let count = file_size.div_ceil(chunk_size);
    let chunks = (0..count)
        .map(|i| {
            let offset = i * chunk_size;
            ChunkSpec {
                index: i as usize,
                offset,
                length: chunk_size.min(file_size - offset),
            }
        })
        .collect();
    Ok(chunks)
}
