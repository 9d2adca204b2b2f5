//! Fixed-size chunk planning.
//!
//! An object of `size` bytes split at `chunk_size` bytes becomes
//! `ceil(size / chunk_size)` contiguous half-open ranges covering `[0, size)`.
//! A zero-byte object still gets one (empty) chunk, so an upload always sends
//! at least one part.

use super::TransferError;

/// A half-open byte range `[start, end)` of one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    /// Zero-based chunk index.
    pub index: u32,
    /// First byte of the chunk.
    pub start: u64,
    /// One past the last byte of the chunk.
    pub end: u64,
}

impl ChunkRange {
    /// Number of bytes in the chunk.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    /// Returns true for the single chunk of a zero-byte object.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// 1-based part number used by the storage service.
    #[must_use]
    pub fn part_number(&self) -> u32 {
        self.index + 1
    }
}

/// Chunk layout for one object. Computed once per transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    chunk_size: u64,
    total_size: u64,
    total_chunks: u32,
}

impl ChunkPlan {
    /// Plans chunks for an object of `total_size` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::InvalidConfig`] if `chunk_size` is zero or the
    /// plan would need more than `u32::MAX` chunks.
    pub fn new(total_size: u64, chunk_size: u64) -> Result<Self, TransferError> {
        if chunk_size == 0 {
            return Err(TransferError::invalid_config(
                "chunk size must be at least 1 byte",
            ));
        }
        let chunks = total_size.div_ceil(chunk_size).max(1);
        let total_chunks = u32::try_from(chunks).map_err(|_| {
            TransferError::invalid_config(format!(
                "{total_size} bytes at {chunk_size} bytes per chunk needs {chunks} chunks"
            ))
        })?;
        Ok(Self {
            chunk_size,
            total_size,
            total_chunks,
        })
    }

    /// Size of every chunk except possibly the last.
    #[must_use]
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Size of the whole object.
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Number of chunks, always at least 1.
    #[must_use]
    pub fn total_chunks(&self) -> u32 {
        self.total_chunks
    }

    /// Returns the range of chunk `index`, or `None` past the last chunk.
    #[must_use]
    pub fn range(&self, index: u32) -> Option<ChunkRange> {
        if index >= self.total_chunks {
            return None;
        }
        let start = u64::from(index) * self.chunk_size;
        let end = start.saturating_add(self.chunk_size).min(self.total_size);
        Some(ChunkRange {
            index,
            start: start.min(self.total_size),
            end,
        })
    }

    /// Iterates over every chunk in order.
    pub fn chunks(&self) -> impl Iterator<Item = ChunkRange> + '_ {
        (0..self.total_chunks).filter_map(|index| self.range(index))
    }
}
