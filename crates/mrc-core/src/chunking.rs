use std::num::NonZeroUsize;
use std::slice::Chunks;

use crate::error::{Error, Result};

/// Split `items` into contiguous sub-slices of `size`; the last one holds the remainder.
///
/// The iterator is lazy and can be recreated by calling again. A `size` larger than
/// the input yields a single sub-slice with everything.
pub fn divide_into_chunks<T>(items: &[T], size: usize) -> Result<Chunks<'_, T>> {
    if size == 0 {
        return Err(Error::InvalidConfig("chunk size must be positive".into()));
    }
    Ok(items.chunks(size))
}

/// How annotated encodings of one split are grouped into persisted artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactChunking {
    /// Everything in one artifact (dev/test splits).
    Single,
    /// `n` encodings per artifact.
    Every(NonZeroUsize),
}

impl ArtifactChunking {
    /// `chunk_size <= 0` means no chunking.
    pub fn from_chunk_size(chunk_size: i64) -> Self {
        usize::try_from(chunk_size)
            .ok()
            .and_then(NonZeroUsize::new)
            .map_or(Self::Single, Self::Every)
    }
}
