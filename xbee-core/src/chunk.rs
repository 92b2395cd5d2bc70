//! Chunking: re-slice a byte source into fixed-size chunks in source order.

use std::io;

use crate::source::ByteSource;

/// Number of chunks a source of `total_len` bytes produces at `chunk_size`. 0 for an empty source.
pub fn chunk_count(total_len: u64, chunk_size: usize) -> u64 {
    if chunk_size == 0 {
        return 0;
    }
    total_len.div_ceil(chunk_size as u64)
}

/// Pulls pieces from a source and hands out chunks of exactly `chunk_size` bytes;
/// only the last chunk may be shorter. Never yields an empty chunk.
pub struct ChunkReader<S> {
    source: S,
    chunk_size: usize,
    pending: Vec<u8>,
    exhausted: bool,
}

impl<S: ByteSource> ChunkReader<S> {
    /// `chunk_size` must be positive; the transfer engine validates it before building a reader.
    pub fn new(source: S, chunk_size: usize) -> Self {
        Self {
            source,
            chunk_size: chunk_size.max(1),
            pending: Vec::with_capacity(chunk_size),
            exhausted: false,
        }
    }

    /// Next chunk, or `None` once the source is exhausted and nothing is pending.
    /// A source error is returned as-is; bytes buffered toward the partial chunk are never yielded,
    /// so a failed transfer leaves them unsent.
    pub async fn next_chunk(&mut self) -> io::Result<Option<Vec<u8>>> {
        while self.pending.len() < self.chunk_size && !self.exhausted {
            match self.source.next_bytes().await? {
                Some(bytes) => self.pending.extend_from_slice(&bytes),
                None => self.exhausted = true,
            }
        }
        if self.pending.is_empty() {
            return Ok(None);
        }
        let take = self.pending.len().min(self.chunk_size);
        let rest = self.pending.split_off(take);
        Ok(Some(std::mem::replace(&mut self.pending, rest)))
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}
