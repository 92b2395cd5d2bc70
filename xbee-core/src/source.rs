//! Byte sources for transfers: a lazy, sequential stream of byte pieces of any size.

use std::collections::VecDeque;
use std::future::Future;
use std::io;

/// Sequential byte stream feeding a transfer. Pieces may have any size; the transfer
/// engine re-slices them into chunks. `Ok(None)` marks end of stream.
pub trait ByteSource: Send + 'static {
    fn next_bytes(&mut self) -> impl Future<Output = io::Result<Option<Vec<u8>>>> + Send;
}

/// In-memory source yielding pre-split pieces, optionally failing after them.
#[derive(Debug, Default)]
pub struct MemorySource {
    pieces: VecDeque<Vec<u8>>,
    fail_at_end: Option<io::ErrorKind>,
}

impl MemorySource {
    /// Whole buffer as a single piece.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        let bytes = bytes.into();
        let mut pieces = VecDeque::new();
        if !bytes.is_empty() {
            pieces.push_back(bytes);
        }
        Self {
            pieces,
            fail_at_end: None,
        }
    }

    pub fn from_pieces<I, P>(pieces: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Vec<u8>>,
    {
        Self {
            pieces: pieces.into_iter().map(Into::into).collect(),
            fail_at_end: None,
        }
    }

    /// After the last piece, report an error of `kind` instead of end of stream.
    pub fn failing_with(mut self, kind: io::ErrorKind) -> Self {
        self.fail_at_end = Some(kind);
        self
    }

    pub fn remaining(&self) -> usize {
        self.pieces.iter().map(Vec::len).sum()
    }
}

impl ByteSource for MemorySource {
    async fn next_bytes(&mut self) -> io::Result<Option<Vec<u8>>> {
        if let Some(piece) = self.pieces.pop_front() {
            return Ok(Some(piece));
        }
        match self.fail_at_end {
            Some(kind) => Err(io::Error::new(kind, "source interrupted")),
            None => Ok(None),
        }
    }
}

/// Source fed through a channel; the stream ends when every sender is dropped.
/// An `Err` item is reported as a read failure.
pub struct ChannelSource {
    rx: tokio::sync::mpsc::Receiver<io::Result<Vec<u8>>>,
}

impl ChannelSource {
    pub fn new(rx: tokio::sync::mpsc::Receiver<io::Result<Vec<u8>>>) -> Self {
        Self { rx }
    }
}

impl ByteSource for ChannelSource {
    async fn next_bytes(&mut self) -> io::Result<Option<Vec<u8>>> {
        match self.rx.recv().await {
            Some(Ok(bytes)) => Ok(Some(bytes)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }
}
