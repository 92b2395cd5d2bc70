//! Crate-wide error taxonomy. Module errors convert into `RelayError`.

use crate::session::DispatchError;
use crate::wire::{FrameDecodeError, FrameEncodeError};

/// Every failure the relay can report, synchronously or as a transfer's terminal reason.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("session already exists: {0}")]
    DuplicateSession(String),
    #[error("payload of {len} bytes exceeds max frame size {max}")]
    PayloadTooLarge { len: usize, max: usize },
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
    #[error("encode failed: {0}")]
    EncodeFailure(String),
    #[error("dispatch failed: {0}")]
    DispatchFailure(String),
    #[error("source read failed: {0}")]
    SourceReadFailure(String),
    #[error("authentication failed: {0}")]
    AuthenticationFailure(String),
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),
    #[error("chunk size must be positive")]
    InvalidChunkSize,
    #[error("unknown logical interface {0}")]
    UnknownInterface(u8),
    #[error("invalid source: {0}")]
    InvalidSource(String),
}

impl RelayError {
    /// Stable name of the error kind, used on the host wire.
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::SessionNotFound(_) => "SessionNotFound",
            RelayError::DuplicateSession(_) => "DuplicateSession",
            RelayError::PayloadTooLarge { .. } => "PayloadTooLarge",
            RelayError::MalformedFrame(_) => "MalformedFrame",
            RelayError::EncodeFailure(_) => "EncodeFailure",
            RelayError::DispatchFailure(_) => "DispatchFailure",
            RelayError::SourceReadFailure(_) => "SourceReadFailure",
            RelayError::AuthenticationFailure(_) => "AuthenticationFailure",
            RelayError::TransportUnavailable(_) => "TransportUnavailable",
            RelayError::InvalidChunkSize => "InvalidChunkSize",
            RelayError::UnknownInterface(_) => "UnknownInterface",
            RelayError::InvalidSource(_) => "InvalidSource",
        }
    }
}

impl From<FrameEncodeError> for RelayError {
    fn from(e: FrameEncodeError) -> Self {
        match e {
            FrameEncodeError::PayloadTooLarge { len, max } => RelayError::PayloadTooLarge { len, max },
        }
    }
}

impl From<FrameDecodeError> for RelayError {
    fn from(e: FrameDecodeError) -> Self {
        RelayError::MalformedFrame(e.to_string())
    }
}

impl From<DispatchError> for RelayError {
    fn from(e: DispatchError) -> Self {
        RelayError::DispatchFailure(e.to_string())
    }
}
