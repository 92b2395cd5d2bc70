//! Framing: XBee API frames (0x7E + 2 bytes BE length + frame data + checksum).
//! Unescaped API mode (AP=1); relay request and relay output frame data only.

use crate::protocol::{
    LogicalInterface, API_HEADER_LEN, API_START_DELIMITER, DEFAULT_MAX_FRAME_SIZE,
    FRAME_TYPE_USER_DATA_RELAY, FRAME_TYPE_USER_DATA_RELAY_OUTPUT, MAX_API_PAYLOAD,
    RELAY_REQUEST_OVERHEAD,
};
use crate::session::{FrameSequence, Session};

const CHECKSUM_LEN: usize = 1;

/// One outbound User Data Relay request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayFrame {
    /// API frame id, taken from the session counter.
    pub sequence_id: u8,
    pub interface: LogicalInterface,
    pub payload: Vec<u8>,
}

impl RelayFrame {
    /// Serialize as a complete API frame ready for the link.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(RELAY_REQUEST_OVERHEAD + self.payload.len());
        data.push(FRAME_TYPE_USER_DATA_RELAY);
        data.push(self.sequence_id);
        data.push(self.interface.tag());
        data.extend_from_slice(&self.payload);
        wrap_api_frame(&data)
    }
}

/// Payload of a User Data Relay Output frame received from the module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayOutput {
    pub source_interface: LogicalInterface,
    pub data: Vec<u8>,
}

/// Result of parsing one API frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedFrame {
    /// Inbound relay output (0xAD).
    Output(RelayOutput),
    /// Relay request (0x2D), as seen by the module side of a link.
    Request(RelayFrame),
    /// Any other API frame type; not handled by the relay layer.
    Other { frame_type: u8 },
}

/// API checksum: 0xFF minus the low byte of the sum of the frame data.
pub fn checksum(frame_data: &[u8]) -> u8 {
    0xFF - frame_data.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Wrap frame data in delimiter, length and checksum. Caller keeps data under 64 KiB.
pub fn wrap_api_frame(frame_data: &[u8]) -> Vec<u8> {
    let len = frame_data.len() as u16;
    let mut out = Vec::with_capacity(API_HEADER_LEN + frame_data.len() + CHECKSUM_LEN);
    out.push(API_START_DELIMITER);
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(frame_data);
    out.push(checksum(frame_data));
    out
}

/// Builds relay frames against a session, enforcing the max frame size.
#[derive(Debug, Clone, Copy)]
pub struct RelayCodec {
    max_frame_size: usize,
}

impl RelayCodec {
    /// Sizes above what the API length field can carry are clamped.
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            max_frame_size: max_frame_size.min(MAX_API_PAYLOAD),
        }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Build a frame, consuming one sequence id from the session.
    /// The size check runs first so a rejected payload leaves the counter untouched.
    pub fn encode(
        &self,
        session: &Session,
        interface: LogicalInterface,
        payload: &[u8],
    ) -> Result<RelayFrame, FrameEncodeError> {
        self.encode_with(session.sequence(), interface, payload)
    }

    /// Like `encode`, against a bare frame id counter.
    pub fn encode_with(
        &self,
        sequence: &FrameSequence,
        interface: LogicalInterface,
        payload: &[u8],
    ) -> Result<RelayFrame, FrameEncodeError> {
        if payload.len() > self.max_frame_size {
            return Err(FrameEncodeError::PayloadTooLarge {
                len: payload.len(),
                max: self.max_frame_size,
            });
        }
        Ok(RelayFrame {
            sequence_id: sequence.next(),
            interface,
            payload: payload.to_vec(),
        })
    }
}

impl Default for RelayCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

/// Error building a relay frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("payload of {len} bytes exceeds max frame size {max}")]
    PayloadTooLarge { len: usize, max: usize },
}

/// Decode one API frame from the front of `bytes`. Returns the frame and the number of bytes consumed.
/// Call with partial buffer; returns `NeedMore` if the frame is not complete yet.
pub fn decode_frame(bytes: &[u8]) -> Result<(DecodedFrame, usize), FrameDecodeError> {
    let Some(&first) = bytes.first() else {
        return Err(FrameDecodeError::NeedMore);
    };
    if first != API_START_DELIMITER {
        return Err(FrameDecodeError::BadDelimiter(first));
    }
    if bytes.len() < API_HEADER_LEN {
        return Err(FrameDecodeError::NeedMore);
    }
    let len = u16::from_be_bytes([bytes[1], bytes[2]]) as usize;
    if len == 0 {
        return Err(FrameDecodeError::Empty);
    }
    let total = API_HEADER_LEN + len + CHECKSUM_LEN;
    if bytes.len() < total {
        return Err(FrameDecodeError::NeedMore);
    }
    let data = &bytes[API_HEADER_LEN..API_HEADER_LEN + len];
    let actual = bytes[API_HEADER_LEN + len];
    let expected = checksum(data);
    if expected != actual {
        return Err(FrameDecodeError::Checksum { expected, actual });
    }
    let frame = match data[0] {
        FRAME_TYPE_USER_DATA_RELAY_OUTPUT => {
            if data.len() < 2 {
                return Err(FrameDecodeError::Truncated(data[0]));
            }
            let source_interface = LogicalInterface::from_tag(data[1])
                .ok_or(FrameDecodeError::UnknownInterface(data[1]))?;
            DecodedFrame::Output(RelayOutput {
                source_interface,
                data: data[2..].to_vec(),
            })
        }
        FRAME_TYPE_USER_DATA_RELAY => {
            if data.len() < RELAY_REQUEST_OVERHEAD {
                return Err(FrameDecodeError::Truncated(data[0]));
            }
            let interface = LogicalInterface::from_tag(data[2])
                .ok_or(FrameDecodeError::UnknownInterface(data[2]))?;
            DecodedFrame::Request(RelayFrame {
                sequence_id: data[1],
                interface,
                payload: data[RELAY_REQUEST_OVERHEAD..].to_vec(),
            })
        }
        frame_type => DecodedFrame::Other { frame_type },
    };
    Ok((frame, total))
}

/// Decode exactly one relay output frame. Anything else in `raw` is malformed.
pub fn decode(raw: &[u8]) -> Result<RelayOutput, FrameDecodeError> {
    let (frame, consumed) = match decode_frame(raw) {
        Err(FrameDecodeError::NeedMore) => return Err(FrameDecodeError::Incomplete),
        other => other?,
    };
    if consumed != raw.len() {
        return Err(FrameDecodeError::TrailingBytes(raw.len() - consumed));
    }
    match frame {
        DecodedFrame::Output(out) => Ok(out),
        DecodedFrame::Request(_) => Err(FrameDecodeError::UnexpectedType(FRAME_TYPE_USER_DATA_RELAY)),
        DecodedFrame::Other { frame_type } => Err(FrameDecodeError::UnexpectedType(frame_type)),
    }
}

/// Error decoding a frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("need more bytes")]
    NeedMore,
    #[error("incomplete frame")]
    Incomplete,
    #[error("expected start delimiter, got {0:#04x}")]
    BadDelimiter(u8),
    #[error("empty frame")]
    Empty,
    #[error("checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    Checksum { expected: u8, actual: u8 },
    #[error("frame type {0:#04x} too short")]
    Truncated(u8),
    #[error("unknown logical interface {0}")]
    UnknownInterface(u8),
    #[error("unexpected frame type {0:#04x}")]
    UnexpectedType(u8),
    #[error("{0} trailing bytes after frame")]
    TrailingBytes(usize),
}

/// Reassembles API frames from a byte stream whose reads do not align with frame boundaries.
/// A malformed frame is reported and skipped; decoding resumes at the next start delimiter.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes and return every frame (or frame error) completed by them, in stream order.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Result<DecodedFrame, FrameDecodeError>> {
        self.buf.extend_from_slice(bytes);
        let mut out = Vec::new();
        loop {
            match self.buf.iter().position(|&b| b == API_START_DELIMITER) {
                Some(0) => {}
                Some(i) => {
                    out.push(Err(FrameDecodeError::BadDelimiter(self.buf[0])));
                    self.buf.drain(..i);
                }
                None => {
                    if let Some(&b) = self.buf.first() {
                        out.push(Err(FrameDecodeError::BadDelimiter(b)));
                        self.buf.clear();
                    }
                    break;
                }
            }
            match decode_frame(&self.buf) {
                Ok((frame, n)) => {
                    self.buf.drain(..n);
                    out.push(Ok(frame));
                }
                Err(FrameDecodeError::NeedMore) => break,
                Err(e) => {
                    // Drop the delimiter so the next search starts past this frame.
                    self.buf.drain(..1);
                    out.push(Err(e));
                }
            }
        }
        out
    }

    /// Bytes held waiting for the rest of a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}
