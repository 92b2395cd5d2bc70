//! XBee API constants and logical interface tags for User Data Relay frames.

use serde::{Deserialize, Serialize};

/// Start delimiter of every API frame.
pub const API_START_DELIMITER: u8 = 0x7E;

/// User Data Relay request (outbound).
pub const FRAME_TYPE_USER_DATA_RELAY: u8 = 0x2D;

/// User Data Relay Output (inbound).
pub const FRAME_TYPE_USER_DATA_RELAY_OUTPUT: u8 = 0xAD;

/// Delimiter + 2 length bytes.
pub const API_HEADER_LEN: usize = 3;

/// Frame type + frame id + destination interface.
pub const RELAY_REQUEST_OVERHEAD: usize = 3;

/// Largest payload a 16-bit API length field can carry in a relay request.
pub const MAX_API_PAYLOAD: usize = u16::MAX as usize - RELAY_REQUEST_OVERHEAD;

/// Default max payload bytes per relay frame.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 255;

/// Default chunk size for transfers (one chunk fills one frame).
pub const DEFAULT_CHUNK_SIZE: usize = DEFAULT_MAX_FRAME_SIZE;

/// Logical channel on the module a relay payload targets or came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LogicalInterface {
    #[default]
    Serial,
    Bluetooth,
    MicroPython,
}

impl LogicalInterface {
    pub fn tag(self) -> u8 {
        match self {
            LogicalInterface::Serial => 0,
            LogicalInterface::Bluetooth => 1,
            LogicalInterface::MicroPython => 2,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(LogicalInterface::Serial),
            1 => Some(LogicalInterface::Bluetooth),
            2 => Some(LogicalInterface::MicroPython),
            _ => None,
        }
    }
}

impl TryFrom<u8> for LogicalInterface {
    type Error = crate::RelayError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        Self::from_tag(tag).ok_or(crate::RelayError::UnknownInterface(tag))
    }
}
