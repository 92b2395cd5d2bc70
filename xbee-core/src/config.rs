//! Relay tunables. Hosts embed this in their own config files.

use serde::Deserialize;

use crate::protocol::{LogicalInterface, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_FRAME_SIZE};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Max payload bytes per relay frame (default 255).
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
    /// Bytes per transfer chunk (default 255). Should not exceed `max_frame_size`.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Frames a link buffers before dispatch waits (default 32).
    #[serde(default = "default_link_queue_depth")]
    pub link_queue_depth: usize,
    /// Interface transfer chunks are addressed to (default serial).
    #[serde(default)]
    pub transfer_interface: LogicalInterface,
}

fn default_max_frame_size() -> usize {
    DEFAULT_MAX_FRAME_SIZE
}
fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}
fn default_link_queue_depth() -> usize {
    32
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_frame_size: default_max_frame_size(),
            chunk_size: default_chunk_size(),
            link_queue_depth: default_link_queue_depth(),
            transfer_interface: LogicalInterface::default(),
        }
    }
}
