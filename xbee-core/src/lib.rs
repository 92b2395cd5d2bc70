//! XBee user data relay core.
//! Sessions, relay frame codec, ingress listeners and the chunked transfer engine.
//! Link I/O, scanning and byte-source fetching are supplied by the host.

pub mod advert;
pub mod chunk;
pub mod config;
pub mod core;
pub mod error;
pub mod event;
pub mod ffi;
pub mod ingress;
pub mod job;
pub mod protocol;
pub mod session;
pub mod source;
pub mod transfer;
pub mod wire;

pub use advert::{decode_advert, encode_advert, Advertisement, AdvertError, ADVERT_VERSION};
pub use config::Config;
pub use core::{Connector, Link, XbeeRelay};
pub use error::RelayError;
pub use event::{DiscoveredDevice, Event, InboundRelayMessage, TransferProgress};
pub use job::{JobState, TransferJob};
pub use protocol::LogicalInterface;
pub use session::{link_channel, LinkEndpoint, LinkHandle, Session, SessionRegistry};
pub use source::{ByteSource, ChannelSource, MemorySource};
pub use transfer::{TransferEngine, TransferHandle};
pub use wire::{decode, decode_frame, FrameDecoder, RelayCodec, RelayFrame, RelayOutput};
