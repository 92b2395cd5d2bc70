//! Bridge advertisements seen while scanning. Framing: length-prefix (4 bytes LE) + bincode payload.

use std::net::IpAddr;

use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::event::{Advertising, DiscoveredDevice};

/// Current advertisement version. Advertisements with another version are ignored.
pub const ADVERT_VERSION: u8 = 1;

const LEN_SIZE: usize = 4;
const MAX_ADVERT_LEN: u32 = 64 * 1024;

/// What a radio bridge broadcasts about the module behind it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advertisement {
    pub version: u8,
    /// Module node identifier (NI), if set.
    pub name: Option<String>,
    /// TCP port the bridge accepts link connections on.
    pub listen_port: u16,
    /// Signal strength the bridge last measured to the module.
    pub rssi: i16,
    pub manufacturer_data: Vec<u8>,
}

impl Advertisement {
    /// Host-facing discovery record; `id` is the address to connect to.
    pub fn to_device(&self, from: IpAddr) -> DiscoveredDevice {
        let id = match from {
            IpAddr::V4(ip) => format!("{}:{}", ip, self.listen_port),
            IpAddr::V6(ip) => format!("[{}]:{}", ip, self.listen_port),
        };
        let manufacturer_data = if self.manufacturer_data.is_empty() {
            None
        } else {
            Some(base64::engine::general_purpose::STANDARD.encode(&self.manufacturer_data))
        };
        DiscoveredDevice {
            name: self.name.clone(),
            id,
            rssi: self.rssi,
            advertising: Advertising {
                local_name: self.name.clone(),
                manufacturer_data,
                is_connectable: true,
            },
        }
    }
}

/// Encode an advertisement into a single datagram: 4 bytes LE length + bincode payload.
pub fn encode_advert(advert: &Advertisement) -> Result<Vec<u8>, AdvertError> {
    let payload = bincode::serialize(advert).map_err(AdvertError::Codec)?;
    let len = payload.len() as u32;
    if len > MAX_ADVERT_LEN {
        return Err(AdvertError::TooLarge);
    }
    let mut out = Vec::with_capacity(LEN_SIZE + payload.len());
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Decode one advertisement datagram.
pub fn decode_advert(bytes: &[u8]) -> Result<Advertisement, AdvertError> {
    if bytes.len() < LEN_SIZE {
        return Err(AdvertError::Truncated);
    }
    let len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    if len > MAX_ADVERT_LEN {
        return Err(AdvertError::TooLarge);
    }
    let end = LEN_SIZE + len as usize;
    if bytes.len() < end {
        return Err(AdvertError::Truncated);
    }
    let advert: Advertisement =
        bincode::deserialize(&bytes[LEN_SIZE..end]).map_err(AdvertError::Codec)?;
    if advert.version != ADVERT_VERSION {
        return Err(AdvertError::Version(advert.version));
    }
    Ok(advert)
}

#[derive(Debug, thiserror::Error)]
pub enum AdvertError {
    #[error("advertisement truncated")]
    Truncated,
    #[error("advertisement too large")]
    TooLarge,
    #[error("unsupported advertisement version {0}")]
    Version(u8),
    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn sample() -> Advertisement {
        Advertisement {
            version: ADVERT_VERSION,
            name: Some("XBEE_A".into()),
            listen_port: 9750,
            rssi: -61,
            manufacturer_data: vec![0x1E, 0x10, 0x00],
        }
    }

    #[test]
    fn roundtrip_advert() {
        let bytes = encode_advert(&sample()).unwrap();
        assert_eq!(decode_advert(&bytes).unwrap(), sample());
    }

    #[test]
    fn truncated_advert_rejected() {
        let bytes = encode_advert(&sample()).unwrap();
        assert!(matches!(decode_advert(&bytes[..2]), Err(AdvertError::Truncated)));
        assert!(matches!(
            decode_advert(&bytes[..bytes.len() - 1]),
            Err(AdvertError::Truncated)
        ));
    }

    #[test]
    fn other_version_rejected() {
        let mut a = sample();
        a.version = 9;
        let bytes = encode_advert(&a).unwrap();
        assert!(matches!(decode_advert(&bytes), Err(AdvertError::Version(9))));
    }

    #[test]
    fn device_record_uses_sender_ip_and_port() {
        let dev = sample().to_device(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 40)));
        assert_eq!(dev.id, "192.168.1.40:9750");
        assert_eq!(dev.rssi, -61);
        assert_eq!(dev.advertising.local_name.as_deref(), Some("XBEE_A"));
        assert_eq!(dev.advertising.manufacturer_data.as_deref(), Some("HhAA"));
        assert!(dev.advertising.is_connectable);
    }

    #[test]
    fn empty_manufacturer_data_is_none() {
        let mut a = sample();
        a.manufacturer_data.clear();
        a.name = None;
        let dev = a.to_device(IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert!(dev.advertising.manufacturer_data.is_none());
        assert!(dev.name.is_none());
    }
}
