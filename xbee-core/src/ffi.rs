//! C ABI for linking xbee-core as a static library from Android (NDK) or other C/C++ hosts.
//! Exposes the relay frame codec and a per-link frame id counter; hosts keep their own radio I/O.

use std::ffi::c_void;
use std::os::raw::c_int;
use std::slice;

use crate::advert::ADVERT_VERSION;
use crate::protocol::LogicalInterface;
use crate::session::FrameSequence;
use crate::wire::{decode, RelayCodec};

/// Returns the advertisement version. Used so the staticlib exports a C symbol and is linkable.
#[no_mangle]
pub extern "C" fn xbee_core_version() -> u8 {
    ADVERT_VERSION
}

/// Create a frame id counter for one link. Returns opaque handle.
#[no_mangle]
pub extern "C" fn xbee_core_sequence_create() -> *mut c_void {
    Box::into_raw(Box::new(FrameSequence::new())) as *mut c_void
}

/// Destroy a counter. No-op if h is null.
#[no_mangle]
pub extern "C" fn xbee_core_sequence_destroy(h: *mut c_void) {
    if h.is_null() {
        return;
    }
    let _ = unsafe { Box::from_raw(h as *mut FrameSequence) };
}

/// Encode a User Data Relay API frame into out_buf, consuming one frame id from h.
/// Returns bytes written; -1 on null/unknown interface/small buffer; -2 if payload exceeds max_frame_size.
#[no_mangle]
pub extern "C" fn xbee_core_encode_relay(
    h: *mut c_void,
    interface: u8,
    payload: *const u8,
    payload_len: usize,
    max_frame_size: usize,
    out_buf: *mut u8,
    out_buf_len: usize,
) -> c_int {
    if h.is_null() || out_buf.is_null() || (payload.is_null() && payload_len > 0) {
        return -1;
    }
    let Some(interface) = LogicalInterface::from_tag(interface) else {
        return -1;
    };
    let sequence = unsafe { &*(h as *const FrameSequence) };
    let payload = if payload_len == 0 {
        &[][..]
    } else {
        unsafe { slice::from_raw_parts(payload, payload_len) }
    };
    let frame = match RelayCodec::new(max_frame_size).encode_with(sequence, interface, payload) {
        Ok(f) => f,
        Err(_) => return -2,
    };
    let bytes = frame.to_bytes();
    if bytes.len() > out_buf_len {
        return -1;
    }
    unsafe {
        out_buf.copy_from_nonoverlapping(bytes.as_ptr(), bytes.len());
    }
    bytes.len() as c_int
}

/// Decode one User Data Relay Output frame. Writes the source interface tag and data.
/// Returns data length, or -1 if the frame is malformed or out_data is too small.
#[no_mangle]
pub extern "C" fn xbee_core_decode_relay(
    bytes: *const u8,
    len: usize,
    out_interface: *mut u8,
    out_data: *mut u8,
    out_data_len: usize,
) -> c_int {
    if bytes.is_null() || out_interface.is_null() || out_data.is_null() {
        return -1;
    }
    let raw = unsafe { slice::from_raw_parts(bytes, len) };
    let output = match decode(raw) {
        Ok(o) => o,
        Err(_) => return -1,
    };
    if output.data.len() > out_data_len {
        return -1;
    }
    unsafe {
        *out_interface = output.source_interface.tag();
        out_data.copy_from_nonoverlapping(output.data.as_ptr(), output.data.len());
    }
    output.data.len() as c_int
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::FRAME_TYPE_USER_DATA_RELAY_OUTPUT;
    use crate::wire::{decode_frame, wrap_api_frame, DecodedFrame};

    #[test]
    fn encode_through_c_abi() {
        let h = xbee_core_sequence_create();
        let mut out = [0u8; 64];
        let payload = b"hello";
        let n = xbee_core_encode_relay(h, 0, payload.as_ptr(), payload.len(), 255, out.as_mut_ptr(), out.len());
        assert!(n > 0);
        match decode_frame(&out[..n as usize]).unwrap().0 {
            DecodedFrame::Request(f) => {
                assert_eq!(f.sequence_id, 1);
                assert_eq!(f.payload, payload);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            xbee_core_encode_relay(h, 0, payload.as_ptr(), payload.len(), 4, out.as_mut_ptr(), out.len()),
            -2
        );
        assert_eq!(
            xbee_core_encode_relay(h, 7, payload.as_ptr(), payload.len(), 255, out.as_mut_ptr(), out.len()),
            -1
        );
        xbee_core_sequence_destroy(h);
    }

    #[test]
    fn decode_through_c_abi() {
        let raw = wrap_api_frame(&[FRAME_TYPE_USER_DATA_RELAY_OUTPUT, 2, 0xAA, 0xBB]);
        let mut iface = 0u8;
        let mut data = [0u8; 8];
        let n = xbee_core_decode_relay(raw.as_ptr(), raw.len(), &mut iface, data.as_mut_ptr(), data.len());
        assert_eq!(n, 2);
        assert_eq!(iface, 2);
        assert_eq!(&data[..2], &[0xAA, 0xBB]);
        assert_eq!(
            xbee_core_decode_relay(raw.as_ptr(), 3, &mut iface, data.as_mut_ptr(), data.len()),
            -1
        );
    }
}
