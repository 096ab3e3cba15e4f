//! Backend message framing.
//!
//! Split complete messages off a read buffer. A partial message is left
//! untouched in the buffer until more bytes arrive.
use bytes::{Buf, Bytes, BytesMut};

use super::{BackendMessage, BackendProtocol, ProtocolError};

/// Message type byte plus length.
pub const HEADER_LEN: usize = 1 + 4;

/// Default maximum of a single backend message, including its length.
pub const DEFAULT_MAX_FRAME: usize = 1 << 30;

/// Try to split a complete frame from the front of `buf`.
///
/// Returns `Ok(None)` when `buf` does not contain a whole message yet, in
/// which case `buf` is reserved for the remaining bytes.
pub fn decode(buf: &mut BytesMut, max_frame: usize) -> Result<Option<(u8, Bytes)>, ProtocolError> {
    let Some(mut header) = buf.get(..HEADER_LEN) else {
        return Ok(None);
    };

    let msgtype = header.get_u8();
    let len = header.get_i32();

    // the length includes itself
    if len < 4 {
        return Err(ProtocolError::InvalidLength { msgtype, len });
    }

    let len = len as usize;
    if len > max_frame {
        return Err(ProtocolError::FrameTooLarge { msgtype, len, max: max_frame });
    }

    if let Some(body_len) = fixed_body_len(msgtype) {
        if len - 4 != body_len {
            return Err(ProtocolError::InvalidLength { msgtype, len: len as i32 });
        }
    }

    let frame_len = 1 + len;
    if buf.len() < frame_len {
        buf.reserve(frame_len - buf.len());
        return Ok(None);
    }

    buf.advance(HEADER_LEN);
    Ok(Some((msgtype, buf.split_to(len - 4).freeze())))
}

/// Try to decode a complete [`BackendMessage`] from the front of `buf`.
pub fn decode_message(buf: &mut BytesMut, max_frame: usize) -> Result<Option<BackendMessage>, ProtocolError> {
    match decode(buf, max_frame)? {
        Some((msgtype, body)) => BackendMessage::decode(msgtype, body).map(Some),
        None => Ok(None),
    }
}

/// Body length of messages which never vary in size.
fn fixed_body_len(msgtype: u8) -> Option<usize> {
    match msgtype {
        b'Z' => Some(1),
        b'K' => Some(8),
        b'1' | b'2' | b'3' | b'I' | b'n' | b's' | b'c' => Some(0),
        _ => None,
    }
}
