//! Frame delimiting and the tokio codec.
//!
//! MessagePack values are self-delimiting, so framing reduces to finding
//! where the next complete value ends. [`msgpack_element_size`] walks the
//! marker structure without materialising anything; the codec uses it to
//! split complete frames off the read buffer.

use bytes::{BufMut, BytesMut};
use serde::Serialize;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtoError;
use crate::incoming::IncomingMessage;
use crate::outgoing::OutgoingMessage;

/// Maximum frame size (64 MB). Evaluation results can be large, but a frame
/// beyond this almost certainly means a corrupted stream.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Returns the size in bytes of the MessagePack value starting at the
/// beginning of `buf`, or `None` if the buffer holds only a prefix of it.
pub fn msgpack_element_size(buf: &[u8]) -> Result<Option<usize>, ProtoError> {
    skip_element(buf, 0)
}

/// Skips the element starting at `pos`, returning the offset just past it.
fn skip_element(buf: &[u8], pos: usize) -> Result<Option<usize>, ProtoError> {
    let Some(&marker) = buf.get(pos) else {
        return Ok(None);
    };
    match marker {
        // fixint (positive and negative), nil, bool
        0x00..=0x7f | 0xe0..=0xff | 0xc0 | 0xc2 | 0xc3 => complete(buf, pos + 1),
        0xc1 => Err(ProtoError::InvalidFrame(
            "reserved marker 0xc1 in stream".into(),
        )),
        // u8/i8, u16/i16, u32/i32/f32, u64/i64/f64
        0xcc | 0xd0 => complete(buf, pos + 2),
        0xcd | 0xd1 => complete(buf, pos + 3),
        0xce | 0xd2 | 0xca => complete(buf, pos + 5),
        0xcf | 0xd3 | 0xcb => complete(buf, pos + 9),
        // fixstr
        0xa0..=0xbf => complete(buf, pos + 1 + usize::from(marker & 0x1f)),
        // str8/16/32, bin8/16/32
        0xd9 | 0xc4 => match len_u8(buf, pos + 1) {
            Some(len) => complete(buf, pos + 2 + len),
            None => Ok(None),
        },
        0xda | 0xc5 => match len_u16(buf, pos + 1) {
            Some(len) => complete(buf, pos + 3 + len),
            None => Ok(None),
        },
        0xdb | 0xc6 => match len_u32(buf, pos + 1) {
            Some(len) => complete(buf, pos + 5 + len),
            None => Ok(None),
        },
        // fixext1/2/4/8/16: type byte plus 2^(marker - 0xd4) data bytes
        0xd4..=0xd8 => complete(buf, pos + 2 + (1 << (marker - 0xd4))),
        // ext8/16/32: length, type byte, data
        0xc7 => match len_u8(buf, pos + 1) {
            Some(len) => complete(buf, pos + 3 + len),
            None => Ok(None),
        },
        0xc8 => match len_u16(buf, pos + 1) {
            Some(len) => complete(buf, pos + 4 + len),
            None => Ok(None),
        },
        0xc9 => match len_u32(buf, pos + 1) {
            Some(len) => complete(buf, pos + 6 + len),
            None => Ok(None),
        },
        // arrays
        0x90..=0x9f => skip_children(buf, pos + 1, usize::from(marker & 0x0f)),
        0xdc => match len_u16(buf, pos + 1) {
            Some(n) => skip_children(buf, pos + 3, n),
            None => Ok(None),
        },
        0xdd => match len_u32(buf, pos + 1) {
            Some(n) => skip_children(buf, pos + 5, n),
            None => Ok(None),
        },
        // maps hold 2n child elements
        0x80..=0x8f => skip_children(buf, pos + 1, usize::from(marker & 0x0f) * 2),
        0xde => match len_u16(buf, pos + 1) {
            Some(n) => skip_children(buf, pos + 3, n * 2),
            None => Ok(None),
        },
        0xdf => match len_u32(buf, pos + 1) {
            Some(n) => skip_children(buf, pos + 5, n * 2),
            None => Ok(None),
        },
    }
}

fn skip_children(buf: &[u8], mut pos: usize, count: usize) -> Result<Option<usize>, ProtoError> {
    for _ in 0..count {
        match skip_element(buf, pos)? {
            Some(next) => pos = next,
            None => return Ok(None),
        }
    }
    Ok(Some(pos))
}

fn complete(buf: &[u8], end: usize) -> Result<Option<usize>, ProtoError> {
    Ok(if end <= buf.len() { Some(end) } else { None })
}

fn len_u8(buf: &[u8], pos: usize) -> Option<usize> {
    buf.get(pos).map(|&b| usize::from(b))
}

fn len_u16(buf: &[u8], pos: usize) -> Option<usize> {
    let bytes = buf.get(pos..pos + 2)?;
    Some(usize::from(u16::from_be_bytes([bytes[0], bytes[1]])))
}

fn len_u32(buf: &[u8], pos: usize) -> Option<usize> {
    let bytes = buf.get(pos..pos + 4)?;
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
        .try_into()
        .ok()
}

/// Splits a complete frame into its code and body slice.
pub(crate) fn read_frame_header(frame: &[u8]) -> Result<(i64, &[u8]), ProtoError> {
    let mut rd = rmp::decode::Bytes::new(frame);
    let len = rmp::decode::read_array_len(&mut rd)
        .map_err(|e| ProtoError::InvalidFrame(format!("bad frame array: {e:?}")))?;
    if len != 2 {
        return Err(ProtoError::InvalidFrame(format!(
            "expected a [code, body] pair, got an array of {len}"
        )));
    }
    let code: i64 = rmp::decode::read_int(&mut rd)
        .map_err(|e| ProtoError::InvalidFrame(format!("bad message code: {e:?}")))?;
    let consumed = frame.len() - rd.remaining_slice().len();
    Ok((code, &frame[consumed..]))
}

/// Encodes `[code, body]` into a fresh buffer.
pub(crate) fn write_frame<T: Serialize>(code: i64, body: &T) -> Result<Vec<u8>, ProtoError> {
    let mut buf = Vec::with_capacity(64);
    rmp::encode::write_array_len(&mut buf, 2)
        .map_err(|e| ProtoError::Serialisation(e.to_string()))?;
    rmp::encode::write_sint(&mut buf, code).map_err(|e| ProtoError::Serialisation(e.to_string()))?;
    rmp_serde::encode::write_named(&mut buf, body)
        .map_err(|e| ProtoError::Serialisation(e.to_string()))?;
    Ok(buf)
}

/// Codec turning a byte stream into protocol messages and back.
///
/// The decoder yields [`IncomingMessage`]s; encoding accepts both directions
/// so the same codec serves the manager (host side) and the external-reader
/// client (evaluator side of the stream).
#[derive(Debug, Default)]
pub struct MessageCodec;

impl MessageCodec {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for MessageCodec {
    type Item = IncomingMessage;
    type Error = ProtoError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<IncomingMessage>, ProtoError> {
        match msgpack_element_size(src)? {
            None => {
                if src.len() > MAX_MESSAGE_SIZE {
                    return Err(ProtoError::MessageTooLarge {
                        size: src.len(),
                        max: MAX_MESSAGE_SIZE,
                    });
                }
                Ok(None)
            }
            Some(size) => {
                if size > MAX_MESSAGE_SIZE {
                    return Err(ProtoError::MessageTooLarge {
                        size,
                        max: MAX_MESSAGE_SIZE,
                    });
                }
                let frame = src.split_to(size);
                src.reserve(1);
                Ok(Some(IncomingMessage::decode(&frame)?))
            }
        }
    }
}

impl Encoder<OutgoingMessage> for MessageCodec {
    type Error = ProtoError;

    fn encode(&mut self, msg: OutgoingMessage, dst: &mut BytesMut) -> Result<(), ProtoError> {
        let frame = msg.encode()?;
        if frame.len() > MAX_MESSAGE_SIZE {
            return Err(ProtoError::MessageTooLarge {
                size: frame.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }
        dst.put_slice(&frame);
        Ok(())
    }
}

impl Encoder<IncomingMessage> for MessageCodec {
    type Error = ProtoError;

    fn encode(&mut self, msg: IncomingMessage, dst: &mut BytesMut) -> Result<(), ProtoError> {
        let frame = msg.encode()?;
        dst.put_slice(&frame);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::incoming::{EvaluateResponse, Log};

    fn frame(msg: IncomingMessage) -> Vec<u8> {
        msg.encode().unwrap()
    }

    #[test]
    fn scans_scalars() {
        let mut buf = Vec::new();
        rmp::encode::write_sint(&mut buf, 5).unwrap();
        assert_eq!(msgpack_element_size(&buf).unwrap(), Some(buf.len()));

        let mut buf = Vec::new();
        rmp::encode::write_str(&mut buf, "hello").unwrap();
        assert_eq!(msgpack_element_size(&buf).unwrap(), Some(buf.len()));

        let mut buf = Vec::new();
        rmp::encode::write_f64(&mut buf, 1.5).unwrap();
        assert_eq!(msgpack_element_size(&buf).unwrap(), Some(buf.len()));
    }

    #[test]
    fn scans_nested_containers() {
        let mut buf = Vec::new();
        rmp::encode::write_array_len(&mut buf, 2).unwrap();
        rmp::encode::write_map_len(&mut buf, 1).unwrap();
        rmp::encode::write_str(&mut buf, "k").unwrap();
        rmp::encode::write_array_len(&mut buf, 3).unwrap();
        for i in 0..3 {
            rmp::encode::write_sint(&mut buf, i).unwrap();
        }
        rmp::encode::write_bin(&mut buf, &[1, 2, 3]).unwrap();
        assert_eq!(msgpack_element_size(&buf).unwrap(), Some(buf.len()));

        // every strict prefix is incomplete
        for cut in 0..buf.len() {
            assert_eq!(msgpack_element_size(&buf[..cut]).unwrap(), None);
        }
    }

    #[test]
    fn reserved_marker_is_an_error() {
        assert!(msgpack_element_size(&[0xc1]).is_err());
    }

    #[test]
    fn decoder_splits_back_to_back_frames() {
        let first = frame(IncomingMessage::EvaluateResponse(EvaluateResponse {
            request_id: 1,
            evaluator_id: 1,
            result: b"x".to_vec(),
            error: String::new(),
        }));
        let second = frame(IncomingMessage::Log(Log {
            evaluator_id: 1,
            level: 0,
            message: "hi".into(),
            frame_uri: "repl:text".into(),
        }));

        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&first);
        buf.extend_from_slice(&second);

        let one = codec.decode(&mut buf).unwrap().unwrap();
        assert!(matches!(one, IncomingMessage::EvaluateResponse(_)));
        let two = codec.decode(&mut buf).unwrap().unwrap();
        assert!(matches!(two, IncomingMessage::Log(_)));
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());
    }

    #[test]
    fn decoder_waits_for_partial_frames() {
        let full = frame(IncomingMessage::Log(Log {
            evaluator_id: 9,
            level: 1,
            message: "partial delivery".into(),
            frame_uri: "file:///a.pkl".into(),
        }));

        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::new();
        let (head, tail) = full.split_at(full.len() / 2);
        buf.extend_from_slice(head);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(tail);
        let msg = codec.decode(&mut buf).unwrap().unwrap();
        assert!(matches!(msg, IncomingMessage::Log(_)));
    }
}
