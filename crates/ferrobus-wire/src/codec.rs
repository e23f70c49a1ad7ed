//! Fixed-header binary codec.
//!
//! Header layout, network byte order:
//!
//! ```text
//! service(2) instance(2) method(2) length(4)
//! client(2) session(2) proto(1) iface(1) type(1) return(1)
//! payload(length - 8)
//! ```
//!
//! `length` covers everything after the length field: the 8 trailing
//! header bytes plus the payload. The full fixed header is
//! [`HEADER_LEN`] bytes. This layout is the interoperability surface of
//! the protocol and must not change.

use crate::message::{Message, MessageType, ReturnCode};
use bytes::{BufMut, Bytes, BytesMut};
use ferrobus_types::ServiceKey;
use thiserror::Error;

/// Size of the fixed header in bytes.
pub const HEADER_LEN: usize = 18;

/// Header bytes covered by the length field (everything after it).
pub const LENGTH_COVERED: usize = 8;

/// Byte offset of the length field within the header.
const LENGTH_OFFSET: usize = 6;

/// Maximum accepted frame length (header-declared), matching the largest
/// payload the engine is willing to buffer.
pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// Errors produced while decoding a single message.
///
/// Each is fatal only to the message it concerns; whether the stream can
/// continue afterwards is decided by the framing layer
/// ([`crate::FrameDecoder`]).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// The buffer does not hold a usable header.
    #[error("Malformed header: {0}")]
    MalformedHeader(&'static str),

    /// The declared length disagrees with the buffer size.
    #[error("Length mismatch: header declares {declared} bytes, buffer holds {actual}")]
    LengthMismatch {
        /// Length declared in the header.
        declared: u32,
        /// Bytes actually available after the length field.
        actual: u32,
    },

    /// The message-type byte is not recognised.
    #[error("Unknown message type: {0:#04x}")]
    UnknownMessageType(u8),
}

/// Encode a message into a single wire frame.
pub fn encode(msg: &Message) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + msg.payload.len());
    buf.put_u16(msg.key.service);
    buf.put_u16(msg.key.instance);
    buf.put_u16(msg.method);
    buf.put_u32((LENGTH_COVERED + msg.payload.len()) as u32);
    buf.put_u16(msg.client);
    buf.put_u16(msg.session);
    buf.put_u8(msg.protocol_version);
    buf.put_u8(msg.interface_version);
    buf.put_u8(msg.kind.to_byte());
    buf.put_u8(msg.return_code.to_byte());
    buf.put_slice(&msg.payload);
    buf.freeze()
}

/// Decode one complete wire frame.
///
/// Pure function: no side effects, allocates only the payload copy. The
/// buffer must hold exactly one frame; partial or concatenated input is
/// the framing layer's job.
pub fn decode(buf: &[u8]) -> Result<Message, DecodeError> {
    if buf.len() < HEADER_LEN {
        return Err(DecodeError::MalformedHeader("truncated header"));
    }

    let declared = read_u32(buf, LENGTH_OFFSET);
    if (declared as usize) < LENGTH_COVERED {
        return Err(DecodeError::MalformedHeader(
            "declared length shorter than fixed header",
        ));
    }

    let actual = (buf.len() - LENGTH_OFFSET - 4) as u32;
    if declared != actual {
        return Err(DecodeError::LengthMismatch { declared, actual });
    }

    let type_byte = buf[16];
    let kind =
        MessageType::from_byte(type_byte).ok_or(DecodeError::UnknownMessageType(type_byte))?;

    Ok(Message {
        key: ServiceKey::new(read_u16(buf, 0), read_u16(buf, 2)),
        method: read_u16(buf, 4),
        client: read_u16(buf, 10),
        session: read_u16(buf, 12),
        protocol_version: buf[14],
        interface_version: buf[15],
        kind,
        return_code: ReturnCode::from_byte(buf[17]),
        payload: Bytes::copy_from_slice(&buf[HEADER_LEN..]),
    })
}

/// Read the declared frame length from a buffer holding at least the
/// header prefix up to the length field.
pub(crate) fn declared_length(buf: &[u8]) -> u32 {
    read_u32(buf, LENGTH_OFFSET)
}

fn read_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([buf[offset], buf[offset + 1]])
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> ServiceKey {
        ServiceKey::new(0x1234, 0x5678)
    }

    fn sample() -> Message {
        Message::request(key(), 0x0421, 0x0007, 0x002A, Bytes::from_static(b"ping"))
    }

    #[test]
    fn test_round_trip_request() {
        let msg = sample();
        let decoded = decode(&encode(&msg)).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_round_trip_all_kinds() {
        let request = sample();
        let messages = [
            request.clone(),
            Message::response(&request, Bytes::from_static(b"pong")),
            Message::error_response(&request, ReturnCode::UnknownMethod),
            Message::notification(key(), 0x8001, 0x0007, Bytes::from_static(b"tick")),
            Message::subscribe(key(), 0x8001, 0x0007),
            Message::unsubscribe(key(), 0x8001, 0x0007),
            Message::subscribe_ack(&Message::subscribe(key(), 0x8001, 0x0007)),
            Message::offer(key()),
            Message::find(key()),
            Message::stop_offer(key()),
        ];
        for msg in messages {
            assert_eq!(decode(&encode(&msg)).unwrap(), msg, "kind {:?}", msg.kind);
        }
    }

    #[test]
    fn test_header_layout_is_stable() {
        let frame = encode(&sample());
        assert_eq!(&frame[0..2], &[0x12, 0x34]); // service
        assert_eq!(&frame[2..4], &[0x56, 0x78]); // instance
        assert_eq!(&frame[4..6], &[0x04, 0x21]); // method
        assert_eq!(&frame[6..10], &[0, 0, 0, 12]); // length: 8 + "ping"
        assert_eq!(&frame[10..12], &[0x00, 0x07]); // client
        assert_eq!(&frame[12..14], &[0x00, 0x2A]); // session
        assert_eq!(frame[14], 0x01); // protocol version
        assert_eq!(frame[15], 0x01); // interface version
        assert_eq!(frame[16], 0x00); // type: Request
        assert_eq!(frame[17], 0x00); // return code: Ok
        assert_eq!(&frame[18..], b"ping");
    }

    #[test]
    fn test_empty_payload() {
        let msg = Message::offer(key());
        let frame = encode(&msg);
        assert_eq!(frame.len(), HEADER_LEN);
        assert_eq!(decode(&frame).unwrap(), msg);
    }

    #[test]
    fn test_truncated_header() {
        let frame = encode(&sample());
        for cut in 0..HEADER_LEN {
            assert_eq!(
                decode(&frame[..cut]),
                Err(DecodeError::MalformedHeader("truncated header")),
                "cut at {cut}"
            );
        }
    }

    #[test]
    fn test_length_mismatch() {
        let mut frame = encode(&sample()).to_vec();
        // Declare one byte more than the frame carries
        frame[9] += 1;
        assert_eq!(
            decode(&frame),
            Err(DecodeError::LengthMismatch {
                declared: 13,
                actual: 12
            })
        );
    }

    #[test]
    fn test_length_below_fixed_header() {
        let mut frame = encode(&Message::offer(key())).to_vec();
        frame[9] = 4;
        assert_eq!(
            decode(&frame),
            Err(DecodeError::MalformedHeader(
                "declared length shorter than fixed header"
            ))
        );
    }

    #[test]
    fn test_unknown_message_type() {
        let mut frame = encode(&sample()).to_vec();
        frame[16] = 0x42;
        assert_eq!(decode(&frame), Err(DecodeError::UnknownMessageType(0x42)));
    }

    #[test]
    fn test_reserved_return_code_survives_round_trip() {
        let mut msg = sample();
        msg.return_code = ReturnCode::Reserved(0xEE);
        assert_eq!(decode(&encode(&msg)).unwrap().return_code, ReturnCode::Reserved(0xEE));
    }
}
