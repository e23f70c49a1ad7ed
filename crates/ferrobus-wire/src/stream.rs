//! Streaming frame reassembly.
//!
//! The transport delivers arbitrary byte chunks; [`FrameDecoder`]
//! buffers them until complete frames are available and yields the
//! decoded messages in arrival order. Several frames may complete in one
//! chunk and a single frame may span many.

use crate::codec::{self, DecodeError, HEADER_LEN, LENGTH_COVERED, MAX_FRAME_SIZE};
use crate::message::Message;
use bytes::BytesMut;
use tracing::debug;

/// Incremental decoder over a chunked byte stream.
///
/// Per-frame errors with a known frame boundary (an unrecognised message
/// type) skip exactly that frame and keep the stream alive. Errors that
/// leave the boundary ambiguous (a header-length below the fixed header,
/// an oversized declared length) poison the decoder: the current and
/// every later [`feed`](FrameDecoder::feed) fails, and the caller must
/// drop the connection.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
    poison: Option<DecodeError>,
}

impl FrameDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the stream can no longer be resynchronised.
    pub fn is_poisoned(&self) -> bool {
        self.poison.is_some()
    }

    /// Feed one received chunk, returning every message completed by it.
    ///
    /// An `Err` means the stream is unrecoverable; the connection must be
    /// treated as lost.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<Message>, DecodeError> {
        if let Some(err) = &self.poison {
            return Err(err.clone());
        }

        self.buf.extend_from_slice(chunk);
        let mut messages = Vec::new();

        loop {
            if self.buf.len() < HEADER_LEN {
                break;
            }

            let declared = codec::declared_length(&self.buf);
            if (declared as usize) < LENGTH_COVERED {
                return Err(self.poison(DecodeError::MalformedHeader(
                    "declared length shorter than fixed header",
                )));
            }
            if declared > MAX_FRAME_SIZE {
                return Err(self.poison(DecodeError::MalformedHeader(
                    "declared length exceeds maximum frame size",
                )));
            }

            // service(2) + instance(2) + method(2) + length(4) + covered
            let total = 10 + declared as usize;
            if self.buf.len() < total {
                break;
            }

            let frame = self.buf.split_to(total);
            match codec::decode(&frame) {
                Ok(msg) => messages.push(msg),
                Err(DecodeError::UnknownMessageType(byte)) => {
                    // Frame boundary is known; drop this message only.
                    debug!(type_byte = byte, "Skipping frame with unknown message type");
                }
                Err(err) => return Err(self.poison(err)),
            }
        }

        Ok(messages)
    }

    fn poison(&mut self, err: DecodeError) -> DecodeError {
        self.poison = Some(err.clone());
        err
    }
}
