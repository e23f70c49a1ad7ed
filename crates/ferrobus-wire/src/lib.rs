//! Ferrobus wire protocol: fixed-header binary codec, streaming frame
//! reassembly, and the transport abstraction the engine runs on.
//!
//! The header layout in [`codec`] is the only bit-exact surface of the
//! system and must stay stable across implementations.

pub mod codec;
pub mod message;
pub mod stream;
pub mod transport;

pub use codec::{decode, encode, DecodeError, HEADER_LEN, MAX_FRAME_SIZE};
pub use message::{Message, MessageType, ReturnCode, PROTOCOL_VERSION};
pub use stream::FrameDecoder;
pub use transport::{ChunkReceiver, Transport};
