//! Transport abstraction.
//!
//! The engine is transport-agnostic: an endpoint is anything that can
//! send byte frames and produce an inbound stream of byte chunks. The
//! inbound stream is infinite until the connection closes and is not
//! restartable afterwards; a closed stream means the endpoint is lost.
//!
//! Two implementations ship here: TCP ([`tcp`]) and an in-memory pair
//! ([`memory`]) for tests.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

/// Inbound byte chunks from the peer. Chunk boundaries carry no meaning;
/// framing belongs to [`crate::FrameDecoder`].
pub type ChunkReceiver = mpsc::Receiver<Bytes>;

/// Capacity of inbound chunk channels.
const CHUNK_CHANNEL_CAPACITY: usize = 64;

/// Outbound half of a transport endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one encoded frame to the peer.
    async fn send(&self, frame: Bytes) -> std::io::Result<()>;
}

/// In-memory transport pair for tests and same-process wiring.
pub mod memory {
    use super::*;

    /// One side of an in-memory duplex link.
    pub struct MemoryTransport {
        tx: mpsc::Sender<Bytes>,
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn send(&self, frame: Bytes) -> std::io::Result<()> {
            self.tx
                .send(frame)
                .await
                .map_err(|_| std::io::Error::new(std::io::ErrorKind::BrokenPipe, "peer closed"))
        }
    }

    /// Create a connected pair of in-memory endpoints.
    ///
    /// Frames sent on one side arrive as chunks on the other, one frame
    /// per chunk.
    pub fn pair() -> (
        (MemoryTransport, ChunkReceiver),
        (MemoryTransport, ChunkReceiver),
    ) {
        let (a_tx, b_rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);
        let (b_tx, a_rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);
        ((MemoryTransport { tx: a_tx }, a_rx), (MemoryTransport { tx: b_tx }, b_rx))
    }
}

/// TCP transport.
pub mod tcp {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::tcp::OwnedWriteHalf;
    use tokio::net::{TcpStream, ToSocketAddrs};
    use tokio::sync::Mutex;
    use tracing::debug;

    /// Read buffer size for the inbound loop.
    const READ_BUF_SIZE: usize = 4096;

    /// Outbound half of a TCP endpoint.
    pub struct TcpTransport {
        writer: Mutex<OwnedWriteHalf>,
    }

    #[async_trait]
    impl Transport for TcpTransport {
        async fn send(&self, frame: Bytes) -> std::io::Result<()> {
            let mut writer = self.writer.lock().await;
            writer.write_all(&frame).await?;
            writer.flush().await
        }
    }

    /// Connect to a remote endpoint.
    pub async fn connect(
        addr: impl ToSocketAddrs,
    ) -> std::io::Result<(TcpTransport, ChunkReceiver)> {
        let stream = TcpStream::connect(addr).await?;
        Ok(from_stream(stream))
    }

    /// Wrap an accepted stream into an endpoint.
    ///
    /// Spawns the read loop that feeds inbound chunks; the channel closes
    /// when the peer disconnects.
    pub fn from_stream(stream: TcpStream) -> (TcpTransport, ChunkReceiver) {
        let (mut reader, writer) = stream.into_split();
        let (tx, rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            let mut buf = [0u8; READ_BUF_SIZE];
            loop {
                match reader.read(&mut buf).await {
                    Ok(0) => {
                        debug!("TCP endpoint closed by peer");
                        break;
                    }
                    Ok(n) => {
                        if tx.send(Bytes::copy_from_slice(&buf[..n])).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!(error = %e, "TCP read failed, closing endpoint");
                        break;
                    }
                }
            }
        });

        (TcpTransport { writer: Mutex::new(writer) }, rx)
    }
}
