//! TCP transport with 24-bit big-endian length framing.

use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Decoder, Encoder, Framed};

use super::FrameTransport;
use crate::error::TransportError;

/// Largest packet the three-byte length prefix can describe.
const MAX_PACKET_LEN: usize = 0x00FF_FFFF;

/// Width of the length prefix in bytes.
const PREFIX_LEN: usize = 3;

/// Length-prefix codec: 24-bit big-endian packet length, then the packet.
struct PacketCodec {
    max_packet_len: usize,
}

impl Decoder for PacketCodec {
    type Item = Bytes;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < PREFIX_LEN {
            return Ok(None);
        }
        let declared = {
            let prefix = &src[..PREFIX_LEN];
            ((prefix[0] as usize) << 16) | ((prefix[1] as usize) << 8) | prefix[2] as usize
        };
        if declared > self.max_packet_len {
            return Err(TransportError::Oversized {
                size: declared,
                max: self.max_packet_len,
            });
        }
        if src.len() < PREFIX_LEN + declared {
            src.reserve(PREFIX_LEN + declared - src.len());
            return Ok(None);
        }
        src.advance(PREFIX_LEN);
        Ok(Some(src.split_to(declared).freeze()))
    }
}

impl Encoder<Bytes> for PacketCodec {
    type Error = TransportError;

    fn encode(&mut self, packet: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if packet.len() > self.max_packet_len {
            return Err(TransportError::Oversized {
                size: packet.len(),
                max: self.max_packet_len,
            });
        }
        dst.reserve(PREFIX_LEN + packet.len());
        dst.put_uint(packet.len() as u64, PREFIX_LEN);
        dst.extend_from_slice(&packet);
        Ok(())
    }
}

/// Frame transport over a TCP stream.
pub struct TcpTransport {
    framed: Framed<TcpStream, PacketCodec>,
}

impl TcpTransport {
    /// Wrap an established TCP stream.
    #[must_use]
    pub fn new(stream: TcpStream) -> Self { Self::with_max_packet_len(stream, MAX_PACKET_LEN) }

    /// Wrap a TCP stream, rejecting packets above `max_packet_len`.
    #[must_use]
    pub fn with_max_packet_len(stream: TcpStream, max_packet_len: usize) -> Self {
        let codec = PacketCodec {
            max_packet_len: max_packet_len.min(MAX_PACKET_LEN),
        };
        Self {
            framed: Framed::new(stream, codec),
        }
    }
}

#[async_trait]
impl FrameTransport for TcpTransport {
    async fn recv(&mut self) -> Result<Option<Bytes>, TransportError> {
        self.framed.next().await.transpose()
    }

    async fn send(&mut self, packet: Bytes) -> Result<(), TransportError> {
        self.framed.send(packet).await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.framed.close().await
    }
}
