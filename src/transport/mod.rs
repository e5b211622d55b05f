//! Duplex frame channels the engine runs over.
//!
//! A transport moves whole frame packets; whether a length prefix exists on
//! the wire is the transport's business. TCP prefixes every frame with a
//! 24-bit big-endian length; the in-process channel passes packets whole.

pub mod local;
pub mod tcp;

use async_trait::async_trait;
use bytes::Bytes;

pub use self::{
    local::{LocalTransport, local_pair},
    tcp::TcpTransport,
};
use crate::error::TransportError;

/// A reliable, ordered, duplex channel of frame packets.
#[async_trait]
pub trait FrameTransport: Send + 'static {
    /// Receive the next whole frame packet.
    ///
    /// Returns `Ok(None)` at end of stream.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when the channel fails.
    async fn recv(&mut self) -> Result<Option<Bytes>, TransportError>;

    /// Send one whole frame packet.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when the channel fails or rejects the
    /// packet.
    async fn send(&mut self, packet: Bytes) -> Result<(), TransportError>;

    /// Close the channel. Further operations fail.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when teardown itself fails.
    async fn close(&mut self) -> Result<(), TransportError> { Ok(()) }
}
