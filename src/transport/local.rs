//! In-process transport passing whole-frame packets over channels.
//!
//! No length prefix is involved; each packet travels as one message. Used by
//! the integration tests and useful for wiring two engines inside one
//! process.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use super::FrameTransport;
use crate::error::TransportError;

/// One end of an in-process duplex packet channel.
pub struct LocalTransport {
    tx: mpsc::Sender<Bytes>,
    rx: mpsc::Receiver<Bytes>,
}

/// Create a connected pair of in-process transports.
///
/// `capacity` bounds each direction's in-flight packets; senders await when
/// the peer is slow, mirroring transport backpressure.
#[must_use]
pub fn local_pair(capacity: usize) -> (LocalTransport, LocalTransport) {
    let (a_tx, a_rx) = mpsc::channel(capacity);
    let (b_tx, b_rx) = mpsc::channel(capacity);
    (
        LocalTransport { tx: a_tx, rx: b_rx },
        LocalTransport { tx: b_tx, rx: a_rx },
    )
}

#[async_trait]
impl FrameTransport for LocalTransport {
    async fn recv(&mut self) -> Result<Option<Bytes>, TransportError> {
        Ok(self.rx.recv().await)
    }

    async fn send(&mut self, packet: Bytes) -> Result<(), TransportError> {
        self.tx
            .send(packet)
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.rx.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn packets_cross_between_the_ends() {
        let (mut left, mut right) = local_pair(4);
        left.send(Bytes::from_static(b"ping")).await.expect("send");
        let packet = right.recv().await.expect("recv").expect("open");
        assert_eq!(packet.as_ref(), b"ping");
    }

    #[tokio::test]
    async fn dropping_one_end_signals_eof() {
        let (left, mut right) = local_pair(4);
        drop(left);
        assert!(right.recv().await.expect("recv").is_none());
    }
}
