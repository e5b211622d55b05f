//! Shared fixtures for the integration suite.

#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use futures::StreamExt;
use rsocket_wire::{
    Connection,
    Connector,
    Frame,
    Payload,
    RequestHandler,
    Server,
    frame::Version,
    responder::{PayloadStream, payload_stream},
    transport::{FrameTransport, LocalTransport, local_pair},
};
use tokio::time::timeout;

/// Connect an engine client and an engine server over an in-process pair.
pub async fn connect_pair(server: Server, connector: Connector) -> (Connection, Connection) {
    let (client_end, server_end) = local_pair(32);
    let accepting = tokio::spawn(async move { server.accept(server_end).await });
    let client = connector.connect(client_end).await.expect("client connect");
    let server_connection = accepting
        .await
        .expect("accept task")
        .expect("server accept");
    (client, server_connection)
}

/// Responder echoing request/response payloads and serving a fixed stream.
pub fn echo_handler() -> Arc<RequestHandler> {
    Arc::new(
        RequestHandler::builder()
            .request_response(|payload: Payload| async move { Ok(payload) })
            .fire_and_forget(|_payload| async move { Ok(()) })
            .request_stream(|_payload| {
                payload_stream(vec![
                    Payload::new(Bytes::from_static(b"a")),
                    Payload::new(Bytes::from_static(b"b")),
                    Payload::new(Bytes::from_static(b"c")),
                ])
            })
            .request_channel(|inbound: PayloadStream| inbound)
            .build(),
    )
}

/// Collect a payload stream to completion, panicking on errors.
pub async fn collect_data(mut stream: PayloadStream) -> Vec<Bytes> {
    let mut out = Vec::new();
    while let Some(item) = stream.next().await {
        out.push(item.expect("stream item").data().clone());
    }
    out
}

/// Raw-wire peer: speaks packets directly so tests can assert exact frames.
pub struct Probe {
    transport: LocalTransport,
}

impl Probe {
    pub fn new(transport: LocalTransport) -> Self { Self { transport } }

    /// Receive and decode the next frame, failing after two seconds.
    pub async fn recv_frame(&mut self) -> Frame {
        let packet = timeout(Duration::from_secs(2), self.transport.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("transport error")
            .expect("unexpected end of stream");
        Frame::decode(packet).expect("peer sent an undecodable frame")
    }

    /// Receive the next frame unless `window` elapses first.
    pub async fn try_recv_frame(&mut self, window: Duration) -> Option<Frame> {
        match timeout(window, self.transport.recv()).await {
            Err(_elapsed) => None,
            Ok(result) => {
                let packet = result.expect("transport error")?;
                Some(Frame::decode(packet).expect("peer sent an undecodable frame"))
            }
        }
    }

    /// Receive frames until one is not a KEEPALIVE.
    pub async fn recv_non_keepalive(&mut self) -> Frame {
        loop {
            let frame = self.recv_frame().await;
            if !matches!(frame, Frame::KeepAlive { .. }) {
                return frame;
            }
        }
    }

    /// Encode and send one frame.
    pub async fn send_frame(&mut self, frame: Frame) {
        let packet = frame.encode().expect("encode");
        self.transport.send(packet).await.expect("send");
    }

    /// Send a raw packet, bypassing the encoder. For malformed-input tests.
    pub async fn send_raw(&mut self, packet: Bytes) {
        self.transport.send(packet).await.expect("send raw");
    }

    /// A well-formed SETUP with quiet keep-alive timing for short tests.
    pub fn quiet_setup() -> Frame {
        Frame::Setup {
            version: Version::V1,
            keepalive_interval: 60_000,
            max_lifetime: 120_000,
            resume_token: None,
            metadata_mime_type: "application/octet-stream".into(),
            data_mime_type: "application/octet-stream".into(),
            lease_requested: false,
            payload: Payload::empty(),
        }
    }
}
