//! Fragmented requests and responses end to end.

mod common;

use common::{Probe, connect_pair, echo_handler};
use rsocket_wire::{Connector, Frame, Payload, Server, transport::local_pair};

fn big_payload() -> Payload {
    Payload::with_metadata(vec![0x05u8; 200], vec![0x03u8; 150])
}

#[tokio::test]
async fn oversize_round_trip_survives_mtu_64_both_ways() {
    let server = Server::with_responder(echo_handler()).fragment_mtu(64);
    let connector = Connector::new().fragment_mtu(64);
    let (client, _server_connection) = connect_pair(server, connector).await;

    let response = client
        .requester()
        .request_response(big_payload())
        .await
        .expect("response");
    assert_eq!(response.data().as_ref(), &[0x05u8; 200][..]);
    assert_eq!(
        response.metadata().expect("metadata").as_ref(),
        &[0x03u8; 150][..]
    );
}

/// Every packet an mtu-64 client puts on the wire fits in 64 bytes, and the
/// chain carries FOLLOWS on all but the last fragment.
#[tokio::test]
async fn fragments_on_the_wire_respect_the_mtu() {
    let (client_end, probe_end) = local_pair(64);
    let mut probe = Probe::new(probe_end);
    let connection = Connector::new()
        .fragment_mtu(64)
        .connect(client_end)
        .await
        .expect("connect");
    assert!(matches!(probe.recv_frame().await, Frame::Setup { .. }));

    let requester = connection.requester();
    let _pending = tokio::spawn(async move {
        requester.request_response(big_payload()).await
    });

    let head = probe.recv_non_keepalive().await;
    assert!(head.encoded_len() <= 64);
    let Frame::RequestResponse { stream_id, follows: true, .. } = head else {
        panic!("expected a fragmented request head, got {head:?}");
    };

    let mut saw_terminal = false;
    while !saw_terminal {
        let frame = probe.recv_non_keepalive().await;
        assert!(frame.encoded_len() <= 64, "fragment exceeds mtu");
        let Frame::Payload { stream_id: id, follows, .. } = frame else {
            panic!("expected payload fragments, got {frame:?}");
        };
        assert_eq!(id, stream_id);
        saw_terminal = !follows;
    }
}

#[tokio::test]
async fn streamed_payloads_fragment_and_reassemble() {
    use std::sync::Arc;

    use bytes::Bytes;
    use rsocket_wire::{RequestHandler, responder::payload_stream};

    let server = Server::with_responder(Arc::new(
        RequestHandler::builder()
            .request_stream(|_payload| {
                payload_stream(vec![
                    Payload::new(Bytes::from(vec![1u8; 300])),
                    Payload::new(Bytes::from(vec![2u8; 300])),
                ])
            })
            .build(),
    ))
    .fragment_mtu(64);
    let (client, _server_connection) = connect_pair(server, Connector::new()).await;

    let stream = client.requester().request_stream(Payload::empty());
    let data = common::collect_data(stream).await;
    assert_eq!(data.len(), 2);
    assert_eq!(data[0].as_ref(), &[1u8; 300][..]);
    assert_eq!(data[1].as_ref(), &[2u8; 300][..]);
}
