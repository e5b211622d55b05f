//! Connection-level behaviour: ignored frames, close cascades, rejection.

mod common;

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use common::{Probe, connect_pair, echo_handler};
use futures::StreamExt;
use rsocket_wire::{
    Connector,
    ErrorCode,
    Frame,
    Payload,
    RSocketError,
    RequestHandler,
    Server,
    responder::PayloadStream,
    transport::local_pair,
};

/// A payload frame for a stream nobody opened goes to the ignored-frame
/// consumer and the connection stays usable.
#[tokio::test]
async fn unknown_stream_frames_are_ignored_not_fatal() {
    let seen: Arc<Mutex<Vec<(u32, String)>>> = Arc::default();
    let capture = Arc::clone(&seen);

    let (client_end, probe_end) = local_pair(32);
    let mut probe = Probe::new(probe_end);
    let connection = Connector::new()
        .ignored_frames(Arc::new(move |frame: &Frame| {
            capture
                .lock()
                .expect("capture mutex")
                .push((frame.stream_id(), frame.type_name().to_owned()));
        }))
        .connect(client_end)
        .await
        .expect("connect");

    assert!(matches!(probe.recv_frame().await, Frame::Setup { .. }));

    // A payload for stream 99, which was never opened.
    probe
        .send_frame(Frame::payload_next(
            99,
            Payload::new(Bytes::from_static(b"stray")),
            false,
        ))
        .await;

    // The connection must still serve requests afterwards.
    let requester = connection.requester();
    let pending = tokio::spawn(async move {
        requester
            .request_response(Payload::new(Bytes::from_static(b"ping")))
            .await
    });
    let request = probe.recv_non_keepalive().await;
    let Frame::RequestResponse { stream_id, .. } = request else {
        panic!("expected the request frame, got {request:?}");
    };
    probe
        .send_frame(Frame::payload_next(
            stream_id,
            Payload::new(Bytes::from_static(b"pong")),
            true,
        ))
        .await;
    let response = pending.await.expect("join").expect("response");
    assert_eq!(response.data().as_ref(), b"pong");

    let seen = seen.lock().expect("capture mutex");
    assert_eq!(seen.as_slice(), &[(99, "PAYLOAD".to_owned())]);
}

#[tokio::test]
async fn close_cancels_live_streams_before_reporting_closed() {
    // A responder stream that never completes.
    let handler = RequestHandler::builder()
        .request_stream(|_payload| -> PayloadStream {
            Box::pin(futures::stream::pending())
        })
        .build();
    let server = Server::with_responder(Arc::new(handler));
    let (client, _server_connection) = connect_pair(server, Connector::new()).await;

    let mut stream = client.requester().request_stream(Payload::empty());
    let requester = client.requester();
    client.close().await;

    let err = stream.next().await.expect("terminal signal").unwrap_err();
    assert!(matches!(err, RSocketError::ConnectionClosed { .. }));

    // New work is refused after close.
    let refused = requester.request_response(Payload::empty()).await;
    assert!(matches!(
        refused,
        Err(RSocketError::ConnectionClosed { .. })
    ));
}

#[tokio::test]
async fn graceful_close_sends_connection_close_to_the_peer() {
    let (client_end, probe_end) = local_pair(32);
    let mut probe = Probe::new(probe_end);
    let connection = Connector::new().connect(client_end).await.expect("connect");
    assert!(matches!(probe.recv_frame().await, Frame::Setup { .. }));

    connection.close().await;

    let frame = probe.recv_non_keepalive().await;
    assert!(matches!(
        frame,
        Frame::Error {
            stream_id: 0,
            code: ErrorCode::CONNECTION_CLOSE,
            ..
        }
    ));
}

#[tokio::test]
async fn peer_connection_error_terminates_pending_requests() {
    let (client_end, probe_end) = local_pair(32);
    let mut probe = Probe::new(probe_end);
    let connection = Connector::new().connect(client_end).await.expect("connect");
    assert!(matches!(probe.recv_frame().await, Frame::Setup { .. }));

    let requester = connection.requester();
    let pending = tokio::spawn(async move {
        requester.request_response(Payload::empty()).await
    });
    assert!(matches!(
        probe.recv_non_keepalive().await,
        Frame::RequestResponse { .. }
    ));

    probe
        .send_frame(Frame::error(
            0,
            ErrorCode::CONNECTION_ERROR,
            "peer going away",
        ))
        .await;

    let err = pending.await.expect("join").unwrap_err();
    let RSocketError::ConnectionClosed { code, message } = err else {
        panic!("expected connection closure, got {err}");
    };
    assert_eq!(code, ErrorCode::CONNECTION_ERROR);
    assert!(message.contains("peer going away"));
}

#[tokio::test]
async fn transport_eof_closes_with_connection_close() {
    let (client_end, probe_end) = local_pair(32);
    let mut probe = Probe::new(probe_end);
    let connection = Connector::new().connect(client_end).await.expect("connect");
    assert!(matches!(probe.recv_frame().await, Frame::Setup { .. }));

    let requester = connection.requester();
    let pending = tokio::spawn(async move {
        requester.request_response(Payload::empty()).await
    });
    assert!(matches!(
        probe.recv_non_keepalive().await,
        Frame::RequestResponse { .. }
    ));

    drop(probe);

    let err = pending.await.expect("join").unwrap_err();
    assert!(matches!(err, RSocketError::ConnectionClosed { .. }));
    connection.closed().await;
}

#[tokio::test]
async fn malformed_frames_are_connection_fatal() {
    let (client_end, probe_end) = local_pair(32);
    let mut probe = Probe::new(probe_end);
    let connection = Connector::new().connect(client_end).await.expect("connect");
    assert!(matches!(probe.recv_frame().await, Frame::Setup { .. }));

    // REQUEST_N with n == 0 violates the protocol.
    probe
        .send_raw(Bytes::from_static(&[0, 0, 0, 1, 0x20, 0x00, 0, 0, 0, 0]))
        .await;

    let frame = probe.recv_non_keepalive().await;
    assert!(matches!(
        frame,
        Frame::Error {
            stream_id: 0,
            code: ErrorCode::CONNECTION_ERROR,
            ..
        }
    ));
    connection.closed().await;
}

#[tokio::test]
async fn acceptor_rejection_reaches_the_client_as_setup_error() {
    let server = Server::new(|_setup, _requester| {
        Err::<Arc<dyn rsocket_wire::RSocket>, _>(RSocketError::rejected("not today"))
    });
    let (client_end, server_end) = local_pair(32);
    let accepting = tokio::spawn(async move { server.accept(server_end).await });

    // The client connects optimistically; the rejection closes the
    // connection and surfaces on the first use.
    let connection = Connector::new().connect(client_end).await.expect("connect");
    let accept_err = accepting.await.expect("join").unwrap_err();
    assert!(matches!(
        accept_err,
        RSocketError::Setup {
            code: ErrorCode::REJECTED_SETUP,
            ..
        }
    ));

    let err = connection
        .requester()
        .request_response(Payload::empty())
        .await
        .unwrap_err();
    let RSocketError::ConnectionClosed { code, .. } = err else {
        panic!("expected closure, got {err}");
    };
    assert_eq!(code, ErrorCode::REJECTED_SETUP);
}

#[tokio::test]
async fn invalid_version_is_rejected_with_unsupported_setup() {
    let server = Server::with_responder(echo_handler());
    let (probe_end, server_end) = local_pair(32);
    let accepting = tokio::spawn(async move { server.accept(server_end).await });
    let mut probe = Probe::new(probe_end);

    let Frame::Setup {
        keepalive_interval,
        max_lifetime,
        resume_token,
        metadata_mime_type,
        data_mime_type,
        lease_requested,
        payload,
        ..
    } = Probe::quiet_setup()
    else {
        unreachable!();
    };
    probe
        .send_frame(Frame::Setup {
            version: rsocket_wire::frame::Version { major: 9, minor: 9 },
            keepalive_interval,
            max_lifetime,
            resume_token,
            metadata_mime_type,
            data_mime_type,
            lease_requested,
            payload,
        })
        .await;

    let frame = probe.recv_frame().await;
    assert!(matches!(
        frame,
        Frame::Error {
            stream_id: 0,
            code: ErrorCode::UNSUPPORTED_SETUP,
            ..
        }
    ));
    assert!(accepting.await.expect("join").is_err());
}

#[tokio::test]
async fn metadata_push_reaches_the_responder() {
    let pushed: Arc<Mutex<Vec<Bytes>>> = Arc::default();
    let capture = Arc::clone(&pushed);
    let handler = RequestHandler::builder()
        .metadata_push(move |metadata| {
            let capture = Arc::clone(&capture);
            async move {
                capture.lock().expect("capture mutex").push(metadata);
                Ok(())
            }
        })
        .build();
    let server = Server::with_responder(Arc::new(handler));
    let (client, _server_connection) = connect_pair(server, Connector::new()).await;

    client
        .requester()
        .metadata_push(Bytes::from_static(b"routing-update"))
        .await
        .expect("push");

    // Delivery is asynchronous; poll briefly.
    for _ in 0..50 {
        if !pushed.lock().expect("capture mutex").is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    let pushed = pushed.lock().expect("capture mutex");
    assert_eq!(pushed.as_slice(), &[Bytes::from_static(b"routing-update")]);
}
