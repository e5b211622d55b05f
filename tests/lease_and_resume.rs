//! Lease gating and resume handshake behaviour.

mod common;

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use common::{Probe, connect_pair, echo_handler};
use rsocket_wire::{
    Connector,
    ErrorCode,
    Frame,
    InMemoryResumeStore,
    Payload,
    RSocketError,
    ResumeStore,
    Server,
    frame::Version,
    transport::local_pair,
};

#[tokio::test]
async fn requests_without_a_lease_are_rejected_locally() {
    let server = Server::with_responder(echo_handler());
    let connector = Connector::new().lease(true);
    let (client, _server_connection) = connect_pair(server, connector).await;

    let err = client
        .requester()
        .request_response(Payload::empty())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RSocketError::Stream {
            code: ErrorCode::REJECTED,
            ..
        }
    ));
}

#[tokio::test]
async fn lease_grants_admit_requests_until_exhausted() {
    let server = Server::with_responder(echo_handler());
    let connector = Connector::new().lease(true);
    let (client, server_connection) = connect_pair(server, connector).await;

    server_connection
        .send_lease(Duration::from_secs(60), 2)
        .await
        .expect("send lease");

    // The grant travels asynchronously; retry until it lands.
    let requester = client.requester();
    let mut admitted = 0u32;
    for _ in 0..100 {
        match requester.request_response(Payload::empty()).await {
            Ok(_) => {
                admitted += 1;
                break;
            }
            Err(_) => tokio::time::sleep(Duration::from_millis(10)).await,
        }
    }
    assert_eq!(admitted, 1, "lease grant never arrived");

    // One slot left, then exhaustion.
    requester
        .request_response(Payload::empty())
        .await
        .expect("second leased request");
    let err = requester.request_response(Payload::empty()).await.unwrap_err();
    assert!(matches!(
        err,
        RSocketError::Stream {
            code: ErrorCode::REJECTED,
            ..
        }
    ));
}

#[tokio::test]
async fn resume_handshake_is_answered_from_the_store() {
    let store = Arc::new(InMemoryResumeStore::new());
    store.save(b"session-7", 42);

    let server = Server::with_responder(echo_handler()).resume_store(store);
    let (probe_end, server_end) = local_pair(32);
    let accepting = tokio::spawn(async move { server.accept(server_end).await });
    let mut probe = Probe::new(probe_end);

    probe
        .send_frame(Frame::Resume {
            version: Version::V1,
            resume_token: Bytes::from_static(b"session-7"),
            last_received_server_position: 40,
            first_available_client_position: 0,
        })
        .await;

    let frame = probe.recv_frame().await;
    assert_eq!(
        frame,
        Frame::ResumeOk {
            last_received_client_position: 42
        }
    );
    accepting.await.expect("join").expect("resumed accept");
}

#[tokio::test]
async fn unknown_resume_token_is_rejected() {
    let server =
        Server::with_responder(echo_handler()).resume_store(Arc::new(InMemoryResumeStore::new()));
    let (probe_end, server_end) = local_pair(32);
    let accepting = tokio::spawn(async move { server.accept(server_end).await });
    let mut probe = Probe::new(probe_end);

    probe
        .send_frame(Frame::Resume {
            version: Version::V1,
            resume_token: Bytes::from_static(b"who-dis"),
            last_received_server_position: 0,
            first_available_client_position: 0,
        })
        .await;

    let frame = probe.recv_frame().await;
    assert!(matches!(
        frame,
        Frame::Error {
            stream_id: 0,
            code: ErrorCode::REJECTED_RESUME,
            ..
        }
    ));
    assert!(accepting.await.expect("join").is_err());
}

#[tokio::test]
async fn resume_without_a_store_is_rejected() {
    let server = Server::with_responder(echo_handler());
    let (probe_end, server_end) = local_pair(32);
    let accepting = tokio::spawn(async move { server.accept(server_end).await });
    let mut probe = Probe::new(probe_end);

    probe
        .send_frame(Frame::Resume {
            version: Version::V1,
            resume_token: Bytes::from_static(b"session-7"),
            last_received_server_position: 0,
            first_available_client_position: 0,
        })
        .await;

    let frame = probe.recv_frame().await;
    assert!(matches!(
        frame,
        Frame::Error {
            stream_id: 0,
            code: ErrorCode::REJECTED_RESUME,
            ..
        }
    ));
    assert!(accepting.await.expect("join").is_err());
}
