//! Request/response interactions end to end.

mod common;

use std::sync::Arc;

use bytes::Bytes;
use common::{connect_pair, echo_handler};
use rsocket_wire::{Connector, ErrorCode, Payload, RSocketError, RequestHandler, Server};

#[tokio::test]
async fn round_trip_returns_the_handler_response() {
    let server = Server::with_responder(echo_handler());
    let (client, _server_connection) = connect_pair(server, Connector::new()).await;

    let response = client
        .requester()
        .request_response(Payload::new(Bytes::from_static(b"ping")))
        .await
        .expect("response");
    assert_eq!(response.data().as_ref(), b"ping");
}

#[tokio::test]
async fn metadata_survives_the_round_trip() {
    let server = Server::with_responder(echo_handler());
    let (client, _server_connection) = connect_pair(server, Connector::new()).await;

    let response = client
        .requester()
        .request_response(Payload::with_metadata(
            Bytes::from_static(b"body"),
            Bytes::from_static(b"route"),
        ))
        .await
        .expect("response");
    assert_eq!(response.data().as_ref(), b"body");
    assert_eq!(response.metadata().expect("metadata").as_ref(), b"route");
}

#[tokio::test]
async fn handler_errors_surface_as_stream_errors() {
    let handler = RequestHandler::builder()
        .request_response(|_payload: Payload| async move {
            Err::<Payload, _>(RSocketError::application("backend unavailable"))
        })
        .build();
    let server = Server::with_responder(Arc::new(handler));
    let (client, _server_connection) = connect_pair(server, Connector::new()).await;

    let err = client
        .requester()
        .request_response(Payload::empty())
        .await
        .unwrap_err();
    let RSocketError::Stream { code, message } = err else {
        panic!("expected a stream error, got {err}");
    };
    assert_eq!(code, ErrorCode::APPLICATION_ERROR);
    assert!(message.contains("backend unavailable"));
}

#[tokio::test]
async fn unconfigured_interactions_reject() {
    // No request_response closure at all.
    let server = Server::with_responder(Arc::new(RequestHandler::default()));
    let (client, _server_connection) = connect_pair(server, Connector::new()).await;

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
async fn concurrent_requests_multiplex_over_one_connection() {
    let server = Server::with_responder(echo_handler());
    let (client, _server_connection) = connect_pair(server, Connector::new()).await;

    let requester = client.requester();
    let tasks: Vec<_> = (0u8..16)
        .map(|n| {
            let requester = requester.clone();
            tokio::spawn(async move {
                requester
                    .request_response(Payload::new(vec![n]))
                    .await
                    .expect("response")
            })
        })
        .collect();
    for (n, task) in tasks.into_iter().enumerate() {
        let response = task.await.expect("join");
        assert_eq!(response.data().as_ref(), &[n as u8]);
    }
}

#[tokio::test]
async fn server_can_request_back_to_the_client() {
    let server = Server::with_responder(Arc::new(RequestHandler::default()));
    let connector = Connector::new().responder(echo_handler());
    let (_client, server_connection) = connect_pair(server, connector).await;

    let response = server_connection
        .requester()
        .request_response(Payload::new(Bytes::from_static(b"reverse")))
        .await
        .expect("client-side responder answers");
    assert_eq!(response.data().as_ref(), b"reverse");
}

#[tokio::test]
async fn fire_and_forget_completes_without_a_response() {
    let server = Server::with_responder(echo_handler());
    let (client, _server_connection) = connect_pair(server, Connector::new()).await;

    client
        .requester()
        .fire_and_forget(Payload::new(Bytes::from_static(b"event")))
        .await
        .expect("fire and forget");
}

#[tokio::test]
async fn handler_panics_become_application_errors() {
    let handler = RequestHandler::builder()
        .request_response(|payload: Payload| async move {
            if payload.data().is_empty() {
                panic!("handler exploded");
            }
            Ok(payload)
        })
        .build();
    let server = Server::with_responder(Arc::new(handler));
    let (client, _server_connection) = connect_pair(server, Connector::new()).await;

    let err = client
        .requester()
        .request_response(Payload::empty())
        .await
        .unwrap_err();
    let RSocketError::Stream { code, message } = err else {
        panic!("expected a stream error, got {err}");
    };
    assert_eq!(code, ErrorCode::APPLICATION_ERROR);
    assert!(message.contains("handler exploded"));
}
