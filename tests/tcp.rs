//! End-to-end over real TCP sockets with length-prefixed framing.

mod common;

use std::sync::Arc;

use bytes::Bytes;
use common::echo_handler;
use futures::StreamExt;
use rsocket_wire::{Connector, Payload, Server};
use tokio::net::TcpListener;

#[tokio::test]
async fn request_response_over_loopback_tcp() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let server = Arc::new(Server::with_responder(echo_handler()));
    tokio::spawn(server.serve(listener));

    let connection = Connector::new()
        .connect_tcp(addr)
        .await
        .expect("connect over TCP");
    let response = connection
        .requester()
        .request_response(Payload::new(Bytes::from_static(b"over-tcp")))
        .await
        .expect("response");
    assert_eq!(response.data().as_ref(), b"over-tcp");
}

#[tokio::test]
async fn streaming_over_tcp_with_fragmentation() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let server = Arc::new(Server::with_responder(echo_handler()).fragment_mtu(64));
    tokio::spawn(server.serve(listener));

    let connection = Connector::new()
        .fragment_mtu(64)
        .connect_tcp(addr)
        .await
        .expect("connect over TCP");

    let mut stream = connection
        .requester()
        .request_stream(Payload::new(Bytes::from_static(b"sub")));
    let mut collected = Vec::new();
    while let Some(item) = stream.next().await {
        collected.push(item.expect("payload"));
    }
    assert_eq!(collected.len(), 3);

    let response = connection
        .requester()
        .request_response(Payload::new(Bytes::from(vec![7u8; 500])))
        .await
        .expect("fragmented response");
    assert_eq!(response.data().len(), 500);
}
