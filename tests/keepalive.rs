//! Keep-alive liveness: periodic pings, echo replies, and timeout closes.

mod common;

use std::time::Duration;

use bytes::Bytes;
use common::Probe;
use rsocket_wire::{Connector, ErrorCode, Frame, transport::local_pair};

fn short_keepalive_connector() -> Connector {
    Connector::new().keep_alive(Duration::from_millis(500), Duration::from_secs(2))
}

#[tokio::test(start_paused = true)]
async fn client_pings_on_the_configured_interval() {
    let (client_end, probe_end) = local_pair(32);
    let mut probe = Probe::new(probe_end);
    let _connection = short_keepalive_connector()
        .connect(client_end)
        .await
        .expect("connect");

    let Frame::Setup { keepalive_interval, .. } = probe.recv_frame().await else {
        panic!("first frame must be SETUP");
    };
    assert_eq!(keepalive_interval, 500);

    for _ in 0..3 {
        let frame = probe.recv_frame().await;
        let Frame::KeepAlive { respond: true, data, .. } = frame else {
            panic!("expected a KEEPALIVE ping, got {frame:?}");
        };
        assert!(data.is_empty());
        // Answer so the liveness deadline keeps moving.
        probe
            .send_frame(Frame::KeepAlive {
                respond: false,
                last_received_position: 0,
                data: Bytes::new(),
            })
            .await;
    }
}

#[tokio::test(start_paused = true)]
async fn silent_peer_triggers_a_keepalive_timeout_close() {
    let (client_end, probe_end) = local_pair(64);
    let mut probe = Probe::new(probe_end);
    let connection = short_keepalive_connector()
        .connect(client_end)
        .await
        .expect("connect");

    assert!(matches!(probe.recv_frame().await, Frame::Setup { .. }));

    // Swallow pings without ever answering; the deadline fires at 2s.
    let deadline_error = loop {
        match probe.recv_frame().await {
            Frame::KeepAlive { .. } => {}
            Frame::Error { stream_id, code, data } => break (stream_id, code, data),
            other => panic!("unexpected frame while waiting for timeout: {other:?}"),
        }
    };
    let (stream_id, code, data) = deadline_error;
    assert_eq!(stream_id, 0);
    assert_eq!(code, ErrorCode::CONNECTION_ERROR);
    assert_eq!(data.as_ref(), b"keepalive timeout");

    connection.closed().await;
}

#[tokio::test(start_paused = true)]
async fn answered_pings_keep_the_connection_established() {
    let (client_end, probe_end) = local_pair(64);
    let mut probe = Probe::new(probe_end);
    let connection = short_keepalive_connector()
        .connect(client_end)
        .await
        .expect("connect");

    assert!(matches!(probe.recv_frame().await, Frame::Setup { .. }));

    // Echo every ping for three seconds of virtual time; no error may
    // appear and the connection must stay open.
    let horizon = tokio::time::Instant::now() + Duration::from_secs(3);
    while tokio::time::Instant::now() < horizon {
        match probe.recv_frame().await {
            Frame::KeepAlive { respond: true, data, .. } => {
                probe
                    .send_frame(Frame::KeepAlive {
                        respond: false,
                        last_received_position: 0,
                        data,
                    })
                    .await;
            }
            Frame::KeepAlive { respond: false, .. } => {}
            other => panic!("connection should stay quiet, got {other:?}"),
        }
    }
    assert!(!connection.is_closed());
}

#[tokio::test(start_paused = true)]
async fn engine_answers_pings_with_an_echo() {
    let (client_end, probe_end) = local_pair(64);
    let mut probe = Probe::new(probe_end);
    let _connection = short_keepalive_connector()
        .connect(client_end)
        .await
        .expect("connect");

    assert!(matches!(probe.recv_frame().await, Frame::Setup { .. }));

    probe
        .send_frame(Frame::KeepAlive {
            respond: true,
            last_received_position: 0,
            data: Bytes::from_static(b"heartbeat"),
        })
        .await;

    let reply = loop {
        match probe.recv_frame().await {
            Frame::KeepAlive { respond: false, data, .. } => break data,
            Frame::KeepAlive { respond: true, .. } => {}
            other => panic!("expected a KEEPALIVE reply, got {other:?}"),
        }
    };
    assert_eq!(reply.as_ref(), b"heartbeat");
}
