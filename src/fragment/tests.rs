//! Unit tests for the fragmentation layer.

use bytes::Bytes;
use rstest::rstest;

use super::*;
use crate::{
    error::ProtocolErrorKind,
    frame::Frame,
    payload::Payload,
};

fn fragmenter(mtu: usize) -> Fragmenter { Fragmenter::new(mtu).expect("valid mtu") }

fn reassemble_chain(frames: Vec<Frame>) -> Frame {
    let mut reassembler = Reassembler::new(usize::MAX);
    let mut out = None;
    for frame in frames {
        if let Some(frame) = reassembler.accept(frame).expect("accept fragment") {
            assert!(out.is_none(), "chain produced more than one frame");
            out = Some(frame);
        }
    }
    out.expect("chain must complete")
}

#[test]
fn mtu_below_minimum_is_rejected() {
    assert!(Fragmenter::new(MIN_FRAGMENT_MTU - 1).is_none());
    assert!(Fragmenter::new(MIN_FRAGMENT_MTU).is_some());
}

#[test]
fn small_frames_pass_through_whole() {
    let frame = Frame::RequestResponse {
        stream_id: 1,
        follows: false,
        payload: Payload::new(Bytes::from_static(b"small")),
    };
    let frames = fragmenter(64).fragment(frame.clone());
    assert_eq!(frames, vec![frame]);
}

#[test]
fn every_fragment_respects_the_mtu() {
    let frame = Frame::RequestResponse {
        stream_id: 3,
        follows: false,
        payload: Payload::with_metadata(vec![0x05u8; 200], vec![0x03u8; 150]),
    };
    let frames = fragmenter(64).fragment(frame);
    assert!(frames.len() > 1);
    for frame in &frames {
        assert!(frame.encoded_len() <= 64, "fragment exceeds mtu");
    }
}

#[test]
fn chain_links_follow_flags_head_to_terminal() {
    let frame = Frame::RequestResponse {
        stream_id: 3,
        follows: false,
        payload: Payload::with_metadata(vec![0x05u8; 200], vec![0x03u8; 150]),
    };
    let frames = fragmenter(64).fragment(frame);

    let (terminal, rest) = frames.split_last().expect("non-empty chain");
    assert!(matches!(
        rest[0],
        Frame::RequestResponse { follows: true, .. }
    ));
    // Terminal flags belong to the last fragment alone; continuations carry
    // only FOLLOWS.
    for middle in &rest[1..] {
        assert!(matches!(
            middle,
            Frame::Payload {
                follows: true,
                next: false,
                complete: false,
                ..
            }
        ));
    }
    assert!(matches!(
        terminal,
        Frame::Payload {
            follows: false,
            next: true,
            complete: true,
            ..
        }
    ));
}

#[rstest]
#[case::mtu_64(64)]
#[case::mtu_100(100)]
#[case::mtu_1500(1500)]
fn fragmented_request_reassembles_identically(#[case] mtu: usize) {
    let payload = Payload::with_metadata(vec![0x05u8; 200], vec![0x03u8; 150]);
    let frame = Frame::RequestResponse {
        stream_id: 3,
        follows: false,
        payload: payload.clone(),
    };
    let assembled = reassemble_chain(fragmenter(mtu).fragment(frame));
    let Frame::RequestResponse {
        stream_id,
        follows,
        payload: joined,
    } = assembled
    else {
        panic!("reassembly changed the frame kind");
    };
    assert_eq!(stream_id, 3);
    assert!(!follows);
    assert_eq!(joined, payload);
}

#[test]
fn fragmented_channel_keeps_terminal_complete_flag() {
    let frame = Frame::RequestChannel {
        stream_id: 5,
        follows: false,
        complete: true,
        initial_request_n: 4,
        payload: Payload::new(vec![7u8; 500]),
    };
    let frames = fragmenter(64).fragment(frame);
    // The head defers COMPLETE to the terminal fragment.
    assert!(matches!(
        frames[0],
        Frame::RequestChannel {
            follows: true,
            complete: false,
            ..
        }
    ));
    let assembled = reassemble_chain(frames);
    assert!(matches!(
        assembled,
        Frame::RequestChannel {
            complete: true,
            follows: false,
            ..
        }
    ));
}

#[test]
fn metadata_only_payload_fragments_and_reassembles() {
    let payload = Payload::with_metadata(Bytes::new(), vec![9u8; 300]);
    let frame = Frame::payload_next(7, payload.clone(), false);
    let assembled = reassemble_chain(fragmenter(64).fragment(frame));
    let Frame::Payload {
        payload: joined,
        next: true,
        ..
    } = assembled
    else {
        panic!("expected payload frame");
    };
    assert_eq!(joined, payload);
}

#[test]
fn foreign_frame_mid_chain_is_a_protocol_error() {
    let mut reassembler = Reassembler::new(usize::MAX);
    let head = Frame::RequestStream {
        stream_id: 9,
        follows: true,
        initial_request_n: 1,
        payload: Payload::new(Bytes::from_static(b"part")),
    };
    assert!(reassembler.accept(head).expect("buffer head").is_none());

    let err = reassembler
        .accept(Frame::RequestN { stream_id: 9, n: 2 })
        .unwrap_err();
    assert_eq!(err.stream_id, 9);
    assert!(matches!(
        err.kind,
        ProtocolErrorKind::InterruptedFragmentChain {
            frame: "REQUEST_N"
        }
    ));
}

#[test]
fn cancel_mid_chain_aborts_and_passes_through() {
    let mut reassembler = Reassembler::new(usize::MAX);
    let head = Frame::RequestResponse {
        stream_id: 9,
        follows: true,
        payload: Payload::new(Bytes::from_static(b"part")),
    };
    assert!(reassembler.accept(head).expect("buffer head").is_none());

    let routed = reassembler
        .accept(Frame::Cancel { stream_id: 9 })
        .expect("cancel routes");
    assert_eq!(routed, Some(Frame::Cancel { stream_id: 9 }));
    assert_eq!(reassembler.open_chains(), 0);
}

#[test]
fn oversize_chain_is_rejected() {
    let mut reassembler = Reassembler::new(16);
    let head = Frame::RequestResponse {
        stream_id: 2,
        follows: true,
        payload: Payload::new(vec![0u8; 12]),
    };
    assert!(reassembler.accept(head).expect("buffer head").is_none());

    let err = reassembler
        .accept(Frame::Payload {
            stream_id: 2,
            follows: false,
            complete: true,
            next: true,
            payload: Payload::new(vec![0u8; 12]),
        })
        .unwrap_err();
    assert!(matches!(
        err.kind,
        ProtocolErrorKind::ReassemblyOverflow { limit: 16 }
    ));
}

#[test]
fn unrelated_streams_interleave_chains() {
    let mut reassembler = Reassembler::new(usize::MAX);
    let head_a = Frame::RequestResponse {
        stream_id: 1,
        follows: true,
        payload: Payload::new(Bytes::from_static(b"a1")),
    };
    let head_b = Frame::RequestResponse {
        stream_id: 3,
        follows: true,
        payload: Payload::new(Bytes::from_static(b"b1")),
    };
    assert!(reassembler.accept(head_a).expect("head a").is_none());
    assert!(reassembler.accept(head_b).expect("head b").is_none());

    let done_b = reassembler
        .accept(Frame::payload_next(3, Payload::new(Bytes::from_static(b"b2")), true))
        .expect("terminal b")
        .expect("assembled b");
    let Frame::RequestResponse { stream_id: 3, payload, .. } = done_b else {
        panic!("wrong assembly");
    };
    assert_eq!(payload.data().as_ref(), b"b1b2");
    assert_eq!(reassembler.open_chains(), 1);
}
