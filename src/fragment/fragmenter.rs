//! Outbound helper that splits oversize frames into MTU-sized fragments.
//!
//! Only frames that carry an application payload fragment: the REQUEST family
//! and PAYLOAD. Connection-level frames are never split; SETUP payloads are
//! bounded by configuration instead.
//!
//! Within a chain, metadata is drained before data. Each fragment that
//! carries part of the metadata pays the three-byte length prefix, so the
//! per-fragment budget accounts for it. Terminal flags (NEXT, COMPLETE) are
//! carried only by the final fragment.

use std::num::NonZeroUsize;

use crate::{
    frame::{Frame, HEADER_LEN},
    payload::Payload,
};

/// Smallest permitted fragmentation MTU.
///
/// Large enough that every head frame can carry its fixed fields plus a
/// non-empty slice of metadata or data, which keeps the splitting loop
/// guaranteed to make progress.
pub const MIN_FRAGMENT_MTU: usize = 64;

/// Fixed body bytes of a request head before payload content.
const REQUEST_N_LEN: usize = 4;

/// Per-fragment cost of carrying a metadata slice.
const METADATA_PREFIX_LEN: usize = 3;

/// Splits outbound frames so no encoded frame exceeds the MTU.
#[derive(Clone, Copy, Debug)]
pub struct Fragmenter {
    mtu: NonZeroUsize,
}

/// Shape of the head frame a chain starts with.
#[derive(Clone, Copy, Debug)]
enum HeadKind {
    RequestResponse,
    RequestFnf,
    RequestStream { initial_request_n: u32 },
    RequestChannel { initial_request_n: u32 },
    Payload,
}

impl HeadKind {
    /// Encoded bytes of the head frame before any payload content.
    const fn fixed_len(self) -> usize {
        match self {
            Self::RequestResponse | Self::RequestFnf | Self::Payload => HEADER_LEN,
            Self::RequestStream { .. } | Self::RequestChannel { .. } => {
                HEADER_LEN + REQUEST_N_LEN
            }
        }
    }

    fn build(self, stream_id: u32, follows: bool, payload: Payload, terminal: Terminal) -> Frame {
        match self {
            Self::RequestResponse => Frame::RequestResponse {
                stream_id,
                follows,
                payload,
            },
            Self::RequestFnf => Frame::RequestFnf {
                stream_id,
                follows,
                payload,
            },
            Self::RequestStream { initial_request_n } => Frame::RequestStream {
                stream_id,
                follows,
                initial_request_n,
                payload,
            },
            Self::RequestChannel { initial_request_n } => Frame::RequestChannel {
                stream_id,
                follows,
                complete: !follows && terminal.complete,
                initial_request_n,
                payload,
            },
            Self::Payload => Frame::Payload {
                stream_id,
                follows,
                complete: !follows && terminal.complete,
                next: !follows && terminal.next,
                payload,
            },
        }
    }
}

/// Flags owed to the final fragment of a chain.
#[derive(Clone, Copy, Debug)]
struct Terminal {
    next: bool,
    complete: bool,
}

impl Fragmenter {
    /// Create a fragmenter capping encoded frames at `mtu` bytes.
    ///
    /// Returns `None` when `mtu` is below [`MIN_FRAGMENT_MTU`].
    #[must_use]
    pub fn new(mtu: usize) -> Option<Self> {
        if mtu < MIN_FRAGMENT_MTU {
            return None;
        }
        NonZeroUsize::new(mtu).map(|mtu| Self { mtu })
    }

    /// The configured MTU in bytes.
    #[must_use]
    pub const fn mtu(&self) -> usize { self.mtu.get() }

    /// Split `frame` into a chain of frames each at most `mtu` bytes when
    /// encoded. Frames that already fit, and kinds that never fragment, are
    /// returned unchanged as a single-element chain.
    #[must_use]
    pub fn fragment(&self, frame: Frame) -> Vec<Frame> {
        if frame.encoded_len() <= self.mtu.get() {
            return vec![frame];
        }
        match frame {
            Frame::RequestResponse {
                stream_id, payload, ..
            } => self.split(stream_id, payload, HeadKind::RequestResponse, Terminal {
                next: true,
                complete: true,
            }),
            Frame::RequestFnf {
                stream_id, payload, ..
            } => self.split(stream_id, payload, HeadKind::RequestFnf, Terminal {
                next: true,
                complete: false,
            }),
            Frame::RequestStream {
                stream_id,
                initial_request_n,
                payload,
                ..
            } => self.split(
                stream_id,
                payload,
                HeadKind::RequestStream { initial_request_n },
                Terminal {
                    next: true,
                    complete: false,
                },
            ),
            Frame::RequestChannel {
                stream_id,
                complete,
                initial_request_n,
                payload,
                ..
            } => self.split(
                stream_id,
                payload,
                HeadKind::RequestChannel { initial_request_n },
                Terminal {
                    next: true,
                    complete,
                },
            ),
            Frame::Payload {
                stream_id,
                complete,
                next,
                payload,
                ..
            } => self.split(stream_id, payload, HeadKind::Payload, Terminal { next, complete }),
            other => vec![other],
        }
    }

    fn split(
        &self,
        stream_id: u32,
        payload: Payload,
        head: HeadKind,
        terminal: Terminal,
    ) -> Vec<Frame> {
        let mtu = self.mtu.get();
        let (metadata, mut data) = payload.into_parts();
        let mut metadata_pending = metadata.is_some();
        let mut metadata = metadata.unwrap_or_default();

        let mut frames = Vec::new();
        let mut first = true;
        loop {
            let overhead = if first { head.fixed_len() } else { HEADER_LEN };
            let mut budget = mtu - overhead;

            let chunk_metadata = if metadata_pending {
                let take = metadata.len().min(budget - METADATA_PREFIX_LEN);
                budget -= METADATA_PREFIX_LEN + take;
                let chunk = metadata.split_to(take);
                metadata_pending = !metadata.is_empty();
                Some(chunk)
            } else {
                None
            };
            let chunk_data = data.split_to(data.len().min(budget));
            let last = !metadata_pending && data.is_empty();
            let chunk = Payload::from_parts(chunk_metadata, chunk_data);

            let frame = if first {
                head.build(stream_id, !last, chunk, terminal)
            } else {
                HeadKind::Payload.build(stream_id, !last, chunk, terminal)
            };
            frames.push(frame);

            if last {
                break;
            }
            first = false;
        }
        frames
    }
}
