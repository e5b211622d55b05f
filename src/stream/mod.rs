//! Per-stream state shared between the dispatcher and stream tasks.
//!
//! Every live stream is represented by a [`StreamHandle`] in the registry: a
//! mailbox for delivering [`StreamEvent`]s plus the inbound credit window the
//! dispatcher charges payloads against. The per-stream finite state machines
//! themselves run as tasks owning the receiving half of the mailbox, which
//! keeps each machine a single-writer entity.

pub mod allocator;
pub mod credit;
pub mod receiver;
pub mod registry;


use std::sync::Arc;

use tokio::sync::mpsc;

use self::credit::InboundWindow;
use crate::{error::RSocketError, payload::Payload};

/// The four interaction models a stream can follow.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InteractionKind {
    /// One request, one response.
    RequestResponse,
    /// One request, no response.
    FireAndForget,
    /// One request, a credited stream of responses.
    RequestStream,
    /// Two credited payload streams, one per direction.
    RequestChannel,
}

/// Which side of a stream this endpoint plays.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamRole {
    /// This endpoint initiated the stream.
    Requester,
    /// This endpoint fulfils the stream.
    Responder,
}

/// Inputs delivered to a stream's state machine.
///
/// Fragmented frames are joined before dispatch, so payload events always
/// carry whole logical payloads.
#[derive(Debug)]
pub(crate) enum StreamEvent {
    /// A PAYLOAD frame for this stream.
    Payload {
        /// Payload content.
        payload: Payload,
        /// The frame carried data.
        next: bool,
        /// The peer's sending direction is complete.
        complete: bool,
    },
    /// Additional outbound credit granted by the peer.
    RequestN(u32),
    /// The peer cancelled the stream.
    Cancel,
    /// The stream terminated with an error.
    Error(RSocketError),
}

/// Registry entry describing one live stream.
#[derive(Clone, Debug)]
pub(crate) struct StreamHandle {
    kind: InteractionKind,
    role: StreamRole,
    events: mpsc::UnboundedSender<StreamEvent>,
    window: Arc<InboundWindow>,
}

impl StreamHandle {
    pub(crate) fn new(
        kind: InteractionKind,
        role: StreamRole,
        events: mpsc::UnboundedSender<StreamEvent>,
        window: Arc<InboundWindow>,
    ) -> Self {
        Self {
            kind,
            role,
            events,
            window,
        }
    }

    pub(crate) fn kind(&self) -> InteractionKind { self.kind }

    pub(crate) fn role(&self) -> StreamRole { self.role }

    /// Inbound credit window charged by the dispatcher.
    pub(crate) fn window(&self) -> &InboundWindow { &self.window }

    /// Deliver an event to the stream task. Returns `false` when the task
    /// has already gone away; callers treat that as a discarded frame.
    pub(crate) fn send(&self, event: StreamEvent) -> bool { self.events.send(event).is_ok() }
}
