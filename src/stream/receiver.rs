//! Consumer-side payload stream with demand signalling.
//!
//! [`StreamReceiver`] adapts a stream mailbox into a `futures::Stream` of
//! payloads. As the consumer pulls items it drives the inbound credit loop:
//! each delivery feeds the demand policy, and when the policy asks for a
//! top-up the receiver grants the shared window and queues a REQUEST_N for
//! the peer. Dropping an active requester-side receiver cancels the stream.

use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll, ready},
};

use futures::Stream;
use tokio::sync::mpsc;

use super::{
    StreamEvent,
    credit::{DemandPolicy, InboundWindow},
};
use crate::{
    connection::ConnectionShared,
    error::RSocketError,
    frame::Frame,
    payload::Payload,
};

/// Payload stream handed to consumers of request/stream and request/channel.
#[derive(Debug)]
pub(crate) struct StreamReceiver {
    stream_id: u32,
    shared: Arc<ConnectionShared>,
    events: mpsc::UnboundedReceiver<StreamEvent>,
    demand: DemandPolicy,
    window: Arc<InboundWindow>,
    cancel_on_drop: bool,
    deregister: bool,
    terminated: bool,
}

impl StreamReceiver {
    /// Receiver for a requester-created stream: it owns the registry entry
    /// and cancels the stream when dropped mid-flight.
    pub(crate) fn subscriber(
        shared: Arc<ConnectionShared>,
        stream_id: u32,
        events: mpsc::UnboundedReceiver<StreamEvent>,
        demand: DemandPolicy,
        window: Arc<InboundWindow>,
    ) -> Self {
        Self {
            stream_id,
            shared,
            events,
            demand,
            window,
            cancel_on_drop: true,
            deregister: true,
            terminated: false,
        }
    }

    /// Receiver fed by a channel machine that owns the registry entry
    /// itself. Dropping it stops granting credit but sends nothing.
    pub(crate) fn forwarded(
        shared: Arc<ConnectionShared>,
        stream_id: u32,
        events: mpsc::UnboundedReceiver<StreamEvent>,
        demand: DemandPolicy,
        window: Arc<InboundWindow>,
    ) -> Self {
        Self {
            stream_id,
            shared,
            events,
            demand,
            window,
            cancel_on_drop: false,
            deregister: false,
            terminated: false,
        }
    }

    /// Box the receiver into the public payload-stream shape.
    pub(crate) fn boxed(self) -> crate::responder::PayloadStream { Box::pin(self) }

    fn finish(&mut self) {
        self.terminated = true;
        if self.deregister {
            self.shared.registry.remove(self.stream_id);
        }
    }

    /// Account one delivered payload and top up peer credit when due.
    fn note_delivered(&mut self) {
        if let Some(n) = self.demand.on_delivered() {
            self.window.grant(n);
            let _ = self.shared.enqueue_frame(Frame::RequestN {
                stream_id: self.stream_id,
                n,
            });
        }
    }
}

impl Stream for StreamReceiver {
    type Item = Result<Payload, RSocketError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.terminated {
            return Poll::Ready(None);
        }
        loop {
            match ready!(this.events.poll_recv(cx)) {
                None => {
                    this.finish();
                    return Poll::Ready(None);
                }
                Some(StreamEvent::Payload {
                    payload,
                    next,
                    complete,
                }) => {
                    if complete {
                        this.finish();
                    }
                    if next {
                        if !complete {
                            this.note_delivered();
                        }
                        return Poll::Ready(Some(Ok(payload)));
                    }
                    if complete {
                        return Poll::Ready(None);
                    }
                    // A payload event with neither flag never reaches here;
                    // the codec rejects such frames.
                }
                Some(StreamEvent::Error(err)) => {
                    this.finish();
                    return Poll::Ready(Some(Err(err)));
                }
                Some(StreamEvent::Cancel) => {
                    this.finish();
                    return Poll::Ready(None);
                }
                Some(StreamEvent::RequestN(_)) => {}
            }
        }
    }
}

impl Drop for StreamReceiver {
    fn drop(&mut self) {
        if self.terminated {
            return;
        }
        if self.deregister {
            self.shared.registry.remove(self.stream_id);
        }
        if self.cancel_on_drop {
            let _ = self.shared.enqueue_frame(Frame::Cancel {
                stream_id: self.stream_id,
            });
        }
    }
}
