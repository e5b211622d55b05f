//! Requester-side stream machines.
//!
//! A [`Requester`] is the outgoing half of a connection: it allocates stream
//! ids, registers the stream, sends the request frame, and then plays the
//! requester state machine for the chosen interaction. It implements
//! [`RSocket`] so both halves of a connection expose the same interface.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;

use crate::{
    connection::{ConnectionShared, dispatch::stream_error_frame},
    error::RSocketError,
    frame::Frame,
    payload::Payload,
    responder::{PayloadStream, RSocket, error_stream},
    stream::{
        InteractionKind,
        StreamEvent,
        StreamHandle,
        StreamRole,
        credit::{DemandPolicy, InboundWindow},
        receiver::StreamReceiver,
    },
};

/// The outgoing half of an established connection. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Requester {
    shared: Arc<ConnectionShared>,
}

impl Requester {
    pub(crate) fn new(shared: Arc<ConnectionShared>) -> Self { Self { shared } }

    pub(crate) fn shared(&self) -> &Arc<ConnectionShared> { &self.shared }

    /// Send a request with no response.
    ///
    /// Resolves once the frame is accepted by the egress queue; delivery is
    /// best-effort by design.
    ///
    /// # Errors
    ///
    /// Returns an error when the connection has closed or the lease is
    /// exhausted.
    pub async fn fire_and_forget(&self, payload: Payload) -> Result<(), RSocketError> {
        self.shared.lease.use_one()?;
        let stream_id = self
            .shared
            .allocator
            .allocate_unregistered(&self.shared.registry);
        self.shared
            .send_frame(Frame::RequestFnf {
                stream_id,
                follows: false,
                payload,
            })
            .await
    }

    /// Send a request and await its single response.
    ///
    /// Dropping the returned future cancels the stream on the wire.
    ///
    /// # Errors
    ///
    /// Surfaces the peer's ERROR frame, connection closure, or lease
    /// exhaustion.
    pub async fn request_response(&self, payload: Payload) -> Result<Payload, RSocketError> {
        self.shared.lease.use_one()?;
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let handle = StreamHandle::new(
            InteractionKind::RequestResponse,
            StreamRole::Requester,
            events_tx,
            Arc::new(InboundWindow::unlimited()),
        );
        let stream_id = self.shared.allocator.allocate(&self.shared.registry, handle);
        let mut guard = RequestGuard::new(Arc::clone(&self.shared), stream_id);

        self.shared
            .send_frame(Frame::RequestResponse {
                stream_id,
                follows: false,
                payload,
            })
            .await?;

        loop {
            match events.recv().await {
                None => {
                    guard.disarm();
                    return Err(self.shared.closed_error());
                }
                Some(StreamEvent::Payload { payload, next, .. }) => {
                    guard.disarm();
                    self.shared.registry.remove(stream_id);
                    // A bare COMPLETE resolves the request with no content.
                    return Ok(if next { payload } else { Payload::empty() });
                }
                Some(StreamEvent::Error(err)) => {
                    guard.disarm();
                    return Err(err);
                }
                Some(StreamEvent::Cancel) => {
                    guard.disarm();
                    return Err(RSocketError::Cancelled);
                }
                Some(StreamEvent::RequestN(_)) => {}
            }
        }
    }

    /// Open a responder-to-requester payload stream.
    ///
    /// The stream is lazy only in consumption: the request frame goes out
    /// immediately, and credit is replenished as the caller drains items.
    /// Dropping the stream mid-flight sends CANCEL.
    #[must_use]
    pub fn request_stream(&self, payload: Payload) -> PayloadStream {
        if let Err(err) = self.shared.lease.use_one() {
            return error_stream(err);
        }
        let initial_request_n = self.shared.config.initial_request_n;
        let (events_tx, events) = mpsc::unbounded_channel();
        let window = Arc::new(InboundWindow::new(initial_request_n));
        let handle = StreamHandle::new(
            InteractionKind::RequestStream,
            StreamRole::Requester,
            events_tx.clone(),
            Arc::clone(&window),
        );
        let stream_id = self.shared.allocator.allocate(&self.shared.registry, handle);

        let frame = Frame::RequestStream {
            stream_id,
            follows: false,
            initial_request_n,
            payload,
        };
        // Enqueued synchronously so a cancel-on-drop can never overtake the
        // request frame in the egress queue.
        if !self.shared.enqueue_frame(frame) {
            self.shared.registry.remove(stream_id);
            let _ = events_tx.send(StreamEvent::Error(self.shared.closed_error()));
        }

        StreamReceiver::subscriber(
            Arc::clone(&self.shared),
            stream_id,
            events,
            DemandPolicy::new(initial_request_n),
            window,
        )
        .boxed()
    }

    /// Open a bidirectional payload channel.
    ///
    /// The first payload pulled from `payloads` opens the channel; an empty
    /// source opens nothing and the returned stream completes empty.
    /// Subsequent payloads are gated by the responder's REQUEST_N credit.
    #[must_use]
    pub fn request_channel(&self, payloads: PayloadStream) -> PayloadStream {
        if let Err(err) = self.shared.lease.use_one() {
            return error_stream(err);
        }
        let initial_request_n = self.shared.config.initial_request_n;
        let (events_tx, events) = mpsc::unbounded_channel();
        let window = Arc::new(InboundWindow::new(initial_request_n));
        let handle = StreamHandle::new(
            InteractionKind::RequestChannel,
            StreamRole::Requester,
            events_tx,
            Arc::clone(&window),
        );
        let stream_id = self.shared.allocator.allocate(&self.shared.registry, handle);

        let (in_tx, in_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_channel_requester(
            Arc::clone(&self.shared),
            stream_id,
            initial_request_n,
            payloads,
            events,
            in_tx,
        ));

        StreamReceiver::forwarded(
            Arc::clone(&self.shared),
            stream_id,
            in_rx,
            DemandPolicy::new(initial_request_n),
            window,
        )
        .boxed()
    }

    /// Push connection-level metadata to the peer.
    ///
    /// # Errors
    ///
    /// Returns an error when the connection has closed.
    pub async fn metadata_push(&self, metadata: Bytes) -> Result<(), RSocketError> {
        self.shared.send_frame(Frame::MetadataPush { metadata }).await
    }
}

#[async_trait]
impl RSocket for Requester {
    async fn metadata_push(&self, metadata: Bytes) -> Result<(), RSocketError> {
        Requester::metadata_push(self, metadata).await
    }

    async fn fire_and_forget(&self, payload: Payload) -> Result<(), RSocketError> {
        Requester::fire_and_forget(self, payload).await
    }

    async fn request_response(&self, payload: Payload) -> Result<Payload, RSocketError> {
        Requester::request_response(self, payload).await
    }

    fn request_stream(&self, payload: Payload) -> PayloadStream {
        Requester::request_stream(self, payload)
    }

    fn request_channel(&self, payloads: PayloadStream) -> PayloadStream {
        Requester::request_channel(self, payloads)
    }
}

/// Cancels and deregisters a pending request unless disarmed first.
struct RequestGuard {
    shared: Arc<ConnectionShared>,
    stream_id: u32,
    armed: bool,
}

impl RequestGuard {
    fn new(shared: Arc<ConnectionShared>, stream_id: u32) -> Self {
        Self {
            shared,
            stream_id,
            armed: true,
        }
    }

    fn disarm(&mut self) { self.armed = false; }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        if self.armed {
            self.shared.registry.remove(self.stream_id);
            let _ = self.shared.enqueue_frame(Frame::Cancel {
                stream_id: self.stream_id,
            });
        }
    }
}

/// Requester machine for request/channel: sends the head, then pumps both
/// directions with independent credit and half-close.
async fn run_channel_requester(
    shared: Arc<ConnectionShared>,
    stream_id: u32,
    initial_request_n: u32,
    mut source: PayloadStream,
    mut events: mpsc::UnboundedReceiver<StreamEvent>,
    in_tx: mpsc::UnboundedSender<StreamEvent>,
) {
    let first = tokio::select! {
        biased;
        () = shared.shutdown.cancelled() => {
            shared.registry.remove(stream_id);
            return;
        }
        item = source.next() => item,
    };
    let head = match first {
        None => {
            // Nothing to send: the channel never opens and the consumer
            // observes a clean empty stream.
            shared.registry.remove(stream_id);
            return;
        }
        Some(Err(err)) => {
            shared.registry.remove(stream_id);
            let _ = in_tx.send(StreamEvent::Error(err));
            return;
        }
        Some(Ok(payload)) => Frame::RequestChannel {
            stream_id,
            follows: false,
            complete: false,
            initial_request_n,
            payload,
        },
    };
    if shared.send_frame(head).await.is_err() {
        shared.registry.remove(stream_id);
        let _ = in_tx.send(StreamEvent::Error(shared.closed_error()));
        return;
    }

    // Outbound credit starts at zero; the responder grants it via REQUEST_N.
    // A produced payload may wait in the pending slot for credit, but
    // completion and errors flow without it.
    let mut credit: u64 = 0;
    let mut pending: Option<Payload> = None;
    let mut inbound_done = false;
    let mut outbound_done = false;

    while !(inbound_done && outbound_done) {
        if credit > 0 && pending.is_some() {
            let payload = pending.take().expect("pending checked above");
            credit -= 1;
            if shared
                .send_frame(Frame::payload_next(stream_id, payload, false))
                .await
                .is_err()
            {
                break;
            }
            continue;
        }
        tokio::select! {
            biased;
            event = events.recv() => match event {
                Some(StreamEvent::RequestN(n)) => credit = credit.saturating_add(u64::from(n)),
                Some(StreamEvent::Payload { payload, next, complete }) => {
                    if complete {
                        inbound_done = true;
                    }
                    let _ = in_tx.send(StreamEvent::Payload { payload, next, complete });
                }
                Some(StreamEvent::Cancel) => {
                    // The responder asked us to stop sending.
                    outbound_done = true;
                    pending = None;
                }
                Some(StreamEvent::Error(err)) => {
                    let _ = in_tx.send(StreamEvent::Error(err));
                    break;
                }
                None => {
                    let _ = in_tx.send(StreamEvent::Error(shared.closed_error()));
                    break;
                }
            },
            item = source.next(), if !outbound_done && pending.is_none() => match item {
                Some(Ok(payload)) => pending = Some(payload),
                Some(Err(err)) => {
                    // A local failure terminates both directions.
                    let _ = shared.send_frame(stream_error_frame(stream_id, &err)).await;
                    let _ = in_tx.send(StreamEvent::Error(err));
                    break;
                }
                None => {
                    outbound_done = true;
                    if shared
                        .send_frame(Frame::payload_complete(stream_id))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            },
        }
    }
    shared.registry.remove(stream_id);
}
