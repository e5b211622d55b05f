//! Ingress frame dispatch and responder-side stream machines.
//!
//! The dispatcher splits stream frames two ways: request frames create new
//! responder streams, everything else routes to the live stream the frame
//! names, or to the ignored-frame consumer when no such stream exists.
//!
//! Each accepted request spawns a task that owns that stream's state machine.
//! Handler panics are caught at the task boundary and reflected to the peer
//! as an APPLICATION_ERROR, per the propagation policy.

use std::{any::Any, sync::Arc};

use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;

use super::{ConnectionShared, IgnoredFrameConsumer};
use crate::{
    error::{ErrorCode, ProtocolError, ProtocolErrorKind, RSocketError},
    frame::Frame,
    payload::Payload,
    responder::{PayloadStream, RSocket},
    stream::{
        InteractionKind,
        StreamEvent,
        StreamHandle,
        StreamRole,
        credit::{DemandPolicy, InboundWindow},
        receiver::StreamReceiver,
    },
};

/// Map a stream-scoped failure onto the ERROR frame owed to the peer.
pub(crate) fn stream_error_frame(stream_id: u32, err: &RSocketError) -> Frame {
    let code = match err {
        RSocketError::Stream { code, .. } if code.permitted_on_stream() => *code,
        RSocketError::Cancelled => ErrorCode::CANCELED,
        _ => ErrorCode::APPLICATION_ERROR,
    };
    let message = match err {
        RSocketError::Stream { message, .. } => message.clone(),
        other => other.to_string(),
    };
    Frame::error(stream_id, code, message)
}

/// Render a panic payload as an error diagnostic.
fn panic_message(panic: Box<dyn Any + Send>) -> String {
    match panic.downcast::<String>() {
        Ok(text) => *text,
        Err(panic) => panic
            .downcast::<&'static str>()
            .map_or_else(|_| "handler panicked".to_owned(), |text| (*text).to_owned()),
    }
}

/// Wait until the peer or the connection tears the stream down.
async fn wait_teardown(events: &mut mpsc::UnboundedReceiver<StreamEvent>) {
    loop {
        match events.recv().await {
            Some(StreamEvent::Cancel | StreamEvent::Error(_)) | None => return,
            // Credit and stray payloads carry no meaning for this waiter.
            Some(_) => {}
        }
    }
}

/// Routes ingress frames to stream machines and spawns responder tasks.
pub(crate) struct Dispatcher {
    shared: Arc<ConnectionShared>,
    responder: Arc<dyn RSocket>,
    ignored: IgnoredFrameConsumer,
}

impl Dispatcher {
    pub(crate) fn new(
        shared: Arc<ConnectionShared>,
        responder: Arc<dyn RSocket>,
        ignored: IgnoredFrameConsumer,
    ) -> Self {
        Self {
            shared,
            responder,
            ignored,
        }
    }

    /// Dispatch one stream frame (stream id > 0, fragments already joined).
    pub(crate) fn dispatch(&self, frame: Frame) -> Result<(), ProtocolError> {
        match frame {
            Frame::RequestResponse { .. }
            | Frame::RequestFnf { .. }
            | Frame::RequestStream { .. }
            | Frame::RequestChannel { .. } => self.accept_request(frame),
            Frame::Payload { .. }
            | Frame::RequestN { .. }
            | Frame::Cancel { .. }
            | Frame::Error { .. } => self.route(frame),
            other => {
                (self.ignored)(&other);
                Ok(())
            }
        }
    }

    /// Push connection-level metadata to the responder off the driver task.
    pub(crate) fn accept_metadata_push(&self, metadata: Bytes) {
        let responder = Arc::clone(&self.responder);
        tokio::spawn(async move {
            if let Err(err) = responder.metadata_push(metadata).await {
                log::debug!("metadata push handler failed: {err}");
            }
        });
    }

    fn accept_request(&self, frame: Frame) -> Result<(), ProtocolError> {
        let stream_id = frame.stream_id();
        if self.shared.registry.contains(stream_id) {
            // At most one stream per id: a duplicate request is discarded,
            // not escalated, so a confused peer cannot kill the live stream.
            log::debug!("duplicate request frame for live stream {stream_id}");
            (self.ignored)(&frame);
            return Ok(());
        }
        match frame {
            Frame::RequestFnf { payload, .. } => {
                self.accept_fire_and_forget(payload);
                Ok(())
            }
            Frame::RequestResponse { payload, .. } => {
                self.accept_request_response(stream_id, payload);
                Ok(())
            }
            Frame::RequestStream {
                initial_request_n,
                payload,
                ..
            } => {
                self.accept_request_stream(stream_id, initial_request_n, payload);
                Ok(())
            }
            Frame::RequestChannel {
                complete,
                initial_request_n,
                payload,
                ..
            } => {
                self.accept_request_channel(stream_id, initial_request_n, complete, payload);
                Ok(())
            }
            _ => unreachable!("accept_request only receives request frames"),
        }
    }

    /// Route a mid-stream frame to the live stream it names.
    fn route(&self, frame: Frame) -> Result<(), ProtocolError> {
        let stream_id = frame.stream_id();
        let Some(handle) = self.shared.registry.get(stream_id) else {
            (self.ignored)(&frame);
            return Ok(());
        };
        match frame {
            Frame::Payload {
                complete,
                next,
                payload,
                ..
            } => {
                if next && !handle.window().try_charge() {
                    return Err(ProtocolError::stream(
                        stream_id,
                        ProtocolErrorKind::CreditViolation,
                    ));
                }
                // Request/response treats any payload as terminal; channels
                // stay registered until both directions finish.
                let terminal = (complete
                    || handle.kind() == InteractionKind::RequestResponse)
                    && handle.kind() != InteractionKind::RequestChannel;
                let _ = handle.send(StreamEvent::Payload {
                    payload,
                    next,
                    complete,
                });
                if terminal {
                    self.shared.registry.remove(stream_id);
                }
                Ok(())
            }
            Frame::RequestN { n, .. } => {
                let _ = handle.send(StreamEvent::RequestN(n));
                Ok(())
            }
            Frame::Cancel { .. } => {
                let _ = handle.send(StreamEvent::Cancel);
                self.shared.registry.remove(stream_id);
                Ok(())
            }
            Frame::Error { code, data, .. } => {
                let _ = handle.send(StreamEvent::Error(RSocketError::Stream {
                    code,
                    message: String::from_utf8_lossy(&data).into_owned(),
                }));
                self.shared.registry.remove(stream_id);
                Ok(())
            }
            _ => unreachable!("route only receives mid-stream frames"),
        }
    }

    fn accept_fire_and_forget(&self, payload: Payload) {
        let responder = Arc::clone(&self.responder);
        tokio::spawn(async move {
            if let Err(err) = responder.fire_and_forget(payload).await {
                // Fire-and-forget owes the peer nothing, including errors.
                log::debug!("fire-and-forget handler failed: {err}");
            }
        });
    }

    fn accept_request_response(&self, stream_id: u32, payload: Payload) {
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let handle = StreamHandle::new(
            InteractionKind::RequestResponse,
            StreamRole::Responder,
            events_tx,
            Arc::new(InboundWindow::unlimited()),
        );
        if !self.shared.registry.insert(stream_id, handle) {
            return;
        }
        let shared = Arc::clone(&self.shared);
        let responder = Arc::clone(&self.responder);
        tokio::spawn(async move {
            let mut work = tokio::spawn({
                let responder = Arc::clone(&responder);
                async move { responder.request_response(payload).await }
            });
            tokio::select! {
                biased;
                () = wait_teardown(&mut events) => {
                    // Cancelled before the response went out: no frame owed.
                    work.abort();
                    shared.registry.remove(stream_id);
                }
                outcome = &mut work => {
                    shared.registry.remove(stream_id);
                    let frame = match outcome {
                        Ok(Ok(response)) => Frame::payload_next(stream_id, response, true),
                        Ok(Err(err)) => stream_error_frame(stream_id, &err),
                        Err(join_err) if join_err.is_panic() => Frame::error(
                            stream_id,
                            ErrorCode::APPLICATION_ERROR,
                            panic_message(join_err.into_panic()),
                        ),
                        Err(_) => Frame::error(
                            stream_id,
                            ErrorCode::CANCELED,
                            "handler task aborted",
                        ),
                    };
                    let _ = shared.send_frame(frame).await;
                }
            }
        });
    }

    fn accept_request_stream(&self, stream_id: u32, initial_request_n: u32, payload: Payload) {
        let (events_tx, events) = mpsc::unbounded_channel();
        let handle = StreamHandle::new(
            InteractionKind::RequestStream,
            StreamRole::Responder,
            events_tx,
            Arc::new(InboundWindow::unlimited()),
        );
        if !self.shared.registry.insert(stream_id, handle) {
            return;
        }
        let shared = Arc::clone(&self.shared);
        let responder = Arc::clone(&self.responder);
        self.spawn_supervised(stream_id, async move {
            run_stream_responder(shared, stream_id, initial_request_n, responder, payload, events)
                .await;
        });
    }

    fn accept_request_channel(
        &self,
        stream_id: u32,
        initial_request_n: u32,
        head_complete: bool,
        payload: Payload,
    ) {
        let (events_tx, events) = mpsc::unbounded_channel();
        let window = Arc::new(InboundWindow::new(0));
        let handle = StreamHandle::new(
            InteractionKind::RequestChannel,
            StreamRole::Responder,
            events_tx,
            Arc::clone(&window),
        );
        if !self.shared.registry.insert(stream_id, handle) {
            return;
        }

        // The head payload is the first inbound element.
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let _ = in_tx.send(StreamEvent::Payload {
            payload,
            next: true,
            complete: head_complete,
        });

        let grant = self.shared.config.initial_request_n;
        if !head_complete {
            // Invite the requester to start sending.
            window.grant(grant);
            let _ = self.shared.enqueue_frame(Frame::RequestN {
                stream_id,
                n: grant,
            });
        }
        let inbound = StreamReceiver::forwarded(
            Arc::clone(&self.shared),
            stream_id,
            in_rx,
            DemandPolicy::new(grant),
            Arc::clone(&window),
        )
        .boxed();

        let shared = Arc::clone(&self.shared);
        let responder = Arc::clone(&self.responder);
        self.spawn_supervised(stream_id, async move {
            run_channel_responder(
                shared,
                stream_id,
                initial_request_n,
                head_complete,
                responder,
                inbound,
                events,
                in_tx,
            )
            .await;
        });
    }

    /// Spawn a stream machine, converting a panic anywhere inside it into a
    /// stream-scoped APPLICATION_ERROR.
    fn spawn_supervised(
        &self,
        stream_id: u32,
        machine: impl Future<Output = ()> + Send + 'static,
    ) {
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            let task = tokio::spawn(machine);
            if let Err(join_err) = task.await
                && join_err.is_panic()
            {
                let message = panic_message(join_err.into_panic());
                log::warn!("stream {stream_id} handler panicked: {message}");
                shared.registry.remove(stream_id);
                let _ = shared
                    .send_frame(Frame::error(
                        stream_id,
                        ErrorCode::APPLICATION_ERROR,
                        message,
                    ))
                    .await;
            }
        });
    }
}

/// Responder machine for request/stream: emit payloads while credit lasts.
///
/// One produced payload may sit in a pending slot waiting for credit;
/// completion and errors need no credit and flow immediately.
async fn run_stream_responder(
    shared: Arc<ConnectionShared>,
    stream_id: u32,
    initial_request_n: u32,
    responder: Arc<dyn RSocket>,
    payload: Payload,
    mut events: mpsc::UnboundedReceiver<StreamEvent>,
) {
    let mut source = responder.request_stream(payload);
    let mut credit = u64::from(initial_request_n);
    let mut pending: Option<Payload> = None;
    loop {
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
                Some(StreamEvent::Cancel | StreamEvent::Error(_)) | None => break,
                Some(StreamEvent::Payload { .. }) => {}
            },
            item = source.next(), if pending.is_none() => match item {
                Some(Ok(payload)) => pending = Some(payload),
                Some(Err(err)) => {
                    let _ = shared.send_frame(stream_error_frame(stream_id, &err)).await;
                    break;
                }
                None => {
                    let _ = shared.send_frame(Frame::payload_complete(stream_id)).await;
                    break;
                }
            },
        }
    }
    shared.registry.remove(stream_id);
}

/// Responder machine for request/channel: two credited directions with
/// independent half-close.
#[allow(clippy::too_many_arguments)]
async fn run_channel_responder(
    shared: Arc<ConnectionShared>,
    stream_id: u32,
    initial_request_n: u32,
    head_complete: bool,
    responder: Arc<dyn RSocket>,
    inbound: PayloadStream,
    mut events: mpsc::UnboundedReceiver<StreamEvent>,
    in_tx: mpsc::UnboundedSender<StreamEvent>,
) {
    let mut source = responder.request_channel(inbound);
    let mut credit = u64::from(initial_request_n);
    let mut pending: Option<Payload> = None;
    let mut inbound_done = head_complete;
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
                    // Requester cancellation tears down both directions.
                    let _ = in_tx.send(StreamEvent::Cancel);
                    break;
                }
                Some(StreamEvent::Error(err)) => {
                    // Error beats any completion still in flight.
                    let _ = in_tx.send(StreamEvent::Error(err));
                    break;
                }
                None => break,
            },
            item = source.next(), if !outbound_done && pending.is_none() => match item {
                Some(Ok(payload)) => pending = Some(payload),
                Some(Err(err)) => {
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
