//! Connection state machine and frame-driving actor.
//!
//! One task per connection owns the transport and drives everything with a
//! biased `select!` loop: shutdown first, then egress frames, then inbound
//! packets, then keep-alive timers. Egress serialises through this single
//! writer, which preserves per-stream frame order at the byte level.
//!
//! Stream tasks never hold the connection itself; they hold an
//! [`ConnectionShared`] containing the egress mailbox, the registry, and the
//! id allocator, which breaks the reference cycle between streams and the
//! connection.

pub mod dispatch;
pub mod keepalive;
pub mod setup;

use std::sync::Arc;

use bytes::Bytes;
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{self, Instant},
};
use tokio_util::sync::CancellationToken;

use self::{dispatch::Dispatcher, keepalive::KeepAliveScheduler};
use crate::{
    config::EngineConfig,
    error::{ErrorCode, ProtocolError, ProtocolErrorKind, RSocketError, TransportError},
    fragment::{Fragmenter, Reassembler},
    frame::{Frame, frame_type},
    lease::LeaseGate,
    requester::Requester,
    resume::ResumeStore,
    stream::{StreamEvent, allocator::StreamIdAllocator, registry::StreamRegistry},
    transport::FrameTransport,
};

/// Consumer invoked with every frame the engine legally ignored.
///
/// Covers frames for unknown stream ids and ignorable extension or unknown
/// frame types. Implementations must not block and must not panic.
pub type IgnoredFrameConsumer = Arc<dyn Fn(&Frame) + Send + Sync>;

/// Default ignored-frame consumer: a trace log line, nothing else.
#[must_use]
pub fn default_ignored_frames() -> IgnoredFrameConsumer {
    Arc::new(|frame| {
        log::trace!(
            "ignoring {} frame for stream {}",
            frame.type_name(),
            frame.stream_id()
        );
    })
}

/// Which end of the connection this engine instance is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionRole {
    /// Initiated the connection and sent SETUP; allocates odd stream ids.
    Client,
    /// Accepted the connection; allocates even stream ids.
    Server,
}

/// Lifecycle phase of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// Transport open, SETUP not yet exchanged.
    Connecting,
    /// Server side waiting for the SETUP frame.
    AwaitingSetup,
    /// SETUP accepted; streams may flow.
    Established,
    /// Terminal sequence running: streams cancelled, egress drained or
    /// dropped.
    Closing,
    /// Fully closed.
    Closed,
}

/// State shared between the driver, the requester API, and stream tasks.
#[derive(Debug)]
pub(crate) struct ConnectionShared {
    pub(crate) egress: mpsc::Sender<Frame>,
    pub(crate) registry: StreamRegistry,
    pub(crate) allocator: StreamIdAllocator,
    pub(crate) shutdown: CancellationToken,
    pub(crate) lease: LeaseGate,
    pub(crate) config: EngineConfig,
    pub(crate) role: ConnectionRole,
    /// Code and diagnostic the connection closed with, once it has.
    last_error: std::sync::Mutex<Option<(ErrorCode, String)>>,
}

impl ConnectionShared {
    pub(crate) fn new(role: ConnectionRole, config: EngineConfig) -> (Arc<Self>, mpsc::Receiver<Frame>) {
        let (egress, egress_rx) = mpsc::channel(config.egress_queue_depth);
        let allocator = match role {
            ConnectionRole::Client => StreamIdAllocator::client(),
            ConnectionRole::Server => StreamIdAllocator::server(),
        };
        let lease = LeaseGate::new(config.lease_enabled);
        let shared = Arc::new(Self {
            egress,
            registry: StreamRegistry::new(),
            allocator,
            shutdown: CancellationToken::new(),
            lease,
            config,
            role,
            last_error: std::sync::Mutex::new(None),
        });
        (shared, egress_rx)
    }

    /// Queue a frame for the single egress writer, awaiting queue space.
    pub(crate) async fn send_frame(&self, frame: Frame) -> Result<(), RSocketError> {
        self.egress
            .send(frame)
            .await
            .map_err(|_| self.closed_error())
    }

    /// Record the terminal code once; later closes do not overwrite it.
    pub(crate) fn record_close(&self, code: ErrorCode, message: &str) {
        let mut last_error = self.last_error.lock().expect("close reason mutex");
        if last_error.is_none() {
            *last_error = Some((code, message.to_owned()));
        }
    }

    /// The error APIs surface once the connection has stopped.
    pub(crate) fn closed_error(&self) -> RSocketError {
        let (code, message) = self
            .last_error
            .lock()
            .expect("close reason mutex")
            .clone()
            .unwrap_or((ErrorCode::CONNECTION_CLOSE, "connection closed".to_owned()));
        RSocketError::ConnectionClosed { code, message }
    }

    /// Queue a frame without awaiting; falls back to a detached send when
    /// the egress queue is momentarily full. Used from synchronous contexts
    /// (stream polls, drop handlers). Returns `false` once the connection
    /// driver has stopped accepting frames.
    pub(crate) fn enqueue_frame(&self, frame: Frame) -> bool {
        match self.egress.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(frame)) => {
                let egress = self.egress.clone();
                tokio::spawn(async move {
                    let _ = egress.send(frame).await;
                });
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// Handle to an established connection.
///
/// Dropping the handle detaches the connection; it keeps running until the
/// transport closes or [`Connection::close`] is called on a retained handle.
#[derive(Debug)]
pub struct Connection {
    requester: Requester,
    shutdown: CancellationToken,
    driver: JoinHandle<()>,
}

impl Connection {
    pub(crate) fn new(
        requester: Requester,
        shutdown: CancellationToken,
        driver: JoinHandle<()>,
    ) -> Self {
        Self {
            requester,
            shutdown,
            driver,
        }
    }

    /// The outgoing half of the connection.
    #[must_use]
    pub fn requester(&self) -> Requester { self.requester.clone() }

    /// Grant the peer a lease of `number_of_requests` requests valid for
    /// `ttl`.
    ///
    /// # Errors
    ///
    /// Returns an error when the connection has closed.
    pub async fn send_lease(
        &self,
        ttl: std::time::Duration,
        number_of_requests: u32,
    ) -> Result<(), RSocketError> {
        let ttl = u32::try_from(ttl.as_millis()).unwrap_or(u32::MAX) & crate::frame::MAX_REQUEST_N;
        self.requester
            .shared()
            .send_frame(Frame::Lease {
                ttl,
                number_of_requests,
                metadata: None,
            })
            .await
    }

    /// Whether the connection has begun closing.
    #[must_use]
    pub fn is_closed(&self) -> bool { self.shutdown.is_cancelled() || self.driver.is_finished() }

    /// Close the connection gracefully.
    ///
    /// All live streams observe cancellation before this future resolves.
    pub async fn close(self) {
        self.shutdown.cancel();
        let _ = self.driver.await;
    }

    /// Wait for the connection to terminate for any reason.
    pub async fn closed(self) { let _ = self.driver.await; }
}

/// Everything the peer can do to end a connection, plus our own reasons.
#[derive(Debug)]
enum CloseReason {
    /// Local close requested through the shutdown token or handle drop.
    LocalClose,
    /// The peer sent ERROR on stream zero.
    PeerClose { code: ErrorCode, message: String },
    /// The transport reached end of stream.
    PeerHangup,
    /// The transport failed.
    Transport(TransportError),
    /// No KEEPALIVE arrived within the negotiated maximum lifetime.
    KeepAliveTimeout,
    /// The peer violated the wire protocol.
    Protocol(ProtocolError),
}

impl CloseReason {
    /// Frame to offer the peer before closing, when one is owed.
    fn goodbye_frame(&self) -> Option<Frame> {
        match self {
            Self::LocalClose => Some(Frame::error(
                0,
                ErrorCode::CONNECTION_CLOSE,
                "connection closed",
            )),
            Self::KeepAliveTimeout => Some(Frame::error(
                0,
                ErrorCode::CONNECTION_ERROR,
                "keepalive timeout",
            )),
            Self::Protocol(err) => {
                Some(Frame::error(0, ErrorCode::CONNECTION_ERROR, err.to_string()))
            }
            Self::PeerClose { .. } | Self::PeerHangup | Self::Transport(_) => None,
        }
    }

    /// Code and diagnostic every live stream is terminated with.
    fn stream_error(&self) -> (ErrorCode, String) {
        match self {
            Self::LocalClose => (ErrorCode::CONNECTION_CLOSE, "connection closed".into()),
            Self::PeerClose { code, message } => (*code, message.clone()),
            Self::PeerHangup => (ErrorCode::CONNECTION_CLOSE, "transport closed by peer".into()),
            Self::Transport(err) => (ErrorCode::CONNECTION_ERROR, err.to_string()),
            Self::KeepAliveTimeout => (ErrorCode::CONNECTION_ERROR, "keepalive timeout".into()),
            Self::Protocol(err) => (ErrorCode::CONNECTION_ERROR, err.to_string()),
        }
    }
}

/// Per-connection context for resume position bookkeeping.
pub(crate) struct ResumeContext {
    pub(crate) store: Arc<dyn ResumeStore>,
    pub(crate) token: Bytes,
}

/// The single task owning a connection's transport.
pub(crate) struct ConnectionDriver<T: FrameTransport> {
    transport: T,
    egress_rx: mpsc::Receiver<Frame>,
    shared: Arc<ConnectionShared>,
    dispatcher: Dispatcher,
    fragmenter: Option<Fragmenter>,
    reassembler: Reassembler,
    keepalive: KeepAliveScheduler,
    ignored: IgnoredFrameConsumer,
    resume: Option<ResumeContext>,
    received_position: u64,
    /// Last position the peer reported receiving, from its KEEPALIVEs.
    peer_position: u64,
    phase: ConnectionPhase,
}

impl<T: FrameTransport> ConnectionDriver<T> {
    pub(crate) fn new(
        transport: T,
        shared: Arc<ConnectionShared>,
        egress_rx: mpsc::Receiver<Frame>,
        dispatcher: Dispatcher,
        keepalive: KeepAliveScheduler,
        ignored: IgnoredFrameConsumer,
        resume: Option<ResumeContext>,
    ) -> Self {
        let fragmenter = Fragmenter::new(shared.config.fragmentation_mtu);
        let reassembler = Reassembler::new(shared.config.max_reassembly_bytes);
        Self {
            transport,
            egress_rx,
            shared,
            dispatcher,
            fragmenter,
            reassembler,
            keepalive,
            ignored,
            resume,
            received_position: 0,
            peer_position: 0,
            phase: ConnectionPhase::Connecting,
        }
    }

    fn set_phase(&mut self, phase: ConnectionPhase) {
        log::debug!(
            "{:?} connection {:?} -> {phase:?}",
            self.shared.role,
            self.phase
        );
        self.phase = phase;
    }

    /// Drive the connection until it closes, then run the close cascade.
    pub(crate) async fn run(mut self) {
        self.set_phase(ConnectionPhase::Established);
        let reason = self.drive().await;
        self.close(reason).await;
    }

    async fn drive(&mut self) -> CloseReason {
        loop {
            tokio::select! {
                biased;

                () = self.shared.shutdown.cancelled() => return CloseReason::LocalClose,

                maybe_frame = self.egress_rx.recv() => match maybe_frame {
                    Some(frame) => {
                        if let Err(reason) = self.write_frame(frame).await {
                            return reason;
                        }
                    }
                    // The shared state keeps a sender alive, so this only
                    // happens when shared state is torn down externally.
                    None => return CloseReason::LocalClose,
                },

                inbound = self.transport.recv() => match inbound {
                    Ok(Some(packet)) => {
                        if let Err(reason) = self.handle_packet(packet) {
                            return reason;
                        }
                    }
                    Ok(None) => return CloseReason::PeerHangup,
                    Err(err) => return CloseReason::Transport(err),
                },

                () = time::sleep_until(self.keepalive.next_ping()) => {
                    let ping = Frame::KeepAlive {
                        respond: true,
                        last_received_position: self.received_position,
                        data: Bytes::new(),
                    };
                    if let Err(reason) = self.write_frame(ping).await {
                        return reason;
                    }
                    self.keepalive.on_ping_sent(Instant::now());
                }

                () = time::sleep_until(self.keepalive.deadline()) => {
                    return CloseReason::KeepAliveTimeout;
                }
            }
        }
    }

    /// Fragment, encode, and write one frame to the transport.
    async fn write_frame(&mut self, frame: Frame) -> Result<(), CloseReason> {
        let frames = match &self.fragmenter {
            Some(fragmenter) => fragmenter.fragment(frame),
            None => vec![frame],
        };
        for frame in frames {
            let size = frame.encoded_len();
            let max = self.shared.config.max_frame_len;
            if size > max {
                return Err(CloseReason::Protocol(ProtocolError::stream(
                    frame.stream_id(),
                    ProtocolErrorKind::FrameTooLarge { size, max },
                )));
            }
            let packet = frame.encode().map_err(CloseReason::Protocol)?;
            self.transport
                .send(packet)
                .await
                .map_err(CloseReason::Transport)?;
        }
        Ok(())
    }

    /// Decode one inbound packet and route the frame.
    fn handle_packet(&mut self, packet: Bytes) -> Result<(), CloseReason> {
        self.received_position += 1;
        let frame = Frame::decode(packet).map_err(CloseReason::Protocol)?;
        log::trace!(
            "received {} frame for stream {}",
            frame.type_name(),
            frame.stream_id()
        );
        let Some(frame) = self
            .reassembler
            .accept(frame)
            .map_err(CloseReason::Protocol)?
        else {
            return Ok(());
        };

        match frame {
            Frame::Unknown { .. } => {
                (self.ignored)(&frame);
                Ok(())
            }
            Frame::Ext { can_ignore, .. } => {
                if can_ignore {
                    (self.ignored)(&frame);
                    Ok(())
                } else {
                    Err(CloseReason::Protocol(ProtocolError::stream(
                        frame.stream_id(),
                        ProtocolErrorKind::UnknownFrameType {
                            type_id: frame_type::EXT,
                        },
                    )))
                }
            }
            Frame::KeepAlive {
                respond,
                last_received_position,
                data,
            } => {
                self.on_keepalive(respond, last_received_position, data);
                Ok(())
            }
            Frame::Lease {
                ttl,
                number_of_requests,
                ..
            } => {
                self.shared.lease.grant(ttl, number_of_requests);
                Ok(())
            }
            Frame::MetadataPush { metadata } => {
                self.dispatcher.accept_metadata_push(metadata);
                Ok(())
            }
            Frame::Error {
                stream_id: 0,
                code,
                data,
            } => Err(CloseReason::PeerClose {
                code,
                message: String::from_utf8_lossy(&data).into_owned(),
            }),
            Frame::Setup { .. } => Err(CloseReason::Protocol(ProtocolError::connection(
                ProtocolErrorKind::UnexpectedHandshakeFrame { frame: "SETUP" },
            ))),
            Frame::Resume { .. } => Err(CloseReason::Protocol(ProtocolError::connection(
                ProtocolErrorKind::UnexpectedHandshakeFrame { frame: "RESUME" },
            ))),
            Frame::ResumeOk { .. } => Err(CloseReason::Protocol(ProtocolError::connection(
                ProtocolErrorKind::UnexpectedHandshakeFrame { frame: "RESUME_OK" },
            ))),
            stream_frame => self
                .dispatcher
                .dispatch(stream_frame)
                .map_err(CloseReason::Protocol),
        }
    }

    fn on_keepalive(&mut self, respond: bool, peer_position: u64, data: Bytes) {
        let now = Instant::now();
        self.keepalive.observe_inbound(now);
        self.peer_position = peer_position;
        if let Some(resume) = &self.resume {
            resume.store.save(&resume.token, self.received_position);
        }
        if respond {
            // Echo the data verbatim, advertising our own position.
            let _ = self.shared.enqueue_frame(Frame::KeepAlive {
                respond: false,
                last_received_position: self.received_position,
                data,
            });
        }
    }

    /// Terminal sequence: goodbye frame, stream cascade, transport close.
    async fn close(mut self, reason: CloseReason) {
        self.set_phase(ConnectionPhase::Closing);
        log::debug!(
            "{:?} connection closing: {reason:?} (received {} frames, peer acknowledged {})",
            self.shared.role,
            self.received_position,
            self.peer_position,
        );

        // A graceful local close drains frames already queued; error closes
        // drop them.
        if matches!(reason, CloseReason::LocalClose) {
            while let Ok(frame) = self.egress_rx.try_recv() {
                if self.write_frame(frame).await.is_err() {
                    break;
                }
            }
        }
        if let Some(goodbye) = reason.goodbye_frame()
            && let Ok(packet) = goodbye.encode()
        {
            let _ = self.transport.send(packet).await;
        }

        // Streams observe cancellation before the connection reports closed.
        let (code, message) = reason.stream_error();
        self.shared.record_close(code, &message);
        self.shared.shutdown.cancel();
        self.egress_rx.close();
        log::debug!("cancelling {} live streams", self.shared.registry.len());
        for (stream_id, handle) in self.shared.registry.drain() {
            log::trace!(
                "terminating {:?} {:?} stream {stream_id}: {code}",
                handle.role(),
                handle.kind(),
            );
            let _ = handle.send(StreamEvent::Error(RSocketError::ConnectionClosed {
                code,
                message: message.clone(),
            }));
        }

        let _ = self.transport.close().await;
        self.set_phase(ConnectionPhase::Closed);
    }
}
