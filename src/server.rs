//! Server-side connection acceptance.
//!
//! A [`Server`] validates each connection's SETUP, asks the acceptor for a
//! responder, and spawns the connection driver. RESUME handshakes are
//! answered from the configured [`ResumeStore`] or rejected.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use tokio::{net::TcpListener, time::Instant};

use crate::{
    config::{DEFAULT_MIME_TYPE, EngineConfig},
    connection::{
        Connection,
        ConnectionDriver,
        ConnectionRole,
        ConnectionShared,
        IgnoredFrameConsumer,
        ResumeContext,
        default_ignored_frames,
        dispatch::Dispatcher,
        keepalive::KeepAliveScheduler,
        setup::{clamp_millis, validate_setup},
    },
    error::{ErrorCode, RSocketError, TransportError},
    frame::Frame,
    payload::{Payload, SetupPayload},
    requester::Requester,
    responder::RSocket,
    resume::ResumeStore,
    transport::{FrameTransport, TcpTransport},
};

/// Acceptor invoked once per connection with the SETUP payload and the
/// requester pointed at the connecting peer. Returning an error rejects the
/// SETUP.
pub type Acceptor =
    dyn Fn(SetupPayload, Requester) -> Result<Arc<dyn RSocket>, RSocketError> + Send + Sync;

/// Accepts connections and runs one engine per transport.
pub struct Server {
    config: EngineConfig,
    acceptor: Arc<Acceptor>,
    ignored: IgnoredFrameConsumer,
    resume_store: Option<Arc<dyn ResumeStore>>,
}

impl Server {
    /// Server delegating connection acceptance to `acceptor`.
    pub fn new<F>(acceptor: F) -> Self
    where
        F: Fn(SetupPayload, Requester) -> Result<Arc<dyn RSocket>, RSocketError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            config: EngineConfig::default(),
            acceptor: Arc::new(acceptor),
            ignored: default_ignored_frames(),
            resume_store: None,
        }
    }

    /// Server that attaches the same responder to every connection.
    pub fn with_responder(responder: Arc<dyn RSocket>) -> Self {
        Self::new(move |_setup, _requester| Ok(Arc::clone(&responder)))
    }

    /// Replace the engine configuration used for accepted connections.
    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Cap encoded frames at `mtu` bytes, splitting larger ones.
    #[must_use]
    pub fn fragment_mtu(mut self, mtu: usize) -> Self {
        self.config.fragmentation_mtu = mtu;
        self
    }

    /// Initial credit granted when responding streams open.
    #[must_use]
    pub fn initial_request_n(mut self, n: u32) -> Self {
        self.config.initial_request_n = n;
        self
    }

    /// Consumer for legally ignored frames.
    #[must_use]
    pub fn ignored_frames(mut self, consumer: IgnoredFrameConsumer) -> Self {
        self.ignored = consumer;
        self
    }

    /// Answer RESUME handshakes from `store`.
    #[must_use]
    pub fn resume_store(mut self, store: Arc<dyn ResumeStore>) -> Self {
        self.resume_store = Some(store);
        self
    }

    /// Accept one connection over an established transport.
    ///
    /// Reads the handshake frame, validates it, invokes the acceptor, and
    /// spawns the connection driver.
    ///
    /// # Errors
    ///
    /// Fails when the handshake is invalid or rejected; the peer receives
    /// the corresponding setup error before the transport closes.
    pub async fn accept<T: FrameTransport>(
        &self,
        mut transport: T,
    ) -> Result<Connection, RSocketError> {
        self.config.validate()?;

        let Some(packet) = transport.recv().await? else {
            return Err(TransportError::Closed.into());
        };
        let frame = match Frame::decode(packet) {
            Ok(frame) => frame,
            Err(err) => {
                let message = err.to_string();
                reject(&mut transport, ErrorCode::INVALID_SETUP, &message).await;
                return Err(err.into());
            }
        };
        match frame {
            setup @ Frame::Setup { .. } => self.establish(transport, setup).await,
            Frame::Resume { resume_token, .. } => {
                self.resume_session(transport, resume_token).await
            }
            other => {
                let message = format!("expected SETUP, received {}", other.type_name());
                reject(&mut transport, ErrorCode::INVALID_SETUP, &message).await;
                Err(RSocketError::Setup {
                    code: ErrorCode::INVALID_SETUP,
                    message,
                })
            }
        }
    }

    async fn establish<T: FrameTransport>(
        &self,
        mut transport: T,
        frame: Frame,
    ) -> Result<Connection, RSocketError> {
        let setup = match validate_setup(frame) {
            Ok(setup) => setup,
            Err((code, message)) => {
                reject(&mut transport, code, &message).await;
                return Err(RSocketError::Setup { code, message });
            }
        };

        // The client's declared timing governs both directions.
        let interval = Duration::from_millis(u64::from(setup.keepalive_interval_millis));
        let max_lifetime = Duration::from_millis(u64::from(setup.max_lifetime_millis));
        let keepalive = KeepAliveScheduler::new(interval, max_lifetime, Instant::now());

        // Leases gate the client's requests, not the server's.
        let mut config = self.config.clone();
        config.lease_enabled = false;

        let resume = match (&self.resume_store, &setup.resume_token) {
            (Some(store), Some(token)) => Some(ResumeContext {
                store: Arc::clone(store),
                token: token.clone(),
            }),
            _ => None,
        };

        let (shared, egress_rx) = ConnectionShared::new(ConnectionRole::Server, config);
        let requester = Requester::new(Arc::clone(&shared));
        let responder = match (self.acceptor)(setup, requester.clone()) {
            Ok(responder) => responder,
            Err(err) => {
                let message = err.to_string();
                reject(&mut transport, ErrorCode::REJECTED_SETUP, &message).await;
                return Err(RSocketError::Setup {
                    code: ErrorCode::REJECTED_SETUP,
                    message,
                });
            }
        };

        let dispatcher = Dispatcher::new(Arc::clone(&shared), responder, Arc::clone(&self.ignored));
        let driver = ConnectionDriver::new(
            transport,
            Arc::clone(&shared),
            egress_rx,
            dispatcher,
            keepalive,
            Arc::clone(&self.ignored),
            resume,
        );
        let shutdown = shared.shutdown.clone();
        let driver = tokio::spawn(driver.run());
        Ok(Connection::new(requester, shutdown, driver))
    }

    async fn resume_session<T: FrameTransport>(
        &self,
        mut transport: T,
        token: Bytes,
    ) -> Result<Connection, RSocketError> {
        let Some(store) = &self.resume_store else {
            return Err(self
                .reject_resume(&mut transport, "resumption not enabled")
                .await);
        };
        let Some(position) = store.load(&token) else {
            return Err(self
                .reject_resume(&mut transport, "unknown resume token")
                .await);
        };

        let ack = Frame::ResumeOk {
            last_received_client_position: position,
        };
        transport.send(ack.encode()?).await?;

        // Stream state is the resume store's concern; the connection itself
        // restarts with an empty registry and local timing defaults.
        let setup = SetupPayload {
            payload: Payload::empty(),
            metadata_mime_type: DEFAULT_MIME_TYPE.to_owned(),
            data_mime_type: DEFAULT_MIME_TYPE.to_owned(),
            keepalive_interval_millis: clamp_millis(self.config.keepalive_interval),
            max_lifetime_millis: clamp_millis(self.config.keepalive_max_lifetime),
            lease_requested: false,
            resume_token: Some(token.clone()),
        };
        let keepalive = KeepAliveScheduler::new(
            self.config.keepalive_interval,
            self.config.keepalive_max_lifetime,
            Instant::now(),
        );
        let mut config = self.config.clone();
        config.lease_enabled = false;
        let (shared, egress_rx) = ConnectionShared::new(ConnectionRole::Server, config);
        let requester = Requester::new(Arc::clone(&shared));
        let responder = match (self.acceptor)(setup, requester.clone()) {
            Ok(responder) => responder,
            Err(err) => {
                let message = err.to_string();
                reject(&mut transport, ErrorCode::REJECTED_RESUME, &message).await;
                return Err(RSocketError::Setup {
                    code: ErrorCode::REJECTED_RESUME,
                    message,
                });
            }
        };
        let dispatcher = Dispatcher::new(Arc::clone(&shared), responder, Arc::clone(&self.ignored));
        let driver = ConnectionDriver::new(
            transport,
            Arc::clone(&shared),
            egress_rx,
            dispatcher,
            keepalive,
            Arc::clone(&self.ignored),
            Some(ResumeContext {
                store: Arc::clone(store),
                token,
            }),
        );
        let shutdown = shared.shutdown.clone();
        let driver = tokio::spawn(driver.run());
        Ok(Connection::new(requester, shutdown, driver))
    }

    async fn reject_resume<T: FrameTransport>(
        &self,
        transport: &mut T,
        message: &str,
    ) -> RSocketError {
        reject(transport, ErrorCode::REJECTED_RESUME, message).await;
        RSocketError::Setup {
            code: ErrorCode::REJECTED_RESUME,
            message: message.to_owned(),
        }
    }

    /// Accept TCP connections forever, one engine per socket.
    ///
    /// Rejected handshakes are logged and do not stop the loop.
    ///
    /// # Errors
    ///
    /// Returns the listener's I/O error, if any.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> std::io::Result<()> {
        loop {
            let (stream, peer) = listener.accept().await?;
            log::debug!("accepted TCP connection from {peer}");
            let server = Arc::clone(&self);
            tokio::spawn(async move {
                match server.accept(TcpTransport::new(stream)).await {
                    Ok(_connection) => log::debug!("connection from {peer} established"),
                    Err(err) => log::warn!("connection from {peer} failed: {err}"),
                }
            });
        }
    }
}

/// Send a setup-phase ERROR and close the transport, best effort.
async fn reject<T: FrameTransport>(transport: &mut T, code: ErrorCode, message: &str) {
    if let Ok(packet) = Frame::error(0, code, message).encode() {
        let _ = transport.send(packet).await;
    }
    let _ = transport.close().await;
}
