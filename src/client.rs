//! Client-side connection establishment.
//!
//! [`Connector`] collects the SETUP options, sends the SETUP frame over a
//! transport, and spawns the connection driver. The returned [`Connection`]
//! hands out the requester half.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use tokio::{net::ToSocketAddrs, time::Instant};

use crate::{
    config::EngineConfig,
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
        setup::build_setup,
    },
    error::RSocketError,
    payload::Payload,
    requester::Requester,
    responder::{RSocket, RequestHandler},
    resume::ResumeStore,
    transport::{FrameTransport, TcpTransport},
};

/// Builder for client connections.
pub struct Connector {
    config: EngineConfig,
    responder: Arc<dyn RSocket>,
    resume: Option<(Arc<dyn ResumeStore>, Bytes)>,
    ignored: IgnoredFrameConsumer,
}

impl Default for Connector {
    fn default() -> Self { Self::new() }
}

impl Connector {
    /// Connector with default options and a reject-everything responder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            responder: Arc::new(RequestHandler::default()),
            resume: None,
            ignored: default_ignored_frames(),
        }
    }

    /// Set the keep-alive interval and maximum lifetime.
    #[must_use]
    pub fn keep_alive(mut self, interval: Duration, max_lifetime: Duration) -> Self {
        self.config.keepalive_interval = interval;
        self.config.keepalive_max_lifetime = max_lifetime;
        self
    }

    /// Cap encoded frames at `mtu` bytes, splitting larger ones. Zero
    /// disables fragmentation.
    #[must_use]
    pub fn fragment_mtu(mut self, mtu: usize) -> Self {
        self.config.fragmentation_mtu = mtu;
        self
    }

    /// Declare the metadata MIME type carried in SETUP.
    #[must_use]
    pub fn metadata_mime_type(mut self, mime: impl Into<String>) -> Self {
        self.config.metadata_mime_type = mime.into();
        self
    }

    /// Declare the data MIME type carried in SETUP.
    #[must_use]
    pub fn data_mime_type(mut self, mime: impl Into<String>) -> Self {
        self.config.data_mime_type = mime.into();
        self
    }

    /// Opaque payload to send with SETUP.
    #[must_use]
    pub fn setup_payload(mut self, payload: Payload) -> Self {
        self.config.setup_payload = payload;
        self
    }

    /// Negotiate lease semantics: requests wait for LEASE grants.
    #[must_use]
    pub fn lease(mut self, enabled: bool) -> Self {
        self.config.lease_enabled = enabled;
        self
    }

    /// Initial credit requested when opening streams and channels.
    #[must_use]
    pub fn initial_request_n(mut self, n: u32) -> Self {
        self.config.initial_request_n = n;
        self
    }

    /// Responder serving requests the server initiates.
    #[must_use]
    pub fn responder(mut self, responder: Arc<dyn RSocket>) -> Self {
        self.responder = responder;
        self
    }

    /// Consumer for legally ignored frames.
    #[must_use]
    pub fn ignored_frames(mut self, consumer: IgnoredFrameConsumer) -> Self {
        self.ignored = consumer;
        self
    }

    /// Advertise `token` for resumption and record positions in `store`.
    #[must_use]
    pub fn resume(mut self, store: Arc<dyn ResumeStore>, token: impl Into<Bytes>) -> Self {
        self.resume = Some((store, token.into()));
        self
    }

    /// Replace the whole configuration at once.
    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Open a connection over an established transport.
    ///
    /// Sends SETUP and spawns the connection driver; the returned handle is
    /// live immediately.
    ///
    /// # Errors
    ///
    /// Fails on invalid configuration or when the transport rejects the
    /// SETUP frame.
    pub async fn connect<T: FrameTransport>(
        self,
        mut transport: T,
    ) -> Result<Connection, RSocketError> {
        self.config.validate()?;

        let token = self.resume.as_ref().map(|(_, token)| token.clone());
        let setup = build_setup(&self.config, token);
        let packet = setup.encode()?;
        transport.send(packet).await?;

        let keepalive = KeepAliveScheduler::new(
            self.config.keepalive_interval,
            self.config.keepalive_max_lifetime,
            Instant::now(),
        );
        let (shared, egress_rx) = ConnectionShared::new(ConnectionRole::Client, self.config);
        let requester = Requester::new(Arc::clone(&shared));
        let dispatcher = Dispatcher::new(
            Arc::clone(&shared),
            self.responder,
            Arc::clone(&self.ignored),
        );
        let resume = self
            .resume
            .map(|(store, token)| ResumeContext { store, token });
        let driver = ConnectionDriver::new(
            transport,
            Arc::clone(&shared),
            egress_rx,
            dispatcher,
            keepalive,
            self.ignored,
            resume,
        );
        let shutdown = shared.shutdown.clone();
        let driver = tokio::spawn(driver.run());
        Ok(Connection::new(requester, shutdown, driver))
    }

    /// Connect over TCP to `addr`.
    ///
    /// # Errors
    ///
    /// Fails when the TCP connection or the SETUP exchange fails.
    pub async fn connect_tcp(self, addr: impl ToSocketAddrs) -> Result<Connection, RSocketError> {
        let stream = tokio::net::TcpStream::connect(addr)
            .await
            .map_err(crate::error::TransportError::Io)?;
        self.connect(TcpTransport::new(stream)).await
    }
}
