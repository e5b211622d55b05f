//! Peer-to-peer, bidirectional, multiplexed messaging over a single duplex
//! transport, implementing the RSocket wire protocol.
//!
//! The engine multiplexes four interaction models — fire-and-forget,
//! request/response, request/stream, and request/channel — plus
//! metadata-push over one connection, with per-stream REQUEST_N credit for
//! backpressure and keep-alive frames for liveness.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use rsocket_wire::{Connector, Payload, RequestHandler, Server};
//!
//! # async fn demo() -> Result<(), rsocket_wire::RSocketError> {
//! let handler = RequestHandler::builder()
//!     .request_response(|payload: Payload| async move { Ok(payload) })
//!     .build();
//! let server = Server::with_responder(Arc::new(handler));
//!
//! let (client_end, server_end) = rsocket_wire::transport::local_pair(16);
//! let _accept_task = tokio::spawn(async move { server.accept(server_end).await });
//!
//! let connection = Connector::new().connect(client_end).await?;
//! let echoed = connection.requester().request_response("ping".into()).await?;
//! assert_eq!(echoed.data().as_ref(), b"ping");
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod fragment;
pub mod frame;
mod lease;
pub mod payload;
pub mod requester;
pub mod responder;
pub mod resume;
pub mod server;
pub mod stream;
pub mod transport;

pub use client::Connector;
pub use config::EngineConfig;
pub use connection::{Connection, ConnectionRole, IgnoredFrameConsumer};
pub use error::{ErrorCode, ProtocolError, RSocketError, TransportError};
pub use frame::Frame;
pub use payload::{Payload, SetupPayload};
pub use requester::Requester;
pub use responder::{PayloadStream, RSocket, RequestHandler};
pub use resume::{InMemoryResumeStore, ResumeStore};
pub use server::Server;
