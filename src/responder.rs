//! The application handler surface.
//!
//! A responder is anything implementing [`RSocket`]; every method has a
//! default that rejects with REJECTED, so handlers implement only the
//! interactions they serve. [`RequestHandler`] offers the same thing as a
//! builder over optional closures for callers who prefer configuration to a
//! trait impl.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, future::BoxFuture, stream};

use crate::{error::RSocketError, payload::Payload};

/// A lazy, cancellable, backpressured sequence of payloads.
///
/// Both `request_stream` and `request_channel` exchange these. Dropping the
/// stream cancels the underlying protocol stream; items arrive in wire
/// order.
pub type PayloadStream =
    Pin<Box<dyn Stream<Item = Result<Payload, RSocketError>> + Send + 'static>>;

/// A single-element payload stream that fails with `err`.
#[must_use]
pub fn error_stream(err: RSocketError) -> PayloadStream {
    Box::pin(stream::once(async move { Err(err) }))
}

/// A payload stream yielding the given payloads then completing.
#[must_use]
pub fn payload_stream(payloads: Vec<Payload>) -> PayloadStream {
    Box::pin(stream::iter(payloads.into_iter().map(Ok)))
}

fn reject(interaction: &str) -> RSocketError {
    RSocketError::rejected(format!("{interaction} not supported"))
}

/// The symmetric application interface of one peer.
///
/// Served by responders and offered by requesters; both ends of a connection
/// expose the same five interactions.
#[async_trait]
pub trait RSocket: Send + Sync + 'static {
    /// Receive connection-level metadata outside any stream.
    async fn metadata_push(&self, metadata: Bytes) -> Result<(), RSocketError> {
        let _ = metadata;
        Err(reject("metadata_push"))
    }

    /// Handle a request that expects no response.
    async fn fire_and_forget(&self, payload: Payload) -> Result<(), RSocketError> {
        let _ = payload;
        Err(reject("fire_and_forget"))
    }

    /// Handle a request with exactly one response payload.
    async fn request_response(&self, payload: Payload) -> Result<Payload, RSocketError> {
        let _ = payload;
        Err(reject("request_response"))
    }

    /// Handle a request by producing a stream of payloads.
    fn request_stream(&self, payload: Payload) -> PayloadStream {
        let _ = payload;
        error_stream(reject("request_stream"))
    }

    /// Handle a bidirectional channel of payloads.
    fn request_channel(&self, payloads: PayloadStream) -> PayloadStream {
        drop(payloads);
        error_stream(reject("request_channel"))
    }
}

type MetadataPushFn =
    Box<dyn Fn(Bytes) -> BoxFuture<'static, Result<(), RSocketError>> + Send + Sync>;
type FireAndForgetFn =
    Box<dyn Fn(Payload) -> BoxFuture<'static, Result<(), RSocketError>> + Send + Sync>;
type RequestResponseFn =
    Box<dyn Fn(Payload) -> BoxFuture<'static, Result<Payload, RSocketError>> + Send + Sync>;
type RequestStreamFn = Box<dyn Fn(Payload) -> PayloadStream + Send + Sync>;
type RequestChannelFn = Box<dyn Fn(PayloadStream) -> PayloadStream + Send + Sync>;

/// Responder assembled from optional per-interaction closures.
///
/// Interactions without a closure reject with REJECTED, mirroring the trait
/// defaults.
#[derive(Default)]
pub struct RequestHandler {
    metadata_push: Option<MetadataPushFn>,
    fire_and_forget: Option<FireAndForgetFn>,
    request_response: Option<RequestResponseFn>,
    request_stream: Option<RequestStreamFn>,
    request_channel: Option<RequestChannelFn>,
}

impl RequestHandler {
    /// Start building a handler.
    #[must_use]
    pub fn builder() -> RequestHandlerBuilder { RequestHandlerBuilder::default() }
}

#[async_trait]
impl RSocket for RequestHandler {
    async fn metadata_push(&self, metadata: Bytes) -> Result<(), RSocketError> {
        match &self.metadata_push {
            Some(handler) => handler(metadata).await,
            None => Err(reject("metadata_push")),
        }
    }

    async fn fire_and_forget(&self, payload: Payload) -> Result<(), RSocketError> {
        match &self.fire_and_forget {
            Some(handler) => handler(payload).await,
            None => Err(reject("fire_and_forget")),
        }
    }

    async fn request_response(&self, payload: Payload) -> Result<Payload, RSocketError> {
        match &self.request_response {
            Some(handler) => handler(payload).await,
            None => Err(reject("request_response")),
        }
    }

    fn request_stream(&self, payload: Payload) -> PayloadStream {
        match &self.request_stream {
            Some(handler) => handler(payload),
            None => error_stream(reject("request_stream")),
        }
    }

    fn request_channel(&self, payloads: PayloadStream) -> PayloadStream {
        match &self.request_channel {
            Some(handler) => handler(payloads),
            None => error_stream(reject("request_channel")),
        }
    }
}

/// Builder collecting the optional interaction closures.
#[derive(Default)]
pub struct RequestHandlerBuilder {
    handler: RequestHandler,
}

impl RequestHandlerBuilder {
    /// Handle metadata pushes with `f`.
    #[must_use]
    pub fn metadata_push<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), RSocketError>> + Send + 'static,
    {
        self.handler.metadata_push = Some(Box::new(move |metadata| Box::pin(f(metadata))));
        self
    }

    /// Handle fire-and-forget requests with `f`.
    #[must_use]
    pub fn fire_and_forget<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), RSocketError>> + Send + 'static,
    {
        self.handler.fire_and_forget = Some(Box::new(move |payload| Box::pin(f(payload))));
        self
    }

    /// Handle request/response interactions with `f`.
    #[must_use]
    pub fn request_response<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Payload, RSocketError>> + Send + 'static,
    {
        self.handler.request_response = Some(Box::new(move |payload| Box::pin(f(payload))));
        self
    }

    /// Handle request/stream interactions with `f`.
    #[must_use]
    pub fn request_stream<F>(mut self, f: F) -> Self
    where
        F: Fn(Payload) -> PayloadStream + Send + Sync + 'static,
    {
        self.handler.request_stream = Some(Box::new(f));
        self
    }

    /// Handle request/channel interactions with `f`.
    #[must_use]
    pub fn request_channel<F>(mut self, f: F) -> Self
    where
        F: Fn(PayloadStream) -> PayloadStream + Send + Sync + 'static,
    {
        self.handler.request_channel = Some(Box::new(f));
        self
    }

    /// Finish the handler.
    #[must_use]
    pub fn build(self) -> RequestHandler { self.handler }
}
