//! Application payloads exchanged over streams.
//!
//! A [`Payload`] pairs an opaque data byte sequence with optional metadata.
//! The engine never interprets either; MIME types declared in SETUP describe
//! them to the application layer.

use bytes::Bytes;

/// Data plus optional metadata carried by request and payload frames.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Payload {
    metadata: Option<Bytes>,
    data: Bytes,
}

impl Payload {
    /// Payload with data only.
    #[must_use]
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            metadata: None,
            data: data.into(),
        }
    }

    /// Payload with data and metadata.
    #[must_use]
    pub fn with_metadata(data: impl Into<Bytes>, metadata: impl Into<Bytes>) -> Self {
        Self {
            metadata: Some(metadata.into()),
            data: data.into(),
        }
    }

    /// Payload with no data and no metadata.
    #[must_use]
    pub fn empty() -> Self { Self::default() }

    /// Borrow the data bytes.
    #[must_use]
    pub fn data(&self) -> &Bytes { &self.data }

    /// Borrow the metadata bytes, if present.
    #[must_use]
    pub fn metadata(&self) -> Option<&Bytes> { self.metadata.as_ref() }

    /// Whether both data and metadata are absent or empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty() && self.metadata.as_ref().is_none_or(Bytes::is_empty)
    }

    /// Consume the payload, returning `(metadata, data)`.
    #[must_use]
    pub fn into_parts(self) -> (Option<Bytes>, Bytes) { (self.metadata, self.data) }

    /// Rebuild a payload from its parts.
    #[must_use]
    pub fn from_parts(metadata: Option<Bytes>, data: Bytes) -> Self { Self { metadata, data } }
}

impl From<Bytes> for Payload {
    fn from(data: Bytes) -> Self { Self::new(data) }
}

impl From<&'static str> for Payload {
    fn from(data: &'static str) -> Self { Self::new(Bytes::from_static(data.as_bytes())) }
}

impl From<Vec<u8>> for Payload {
    fn from(data: Vec<u8>) -> Self { Self::new(Bytes::from(data)) }
}

/// Connection parameters and payload received with SETUP.
///
/// Handed to the server acceptor so it can decide whether to accept the
/// connection and which responder to attach.
#[derive(Clone, Debug)]
pub struct SetupPayload {
    /// Opaque payload sent with SETUP.
    pub payload: Payload,
    /// Declared MIME type for metadata on this connection.
    pub metadata_mime_type: String,
    /// Declared MIME type for data on this connection.
    pub data_mime_type: String,
    /// Interval between client keep-alives, in milliseconds.
    pub keepalive_interval_millis: u32,
    /// Maximum quiet period before either side closes, in milliseconds.
    pub max_lifetime_millis: u32,
    /// Whether the client asked for lease semantics.
    pub lease_requested: bool,
    /// Resume token carried in SETUP, if resumption was requested.
    pub resume_token: Option<Bytes>,
}
