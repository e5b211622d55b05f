//! Typed frames and their wire representation.
//!
//! [`Frame`] is a tagged variant over every frame kind in the protocol. The
//! byte-level encoding and decoding live in [`codec`]; this module defines the
//! frame model, the type registry, and the flag bit assignments.
//!
//! Every frame starts with a six-byte header: a 31-bit stream id (high bit
//! reserved, must be zero), a six-bit frame type, and ten flag bits. All
//! multi-byte integers are big-endian.

pub mod codec;

use bytes::Bytes;

use crate::{error::ErrorCode, payload::Payload};

/// Six-bit frame type identifiers.
pub mod frame_type {
    /// Connection SETUP.
    pub const SETUP: u8 = 0x01;
    /// Lease grant.
    pub const LEASE: u8 = 0x02;
    /// Liveness ping.
    pub const KEEPALIVE: u8 = 0x03;
    /// Request/response interaction.
    pub const REQUEST_RESPONSE: u8 = 0x04;
    /// Fire-and-forget interaction.
    pub const REQUEST_FNF: u8 = 0x05;
    /// Request/stream interaction.
    pub const REQUEST_STREAM: u8 = 0x06;
    /// Request/channel interaction.
    pub const REQUEST_CHANNEL: u8 = 0x07;
    /// Flow-control credit grant.
    pub const REQUEST_N: u8 = 0x08;
    /// Requester cancellation.
    pub const CANCEL: u8 = 0x09;
    /// Stream payload.
    pub const PAYLOAD: u8 = 0x0A;
    /// Stream or connection error.
    pub const ERROR: u8 = 0x0B;
    /// Connection-level metadata push.
    pub const METADATA_PUSH: u8 = 0x0C;
    /// Resumption request.
    pub const RESUME: u8 = 0x0D;
    /// Resumption acknowledgement.
    pub const RESUME_OK: u8 = 0x0E;
    /// Extension frame.
    pub const EXT: u8 = 0x3F;
}

/// Flag bit assignments within the ten-bit flag field.
///
/// `IGNORE` and `METADATA` are positional across all frame types; the
/// remaining bits are interpreted per type.
pub mod flags {
    /// (I)gnore: drop the frame rather than erroring when not understood.
    pub const IGNORE: u16 = 0x0200;
    /// (M)etadata present.
    pub const METADATA: u16 = 0x0100;
    /// (F)ollows: more fragments of this frame follow.
    pub const FOLLOWS: u16 = 0x0080;
    /// Resume protocol requested (SETUP only, same bit as FOLLOWS).
    pub const RESUME_ENABLE: u16 = 0x0080;
    /// (R)espond: the receiver must answer this KEEPALIVE.
    pub const RESPOND: u16 = 0x0080;
    /// (L)ease: the client honours LEASE frames (SETUP only).
    pub const LEASE: u16 = 0x0040;
    /// (C)omplete: terminal flag on PAYLOAD and REQUEST_CHANNEL.
    pub const COMPLETE: u16 = 0x0040;
    /// (N)ext: the PAYLOAD frame carries data.
    pub const NEXT: u16 = 0x0020;
    /// Mask of the ten flag bits within the type-and-flags word.
    pub const MASK: u16 = 0x03FF;

    /// Check whether `flag` is set in `flags`.
    #[inline]
    #[must_use]
    pub const fn has(flags: u16, flag: u16) -> bool { flags & flag != 0 }
}

/// Number of bits the frame type occupies above the flags.
pub const FRAME_TYPE_SHIFT: u16 = 10;

/// Fixed header size: stream id plus type-and-flags word.
pub const HEADER_LEN: usize = 6;

/// Highest encodable stream id (31 bits).
pub const MAX_STREAM_ID: u32 = 0x7FFF_FFFF;

/// Highest encodable request-n (31 bits).
pub const MAX_REQUEST_N: u32 = 0x7FFF_FFFF;

/// Highest encodable metadata length (24 bits).
pub const MAX_METADATA_LEN: usize = 0x00FF_FFFF;

/// Protocol version advertised in SETUP and RESUME.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Version {
    /// Major version number.
    pub major: u16,
    /// Minor version number.
    pub minor: u16,
}

impl Version {
    /// Version 1.0, the only version this engine speaks.
    pub const V1: Self = Self { major: 1, minor: 0 };
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// A decoded protocol frame.
///
/// Variants mirror the wire frame types. Interval fields are carried as raw
/// wire values (milliseconds in `u32`); conversion to `Duration` happens at
/// the configuration boundary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// First frame of a connection; carries version and MIME negotiation.
    Setup {
        /// Protocol version the client speaks.
        version: Version,
        /// Keep-alive interval in milliseconds (31-bit, non-zero).
        keepalive_interval: u32,
        /// Maximum lifetime without a keep-alive, in milliseconds.
        max_lifetime: u32,
        /// Resume token when resumption is requested.
        resume_token: Option<Bytes>,
        /// MIME type for metadata payloads.
        metadata_mime_type: String,
        /// MIME type for data payloads.
        data_mime_type: String,
        /// Whether the client honours lease semantics.
        lease_requested: bool,
        /// Opaque setup payload.
        payload: Payload,
    },
    /// Server-granted request quota.
    Lease {
        /// Validity of the lease in milliseconds (31-bit).
        ttl: u32,
        /// Number of requests the lease permits (31-bit).
        number_of_requests: u32,
        /// Optional lease metadata, carried as the frame remainder.
        metadata: Option<Bytes>,
    },
    /// Liveness ping, optionally demanding a reply.
    KeepAlive {
        /// Whether the receiver must answer with a KEEPALIVE of its own.
        respond: bool,
        /// Resume position of the sender (63-bit).
        last_received_position: u64,
        /// Opaque data echoed verbatim in the reply.
        data: Bytes,
    },
    /// Single-response request.
    RequestResponse {
        /// Stream the request opens.
        stream_id: u32,
        /// More fragments of this request follow.
        follows: bool,
        /// Request payload.
        payload: Payload,
    },
    /// Request without a response.
    RequestFnf {
        /// Stream the request opens.
        stream_id: u32,
        /// More fragments of this request follow.
        follows: bool,
        /// Request payload.
        payload: Payload,
    },
    /// Request opening a responder-to-requester payload stream.
    RequestStream {
        /// Stream the request opens.
        stream_id: u32,
        /// More fragments of this request follow.
        follows: bool,
        /// Initial credit granted to the responder (31-bit, non-zero).
        initial_request_n: u32,
        /// Request payload.
        payload: Payload,
    },
    /// Request opening a bidirectional payload channel.
    RequestChannel {
        /// Stream the request opens.
        stream_id: u32,
        /// More fragments of this request follow.
        follows: bool,
        /// The requester will send no further payloads.
        complete: bool,
        /// Initial credit granted to the responder (31-bit, non-zero).
        initial_request_n: u32,
        /// First requester payload.
        payload: Payload,
    },
    /// Additional flow-control credit for a stream.
    RequestN {
        /// Stream the credit applies to.
        stream_id: u32,
        /// Credit granted (31-bit, non-zero).
        n: u32,
    },
    /// Requester-initiated stream cancellation.
    Cancel {
        /// Stream being cancelled.
        stream_id: u32,
    },
    /// Stream payload, fragment, or completion marker.
    Payload {
        /// Stream the payload belongs to.
        stream_id: u32,
        /// More fragments of this payload follow.
        follows: bool,
        /// The sending direction is complete.
        complete: bool,
        /// The frame carries payload data.
        next: bool,
        /// Payload content; meaningful only when `next` or `follows` is set.
        payload: Payload,
    },
    /// Stream-scoped or connection-scoped error.
    Error {
        /// Stream the error applies to; zero terminates the connection.
        stream_id: u32,
        /// Registry error code.
        code: ErrorCode,
        /// UTF-8 diagnostic data.
        data: Bytes,
    },
    /// Connection-level metadata, outside any stream.
    MetadataPush {
        /// Metadata bytes, carried as the frame remainder.
        metadata: Bytes,
    },
    /// Client request to resume a prior connection.
    Resume {
        /// Protocol version the client speaks.
        version: Version,
        /// Token identifying the session to resume.
        resume_token: Bytes,
        /// Last server position the client received.
        last_received_server_position: u64,
        /// Earliest client position still available for retransmission.
        first_available_client_position: u64,
    },
    /// Server acknowledgement of a resumption.
    ResumeOk {
        /// Last client position the server received.
        last_received_client_position: u64,
    },
    /// Extension frame with a negotiated extended type.
    Ext {
        /// Stream the extension applies to; zero for connection scope.
        stream_id: u32,
        /// Extended type identifier (31-bit).
        extended_type: u32,
        /// Whether the frame may be dropped when not understood.
        can_ignore: bool,
        /// Extension payload.
        payload: Payload,
    },
    /// A frame of unregistered type that carried the IGNORE flag.
    ///
    /// Produced by the decoder instead of an error; never encoded.
    Unknown {
        /// Stream id from the header.
        stream_id: u32,
        /// Raw six-bit type value.
        frame_type: u8,
        /// Raw flag bits.
        flags: u16,
    },
}

impl Frame {
    /// Stream id the frame targets; zero for connection-level frames.
    #[must_use]
    pub fn stream_id(&self) -> u32 {
        match self {
            Self::Setup { .. }
            | Self::Lease { .. }
            | Self::KeepAlive { .. }
            | Self::MetadataPush { .. }
            | Self::Resume { .. }
            | Self::ResumeOk { .. } => 0,
            Self::RequestResponse { stream_id, .. }
            | Self::RequestFnf { stream_id, .. }
            | Self::RequestStream { stream_id, .. }
            | Self::RequestChannel { stream_id, .. }
            | Self::RequestN { stream_id, .. }
            | Self::Cancel { stream_id }
            | Self::Payload { stream_id, .. }
            | Self::Error { stream_id, .. }
            | Self::Ext { stream_id, .. }
            | Self::Unknown { stream_id, .. } => *stream_id,
        }
    }

    /// Human-readable type name for logging and diagnostics.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Setup { .. } => "SETUP",
            Self::Lease { .. } => "LEASE",
            Self::KeepAlive { .. } => "KEEPALIVE",
            Self::RequestResponse { .. } => "REQUEST_RESPONSE",
            Self::RequestFnf { .. } => "REQUEST_FNF",
            Self::RequestStream { .. } => "REQUEST_STREAM",
            Self::RequestChannel { .. } => "REQUEST_CHANNEL",
            Self::RequestN { .. } => "REQUEST_N",
            Self::Cancel { .. } => "CANCEL",
            Self::Payload { .. } => "PAYLOAD",
            Self::Error { .. } => "ERROR",
            Self::MetadataPush { .. } => "METADATA_PUSH",
            Self::Resume { .. } => "RESUME",
            Self::ResumeOk { .. } => "RESUME_OK",
            Self::Ext { .. } => "EXT",
            Self::Unknown { .. } => "UNKNOWN",
        }
    }

    /// Whether the frame opens a fragment chain.
    #[must_use]
    pub fn follows(&self) -> bool {
        match self {
            Self::RequestResponse { follows, .. }
            | Self::RequestFnf { follows, .. }
            | Self::RequestStream { follows, .. }
            | Self::RequestChannel { follows, .. }
            | Self::Payload { follows, .. } => *follows,
            _ => false,
        }
    }

    /// A terminal PAYLOAD frame carrying one item.
    #[must_use]
    pub fn payload_next(stream_id: u32, payload: Payload, complete: bool) -> Self {
        Self::Payload {
            stream_id,
            follows: false,
            complete,
            next: true,
            payload,
        }
    }

    /// A bare completion PAYLOAD frame with no data.
    #[must_use]
    pub fn payload_complete(stream_id: u32) -> Self {
        Self::Payload {
            stream_id,
            follows: false,
            complete: true,
            next: false,
            payload: Payload::empty(),
        }
    }

    /// An ERROR frame with a UTF-8 diagnostic.
    #[must_use]
    pub fn error(stream_id: u32, code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            stream_id,
            code,
            data: Bytes::from(message.into()),
        }
    }
}
