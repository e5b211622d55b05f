//! Error taxonomy for the protocol engine.
//!
//! Errors are split by scope: [`ProtocolError`] covers wire-level violations
//! that are fatal to the connection, [`TransportError`] covers byte-channel
//! failures, and [`RSocketError`] is the application-facing union surfaced by
//! requester and responder APIs. Wire error codes live in [`ErrorCode`].

use std::{fmt, io};

use thiserror::Error;

/// Wire-level error code carried by ERROR frames.
///
/// The numbering follows the RSocket error code registry. Codes below
/// `0x0200` are connection-scoped; codes from `0x0201` upward are
/// stream-scoped, with the range from [`ErrorCode::APPLICATION_RESERVED_MIN`]
/// reserved for application-defined errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ErrorCode(pub u32);

impl ErrorCode {
    /// The SETUP frame is invalid (malformed or semantically wrong).
    pub const INVALID_SETUP: Self = Self(0x0000_0001);
    /// The server does not support the requested SETUP parameters.
    pub const UNSUPPORTED_SETUP: Self = Self(0x0000_0002);
    /// The server rejected the SETUP for application reasons.
    pub const REJECTED_SETUP: Self = Self(0x0000_0003);
    /// The server rejected a resumption attempt.
    pub const REJECTED_RESUME: Self = Self(0x0000_0004);
    /// The connection is being terminated because of an internal error.
    pub const CONNECTION_ERROR: Self = Self(0x0000_0101);
    /// The connection is being closed gracefully.
    pub const CONNECTION_CLOSE: Self = Self(0x0000_0102);
    /// The request failed inside the application handler.
    pub const APPLICATION_ERROR: Self = Self(0x0000_0201);
    /// The responder declined the request (no handler, lease exhausted).
    pub const REJECTED: Self = Self(0x0000_0202);
    /// The responder observed a cancellation for the request.
    pub const CANCELED: Self = Self(0x0000_0203);
    /// The request was malformed at the protocol level for its stream.
    pub const INVALID: Self = Self(0x0000_0204);
    /// First code of the application-reserved range.
    pub const APPLICATION_RESERVED_MIN: Self = Self(0x0000_0301);

    /// Whether this code may appear on an ERROR frame with stream id zero.
    #[must_use]
    pub const fn permitted_on_connection(self) -> bool {
        matches!(self.0, 0x0001..=0x0004 | 0x0101 | 0x0102)
    }

    /// Whether this code may appear on an ERROR frame with a non-zero
    /// stream id.
    #[must_use]
    pub const fn permitted_on_stream(self) -> bool {
        matches!(self.0, 0x0201..=0x0204) || self.0 >= Self::APPLICATION_RESERVED_MIN.0
    }

    /// Registry name of the code, or `"RESERVED"` for unassigned values.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self.0 {
            0x0001 => "INVALID_SETUP",
            0x0002 => "UNSUPPORTED_SETUP",
            0x0003 => "REJECTED_SETUP",
            0x0004 => "REJECTED_RESUME",
            0x0101 => "CONNECTION_ERROR",
            0x0102 => "CONNECTION_CLOSE",
            0x0201 => "APPLICATION_ERROR",
            0x0202 => "REJECTED",
            0x0203 => "CANCELED",
            0x0204 => "INVALID",
            _ => "RESERVED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:#010x})", self.name(), self.0)
    }
}

/// A violation of the wire protocol.
///
/// Carries the offending stream id (zero for connection-level frames) so the
/// connection driver can attribute the failure. All protocol errors are
/// connection-fatal.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("protocol violation on stream {stream_id}: {kind}")]
pub struct ProtocolError {
    /// Stream the offending frame targeted; zero for connection frames.
    pub stream_id: u32,
    /// What went wrong.
    pub kind: ProtocolErrorKind,
}

impl ProtocolError {
    /// Violation attributed to the connection itself.
    #[must_use]
    pub const fn connection(kind: ProtocolErrorKind) -> Self { Self { stream_id: 0, kind } }

    /// Violation attributed to a specific stream.
    #[must_use]
    pub const fn stream(stream_id: u32, kind: ProtocolErrorKind) -> Self {
        Self { stream_id, kind }
    }
}

/// Specific wire-protocol violations detected by the codec and dispatcher.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProtocolErrorKind {
    /// The frame ended before a required field.
    #[error("frame truncated: need {need} more bytes, have {have}")]
    Truncated {
        /// Bytes required to finish the current field.
        need: usize,
        /// Bytes remaining in the frame.
        have: usize,
    },

    /// A reserved bit was set in the named field.
    #[error("reserved bit set in {field}")]
    ReservedBit {
        /// Field carrying the reserved bit.
        field: &'static str,
    },

    /// A flag bit outside the frame type's defined set was present.
    #[error("undefined flag bits {flags:#06x} for {frame} frame")]
    UndefinedFlags {
        /// The offending flag bits.
        flags: u16,
        /// Frame type name.
        frame: &'static str,
    },

    /// The frame type is not in the registry and the IGNORE flag was unset.
    #[error("unknown frame type {type_id:#04x} without IGNORE flag")]
    UnknownFrameType {
        /// Raw six-bit frame type value.
        type_id: u8,
    },

    /// REQUEST_N or an initial request-n of zero.
    #[error("request-n of zero")]
    ZeroRequestN,

    /// A stream frame arrived with stream id zero.
    #[error("{frame} frame requires a non-zero stream id")]
    MissingStreamId {
        /// Frame type name.
        frame: &'static str,
    },

    /// A connection frame arrived with a non-zero stream id.
    #[error("{frame} frame requires stream id zero")]
    UnexpectedStreamId {
        /// Frame type name.
        frame: &'static str,
    },

    /// Metadata longer than the 24-bit length field allows.
    #[error("metadata of {len} bytes exceeds the 24-bit limit")]
    MetadataTooLong {
        /// Attempted metadata length.
        len: usize,
    },

    /// The declared metadata length overruns the frame.
    #[error("metadata length {declared} overruns frame with {remaining} bytes left")]
    MetadataOverrun {
        /// Declared 24-bit metadata length.
        declared: usize,
        /// Bytes actually remaining in the frame.
        remaining: usize,
    },

    /// An ERROR frame carried a code outside the range its scope permits.
    #[error("error code {code:#010x} not permitted in this scope")]
    ErrorCodeOutOfRange {
        /// Raw error code value.
        code: u32,
    },

    /// A PAYLOAD frame with none of NEXT, COMPLETE, or FOLLOWS.
    #[error("PAYLOAD frame carries neither NEXT, COMPLETE, nor FOLLOWS")]
    EmptyPayloadFlags,

    /// A SETUP field failed validation.
    #[error("invalid {field} in SETUP")]
    InvalidSetup {
        /// Name of the failing field.
        field: &'static str,
    },

    /// A frame of a different type interrupted an open fragment chain.
    #[error("{frame} frame interleaved inside a fragment chain")]
    InterruptedFragmentChain {
        /// Type name of the interloping frame.
        frame: &'static str,
    },

    /// A fragment chain grew past the configured reassembly ceiling.
    #[error("fragment chain exceeds reassembly limit of {limit} bytes")]
    ReassemblyOverflow {
        /// Configured ceiling in bytes.
        limit: usize,
    },

    /// An encoded frame exceeded the negotiated maximum size.
    #[error("encoded frame of {size} bytes exceeds maximum {max}")]
    FrameTooLarge {
        /// Encoded frame size.
        size: usize,
        /// Negotiated maximum.
        max: usize,
    },

    /// The peer produced a payload without outstanding credit.
    #[error("payload received without outstanding request-n credit")]
    CreditViolation,

    /// A SETUP or RESUME frame arrived after the connection was established.
    #[error("{frame} frame after connection establishment")]
    UnexpectedHandshakeFrame {
        /// Frame type name.
        frame: &'static str,
    },
}

/// Failures of the underlying byte transport.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransportError {
    /// The transport failed at the I/O layer.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The peer closed the transport.
    #[error("transport closed by peer")]
    Closed,

    /// A frame packet exceeded what the transport can carry.
    #[error("frame of {size} bytes exceeds transport maximum {max}")]
    Oversized {
        /// Offered packet size.
        size: usize,
        /// Transport maximum.
        max: usize,
    },
}

/// Application-facing error union surfaced by requester and responder APIs.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RSocketError {
    /// The peer violated the wire protocol.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The server refused the connection during SETUP negotiation.
    #[error("setup rejected: {code}: {message}")]
    Setup {
        /// Wire error code (INVALID_SETUP, UNSUPPORTED_SETUP, REJECTED_SETUP).
        code: ErrorCode,
        /// Diagnostic supplied by the rejecting side.
        message: String,
    },

    /// A stream-scoped error, local or received from the peer.
    #[error("{code}: {message}")]
    Stream {
        /// Wire error code (APPLICATION_ERROR, REJECTED, CANCELED, INVALID).
        code: ErrorCode,
        /// Diagnostic carried in the ERROR frame data.
        message: String,
    },

    /// The byte transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The connection terminated; all live streams observe this error.
    #[error("connection closed: {code}: {message}")]
    ConnectionClosed {
        /// Code the connection closed with.
        code: ErrorCode,
        /// Close diagnostic.
        message: String,
    },

    /// The request was cancelled before completion.
    #[error("request cancelled")]
    Cancelled,
}

impl RSocketError {
    /// Stream-scoped APPLICATION_ERROR with the given diagnostic.
    #[must_use]
    pub fn application(message: impl Into<String>) -> Self {
        Self::Stream {
            code: ErrorCode::APPLICATION_ERROR,
            message: message.into(),
        }
    }

    /// Stream-scoped REJECTED with the given diagnostic.
    #[must_use]
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Stream {
            code: ErrorCode::REJECTED,
            message: message.into(),
        }
    }

    /// Stream-scoped INVALID with the given diagnostic.
    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Stream {
            code: ErrorCode::INVALID,
            message: message.into(),
        }
    }

    /// The wire code this error maps to when reflected in an ERROR frame.
    #[must_use]
    pub fn wire_code(&self) -> ErrorCode {
        match self {
            Self::Protocol(_) | Self::Transport(_) => ErrorCode::CONNECTION_ERROR,
            Self::Setup { code, .. }
            | Self::Stream { code, .. }
            | Self::ConnectionClosed { code, .. } => *code,
            Self::Cancelled => ErrorCode::CANCELED,
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T, E = RSocketError> = std::result::Result<T, E>;
