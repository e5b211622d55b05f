//! Bit-exact frame encoding and decoding.
//!
//! The codec operates on whole frame packets: the transport strips or adds
//! any outer length prefix before the bytes reach [`Frame::decode`] or after
//! [`Frame::encode`] produces them.
//!
//! Frames that can carry both metadata and data (SETUP, the REQUEST family,
//! PAYLOAD, EXT) prefix the metadata block with a 24-bit big-endian length.
//! Metadata-only frames (LEASE, METADATA_PUSH) carry metadata as the frame
//! remainder without a prefix.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{
    FRAME_TYPE_SHIFT,
    Frame,
    HEADER_LEN,
    MAX_METADATA_LEN,
    MAX_REQUEST_N,
    MAX_STREAM_ID,
    Version,
    flags,
    frame_type,
};
use crate::{
    error::{ErrorCode, ProtocolError, ProtocolErrorKind},
    payload::Payload,
};

/// Flag bits defined for each frame type; anything else is a violation.
const fn allowed_flags(type_id: u8) -> u16 {
    match type_id {
        frame_type::SETUP => {
            flags::IGNORE | flags::METADATA | flags::RESUME_ENABLE | flags::LEASE
        }
        frame_type::LEASE | frame_type::METADATA_PUSH | frame_type::EXT => {
            flags::IGNORE | flags::METADATA
        }
        frame_type::KEEPALIVE => flags::IGNORE | flags::RESPOND,
        frame_type::REQUEST_RESPONSE | frame_type::REQUEST_FNF | frame_type::REQUEST_STREAM => {
            flags::IGNORE | flags::METADATA | flags::FOLLOWS
        }
        frame_type::REQUEST_CHANNEL => {
            flags::IGNORE | flags::METADATA | flags::FOLLOWS | flags::COMPLETE
        }
        frame_type::PAYLOAD => {
            flags::IGNORE | flags::METADATA | flags::FOLLOWS | flags::COMPLETE | flags::NEXT
        }
        _ => flags::IGNORE,
    }
}

const fn type_label(type_id: u8) -> &'static str {
    match type_id {
        frame_type::SETUP => "SETUP",
        frame_type::LEASE => "LEASE",
        frame_type::KEEPALIVE => "KEEPALIVE",
        frame_type::REQUEST_RESPONSE => "REQUEST_RESPONSE",
        frame_type::REQUEST_FNF => "REQUEST_FNF",
        frame_type::REQUEST_STREAM => "REQUEST_STREAM",
        frame_type::REQUEST_CHANNEL => "REQUEST_CHANNEL",
        frame_type::REQUEST_N => "REQUEST_N",
        frame_type::CANCEL => "CANCEL",
        frame_type::PAYLOAD => "PAYLOAD",
        frame_type::ERROR => "ERROR",
        frame_type::METADATA_PUSH => "METADATA_PUSH",
        frame_type::RESUME => "RESUME",
        frame_type::RESUME_OK => "RESUME_OK",
        frame_type::EXT => "EXT",
        _ => "UNKNOWN",
    }
}

fn need(buf: &Bytes, n: usize, stream_id: u32) -> Result<(), ProtocolError> {
    if buf.len() < n {
        return Err(ProtocolError::stream(
            stream_id,
            ProtocolErrorKind::Truncated {
                need: n - buf.len(),
                have: buf.len(),
            },
        ));
    }
    Ok(())
}

/// Size of a metadata block including its 24-bit length prefix.
fn metadata_block_len(metadata: Option<&Bytes>) -> usize {
    metadata.map_or(0, |m| 3 + m.len())
}

fn put_metadata_block(
    dst: &mut BytesMut,
    stream_id: u32,
    metadata: Option<&Bytes>,
) -> Result<(), ProtocolError> {
    if let Some(metadata) = metadata {
        if metadata.len() > MAX_METADATA_LEN {
            return Err(ProtocolError::stream(
                stream_id,
                ProtocolErrorKind::MetadataTooLong {
                    len: metadata.len(),
                },
            ));
        }
        dst.put_uint(metadata.len() as u64, 3);
        dst.put_slice(metadata);
    }
    Ok(())
}

fn take_metadata_block(
    buf: &mut Bytes,
    stream_id: u32,
    frame_flags: u16,
) -> Result<Option<Bytes>, ProtocolError> {
    if !flags::has(frame_flags, flags::METADATA) {
        return Ok(None);
    }
    need(buf, 3, stream_id)?;
    let declared = buf.get_uint(3) as usize;
    if declared > buf.len() {
        return Err(ProtocolError::stream(
            stream_id,
            ProtocolErrorKind::MetadataOverrun {
                declared,
                remaining: buf.len(),
            },
        ));
    }
    Ok(Some(buf.split_to(declared)))
}

/// Read a metadata block then take the remainder as data.
fn take_payload(
    buf: &mut Bytes,
    stream_id: u32,
    frame_flags: u16,
) -> Result<Payload, ProtocolError> {
    let metadata = take_metadata_block(buf, stream_id, frame_flags)?;
    let data = std::mem::take(buf);
    Ok(Payload::from_parts(metadata, data))
}

fn take_request_n(buf: &mut Bytes, stream_id: u32) -> Result<u32, ProtocolError> {
    need(buf, 4, stream_id)?;
    let raw = buf.get_u32();
    if raw > MAX_REQUEST_N {
        return Err(ProtocolError::stream(
            stream_id,
            ProtocolErrorKind::ReservedBit { field: "request-n" },
        ));
    }
    if raw == 0 {
        return Err(ProtocolError::stream(
            stream_id,
            ProtocolErrorKind::ZeroRequestN,
        ));
    }
    Ok(raw)
}

fn take_position(buf: &mut Bytes, stream_id: u32, field: &'static str) -> Result<u64, ProtocolError> {
    need(buf, 8, stream_id)?;
    let raw = buf.get_u64();
    if raw & 0x8000_0000_0000_0000 != 0 {
        return Err(ProtocolError::stream(
            stream_id,
            ProtocolErrorKind::ReservedBit { field },
        ));
    }
    Ok(raw)
}

fn take_mime_type(buf: &mut Bytes, field: &'static str) -> Result<String, ProtocolError> {
    need(buf, 1, 0)?;
    let len = buf.get_u8() as usize;
    need(buf, len, 0)?;
    let raw = buf.split_to(len);
    let text = std::str::from_utf8(&raw)
        .map_err(|_| ProtocolError::connection(ProtocolErrorKind::InvalidSetup { field }))?;
    if text.is_empty() || !text.is_ascii() {
        return Err(ProtocolError::connection(ProtocolErrorKind::InvalidSetup {
            field,
        }));
    }
    Ok(text.to_owned())
}

fn require_connection_scope(
    stream_id: u32,
    type_id: u8,
) -> Result<(), ProtocolError> {
    if stream_id != 0 {
        return Err(ProtocolError::stream(
            stream_id,
            ProtocolErrorKind::UnexpectedStreamId {
                frame: type_label(type_id),
            },
        ));
    }
    Ok(())
}

fn require_stream_scope(stream_id: u32, type_id: u8) -> Result<(), ProtocolError> {
    if stream_id == 0 {
        return Err(ProtocolError::connection(ProtocolErrorKind::MissingStreamId {
            frame: type_label(type_id),
        }));
    }
    Ok(())
}

impl Frame {
    /// Encode the frame into a fresh byte packet.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] for frames that cannot be represented on
    /// the wire: oversized metadata, out-of-range request-n, or the
    /// [`Frame::Unknown`] placeholder.
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let mut dst = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut dst)?;
        Ok(dst.freeze())
    }

    /// Encode the frame, appending the bytes to `dst`.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] under the same conditions as
    /// [`Frame::encode`].
    pub fn encode_into(&self, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        let stream_id = self.stream_id();
        if stream_id > MAX_STREAM_ID {
            return Err(ProtocolError::stream(
                stream_id,
                ProtocolErrorKind::ReservedBit { field: "stream id" },
            ));
        }
        dst.reserve(self.encoded_len());
        match self {
            Self::Setup {
                version,
                keepalive_interval,
                max_lifetime,
                resume_token,
                metadata_mime_type,
                data_mime_type,
                lease_requested,
                payload,
            } => {
                let mut frame_flags = 0u16;
                if payload.metadata().is_some() {
                    frame_flags |= flags::METADATA;
                }
                if resume_token.is_some() {
                    frame_flags |= flags::RESUME_ENABLE;
                }
                if *lease_requested {
                    frame_flags |= flags::LEASE;
                }
                put_header(dst, 0, frame_type::SETUP, frame_flags);
                dst.put_u16(version.major);
                dst.put_u16(version.minor);
                dst.put_u32(*keepalive_interval);
                dst.put_u32(*max_lifetime);
                if let Some(token) = resume_token {
                    let token_len = u16::try_from(token.len()).map_err(|_| {
                        ProtocolError::connection(ProtocolErrorKind::InvalidSetup {
                            field: "resume token",
                        })
                    })?;
                    dst.put_u16(token_len);
                    dst.put_slice(token);
                }
                for (mime, field) in [
                    (metadata_mime_type, "metadata MIME type"),
                    (data_mime_type, "data MIME type"),
                ] {
                    let mime_len = u8::try_from(mime.len()).map_err(|_| {
                        ProtocolError::connection(ProtocolErrorKind::InvalidSetup { field })
                    })?;
                    dst.put_u8(mime_len);
                    dst.put_slice(mime.as_bytes());
                }
                put_metadata_block(dst, 0, payload.metadata())?;
                dst.put_slice(payload.data());
            }
            Self::Lease {
                ttl,
                number_of_requests,
                metadata,
            } => {
                let mut frame_flags = 0u16;
                if metadata.is_some() {
                    frame_flags |= flags::METADATA;
                }
                put_header(dst, 0, frame_type::LEASE, frame_flags);
                dst.put_u32(*ttl);
                dst.put_u32(*number_of_requests);
                if let Some(metadata) = metadata {
                    dst.put_slice(metadata);
                }
            }
            Self::KeepAlive {
                respond,
                last_received_position,
                data,
            } => {
                let frame_flags = if *respond { flags::RESPOND } else { 0 };
                put_header(dst, 0, frame_type::KEEPALIVE, frame_flags);
                dst.put_u64(*last_received_position);
                dst.put_slice(data);
            }
            Self::RequestResponse {
                stream_id,
                follows,
                payload,
            } => {
                encode_request(dst, frame_type::REQUEST_RESPONSE, *stream_id, *follows, None, false, payload)?;
            }
            Self::RequestFnf {
                stream_id,
                follows,
                payload,
            } => {
                encode_request(dst, frame_type::REQUEST_FNF, *stream_id, *follows, None, false, payload)?;
            }
            Self::RequestStream {
                stream_id,
                follows,
                initial_request_n,
                payload,
            } => {
                encode_request(
                    dst,
                    frame_type::REQUEST_STREAM,
                    *stream_id,
                    *follows,
                    Some(*initial_request_n),
                    false,
                    payload,
                )?;
            }
            Self::RequestChannel {
                stream_id,
                follows,
                complete,
                initial_request_n,
                payload,
            } => {
                encode_request(
                    dst,
                    frame_type::REQUEST_CHANNEL,
                    *stream_id,
                    *follows,
                    Some(*initial_request_n),
                    *complete,
                    payload,
                )?;
            }
            Self::RequestN { stream_id, n } => {
                if *n == 0 {
                    return Err(ProtocolError::stream(
                        *stream_id,
                        ProtocolErrorKind::ZeroRequestN,
                    ));
                }
                if *n > MAX_REQUEST_N {
                    return Err(ProtocolError::stream(
                        *stream_id,
                        ProtocolErrorKind::ReservedBit { field: "request-n" },
                    ));
                }
                put_header(dst, *stream_id, frame_type::REQUEST_N, 0);
                dst.put_u32(*n);
            }
            Self::Cancel { stream_id } => {
                put_header(dst, *stream_id, frame_type::CANCEL, 0);
            }
            Self::Payload {
                stream_id,
                follows,
                complete,
                next,
                payload,
            } => {
                let mut frame_flags = 0u16;
                if payload.metadata().is_some() {
                    frame_flags |= flags::METADATA;
                }
                if *follows {
                    frame_flags |= flags::FOLLOWS;
                }
                if *complete {
                    frame_flags |= flags::COMPLETE;
                }
                if *next {
                    frame_flags |= flags::NEXT;
                }
                if frame_flags & (flags::FOLLOWS | flags::COMPLETE | flags::NEXT) == 0 {
                    return Err(ProtocolError::stream(
                        *stream_id,
                        ProtocolErrorKind::EmptyPayloadFlags,
                    ));
                }
                put_header(dst, *stream_id, frame_type::PAYLOAD, frame_flags);
                put_metadata_block(dst, *stream_id, payload.metadata())?;
                dst.put_slice(payload.data());
            }
            Self::Error {
                stream_id,
                code,
                data,
            } => {
                put_header(dst, *stream_id, frame_type::ERROR, 0);
                dst.put_u32(code.0);
                dst.put_slice(data);
            }
            Self::MetadataPush { metadata } => {
                put_header(dst, 0, frame_type::METADATA_PUSH, flags::METADATA);
                dst.put_slice(metadata);
            }
            Self::Resume {
                version,
                resume_token,
                last_received_server_position,
                first_available_client_position,
            } => {
                put_header(dst, 0, frame_type::RESUME, 0);
                dst.put_u16(version.major);
                dst.put_u16(version.minor);
                let token_len = u16::try_from(resume_token.len()).map_err(|_| {
                    ProtocolError::connection(ProtocolErrorKind::InvalidSetup {
                        field: "resume token",
                    })
                })?;
                dst.put_u16(token_len);
                dst.put_slice(resume_token);
                dst.put_u64(*last_received_server_position);
                dst.put_u64(*first_available_client_position);
            }
            Self::ResumeOk {
                last_received_client_position,
            } => {
                put_header(dst, 0, frame_type::RESUME_OK, 0);
                dst.put_u64(*last_received_client_position);
            }
            Self::Ext {
                stream_id,
                extended_type,
                can_ignore,
                payload,
            } => {
                let mut frame_flags = 0u16;
                if payload.metadata().is_some() {
                    frame_flags |= flags::METADATA;
                }
                if *can_ignore {
                    frame_flags |= flags::IGNORE;
                }
                put_header(dst, *stream_id, frame_type::EXT, frame_flags);
                dst.put_u32(*extended_type);
                put_metadata_block(dst, *stream_id, payload.metadata())?;
                dst.put_slice(payload.data());
            }
            Self::Unknown {
                stream_id,
                frame_type: type_id,
                ..
            } => {
                return Err(ProtocolError::stream(
                    *stream_id,
                    ProtocolErrorKind::UnknownFrameType { type_id: *type_id },
                ));
            }
        }
        Ok(())
    }

    /// Size of the encoded frame in bytes, excluding any transport prefix.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN
            + match self {
                Self::Setup {
                    resume_token,
                    metadata_mime_type,
                    data_mime_type,
                    payload,
                    ..
                } => {
                    12 + resume_token.as_ref().map_or(0, |t| 2 + t.len())
                        + 1
                        + metadata_mime_type.len()
                        + 1
                        + data_mime_type.len()
                        + metadata_block_len(payload.metadata())
                        + payload.data().len()
                }
                Self::Lease { metadata, .. } => 8 + metadata.as_ref().map_or(0, Bytes::len),
                Self::KeepAlive { data, .. } => 8 + data.len(),
                Self::RequestResponse { payload, .. } | Self::RequestFnf { payload, .. } => {
                    metadata_block_len(payload.metadata()) + payload.data().len()
                }
                Self::RequestStream { payload, .. } | Self::RequestChannel { payload, .. } => {
                    4 + metadata_block_len(payload.metadata()) + payload.data().len()
                }
                Self::RequestN { .. } => 4,
                Self::Cancel { .. } => 0,
                Self::Payload { payload, .. } => {
                    metadata_block_len(payload.metadata()) + payload.data().len()
                }
                Self::Error { data, .. } => 4 + data.len(),
                Self::MetadataPush { metadata } => metadata.len(),
                Self::Resume { resume_token, .. } => 4 + 2 + resume_token.len() + 16,
                Self::ResumeOk { .. } => 8,
                Self::Ext { payload, .. } => {
                    4 + metadata_block_len(payload.metadata()) + payload.data().len()
                }
                Self::Unknown { .. } => 0,
            }
    }

    /// Decode one frame from a whole packet.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] carrying the offending stream id for any
    /// malformed input: truncation, reserved bits, undefined flags, invalid
    /// field values, or an unknown frame type without the IGNORE flag.
    pub fn decode(mut buf: Bytes) -> Result<Self, ProtocolError> {
        if buf.len() < HEADER_LEN {
            return Err(ProtocolError::connection(ProtocolErrorKind::Truncated {
                need: HEADER_LEN - buf.len(),
                have: buf.len(),
            }));
        }
        let raw_id = buf.get_u32();
        if raw_id & 0x8000_0000 != 0 {
            return Err(ProtocolError::connection(ProtocolErrorKind::ReservedBit {
                field: "stream id",
            }));
        }
        let stream_id = raw_id;
        let word = buf.get_u16();
        let type_id = (word >> FRAME_TYPE_SHIFT) as u8;
        let frame_flags = word & flags::MASK;

        if !matches!(
            type_id,
            frame_type::SETUP..=frame_type::RESUME_OK | frame_type::EXT
        ) {
            if flags::has(frame_flags, flags::IGNORE) {
                return Ok(Self::Unknown {
                    stream_id,
                    frame_type: type_id,
                    flags: frame_flags,
                });
            }
            return Err(ProtocolError::stream(
                stream_id,
                ProtocolErrorKind::UnknownFrameType { type_id },
            ));
        }

        let undefined = frame_flags & !allowed_flags(type_id);
        if undefined != 0 {
            return Err(ProtocolError::stream(
                stream_id,
                ProtocolErrorKind::UndefinedFlags {
                    flags: undefined,
                    frame: type_label(type_id),
                },
            ));
        }

        match type_id {
            frame_type::SETUP => {
                require_connection_scope(stream_id, type_id)?;
                decode_setup(&mut buf, frame_flags)
            }
            frame_type::LEASE => {
                require_connection_scope(stream_id, type_id)?;
                need(&buf, 8, 0)?;
                let ttl = buf.get_u32();
                let number_of_requests = buf.get_u32();
                if ttl > MAX_REQUEST_N || number_of_requests > MAX_REQUEST_N {
                    return Err(ProtocolError::connection(ProtocolErrorKind::ReservedBit {
                        field: "lease counters",
                    }));
                }
                let metadata =
                    flags::has(frame_flags, flags::METADATA).then(|| std::mem::take(&mut buf));
                Ok(Self::Lease {
                    ttl,
                    number_of_requests,
                    metadata,
                })
            }
            frame_type::KEEPALIVE => {
                require_connection_scope(stream_id, type_id)?;
                let last_received_position = take_position(&mut buf, 0, "keep-alive position")?;
                Ok(Self::KeepAlive {
                    respond: flags::has(frame_flags, flags::RESPOND),
                    last_received_position,
                    data: std::mem::take(&mut buf),
                })
            }
            frame_type::REQUEST_RESPONSE => {
                require_stream_scope(stream_id, type_id)?;
                let payload = take_payload(&mut buf, stream_id, frame_flags)?;
                Ok(Self::RequestResponse {
                    stream_id,
                    follows: flags::has(frame_flags, flags::FOLLOWS),
                    payload,
                })
            }
            frame_type::REQUEST_FNF => {
                require_stream_scope(stream_id, type_id)?;
                let payload = take_payload(&mut buf, stream_id, frame_flags)?;
                Ok(Self::RequestFnf {
                    stream_id,
                    follows: flags::has(frame_flags, flags::FOLLOWS),
                    payload,
                })
            }
            frame_type::REQUEST_STREAM => {
                require_stream_scope(stream_id, type_id)?;
                let initial_request_n = take_request_n(&mut buf, stream_id)?;
                let payload = take_payload(&mut buf, stream_id, frame_flags)?;
                Ok(Self::RequestStream {
                    stream_id,
                    follows: flags::has(frame_flags, flags::FOLLOWS),
                    initial_request_n,
                    payload,
                })
            }
            frame_type::REQUEST_CHANNEL => {
                require_stream_scope(stream_id, type_id)?;
                let initial_request_n = take_request_n(&mut buf, stream_id)?;
                let payload = take_payload(&mut buf, stream_id, frame_flags)?;
                Ok(Self::RequestChannel {
                    stream_id,
                    follows: flags::has(frame_flags, flags::FOLLOWS),
                    complete: flags::has(frame_flags, flags::COMPLETE),
                    initial_request_n,
                    payload,
                })
            }
            frame_type::REQUEST_N => {
                require_stream_scope(stream_id, type_id)?;
                let n = take_request_n(&mut buf, stream_id)?;
                Ok(Self::RequestN { stream_id, n })
            }
            frame_type::CANCEL => {
                require_stream_scope(stream_id, type_id)?;
                Ok(Self::Cancel { stream_id })
            }
            frame_type::PAYLOAD => {
                require_stream_scope(stream_id, type_id)?;
                if frame_flags & (flags::FOLLOWS | flags::COMPLETE | flags::NEXT) == 0 {
                    return Err(ProtocolError::stream(
                        stream_id,
                        ProtocolErrorKind::EmptyPayloadFlags,
                    ));
                }
                let payload = take_payload(&mut buf, stream_id, frame_flags)?;
                Ok(Self::Payload {
                    stream_id,
                    follows: flags::has(frame_flags, flags::FOLLOWS),
                    complete: flags::has(frame_flags, flags::COMPLETE),
                    next: flags::has(frame_flags, flags::NEXT),
                    payload,
                })
            }
            frame_type::ERROR => {
                need(&buf, 4, stream_id)?;
                let raw_code = buf.get_u32();
                let code = ErrorCode(raw_code);
                let permitted = if stream_id == 0 {
                    code.permitted_on_connection()
                } else {
                    code.permitted_on_stream()
                };
                if !permitted {
                    return Err(ProtocolError::stream(
                        stream_id,
                        ProtocolErrorKind::ErrorCodeOutOfRange { code: raw_code },
                    ));
                }
                Ok(Self::Error {
                    stream_id,
                    code,
                    data: std::mem::take(&mut buf),
                })
            }
            frame_type::METADATA_PUSH => {
                require_connection_scope(stream_id, type_id)?;
                Ok(Self::MetadataPush {
                    metadata: std::mem::take(&mut buf),
                })
            }
            frame_type::RESUME => {
                require_connection_scope(stream_id, type_id)?;
                need(&buf, 4, 0)?;
                let version = Version {
                    major: buf.get_u16(),
                    minor: buf.get_u16(),
                };
                need(&buf, 2, 0)?;
                let token_len = buf.get_u16() as usize;
                need(&buf, token_len, 0)?;
                let resume_token = buf.split_to(token_len);
                let last_received_server_position =
                    take_position(&mut buf, 0, "resume server position")?;
                let first_available_client_position =
                    take_position(&mut buf, 0, "resume client position")?;
                Ok(Self::Resume {
                    version,
                    resume_token,
                    last_received_server_position,
                    first_available_client_position,
                })
            }
            frame_type::RESUME_OK => {
                require_connection_scope(stream_id, type_id)?;
                let last_received_client_position =
                    take_position(&mut buf, 0, "resume client position")?;
                Ok(Self::ResumeOk {
                    last_received_client_position,
                })
            }
            frame_type::EXT => {
                need(&buf, 4, stream_id)?;
                let raw_type = buf.get_u32();
                if raw_type & 0x8000_0000 != 0 {
                    return Err(ProtocolError::stream(
                        stream_id,
                        ProtocolErrorKind::ReservedBit {
                            field: "extended type",
                        },
                    ));
                }
                let payload = take_payload(&mut buf, stream_id, frame_flags)?;
                Ok(Self::Ext {
                    stream_id,
                    extended_type: raw_type,
                    can_ignore: flags::has(frame_flags, flags::IGNORE),
                    payload,
                })
            }
            _ => unreachable!("type id filtered above"),
        }
    }
}

fn put_header(dst: &mut BytesMut, stream_id: u32, type_id: u8, frame_flags: u16) {
    dst.put_u32(stream_id);
    dst.put_u16((u16::from(type_id) << FRAME_TYPE_SHIFT) | (frame_flags & flags::MASK));
}

fn encode_request(
    dst: &mut BytesMut,
    type_id: u8,
    stream_id: u32,
    follows: bool,
    initial_request_n: Option<u32>,
    complete: bool,
    payload: &Payload,
) -> Result<(), ProtocolError> {
    if let Some(n) = initial_request_n {
        if n == 0 {
            return Err(ProtocolError::stream(
                stream_id,
                ProtocolErrorKind::ZeroRequestN,
            ));
        }
        if n > MAX_REQUEST_N {
            return Err(ProtocolError::stream(
                stream_id,
                ProtocolErrorKind::ReservedBit { field: "request-n" },
            ));
        }
    }
    let mut frame_flags = 0u16;
    if payload.metadata().is_some() {
        frame_flags |= flags::METADATA;
    }
    if follows {
        frame_flags |= flags::FOLLOWS;
    }
    if complete {
        frame_flags |= flags::COMPLETE;
    }
    put_header(dst, stream_id, type_id, frame_flags);
    if let Some(n) = initial_request_n {
        dst.put_u32(n);
    }
    put_metadata_block(dst, stream_id, payload.metadata())?;
    dst.put_slice(payload.data());
    Ok(())
}

fn decode_setup(buf: &mut Bytes, frame_flags: u16) -> Result<Frame, ProtocolError> {
    need(buf, 12, 0)?;
    let version = Version {
        major: buf.get_u16(),
        minor: buf.get_u16(),
    };
    let keepalive_interval = buf.get_u32();
    if keepalive_interval & 0x8000_0000 != 0 {
        return Err(ProtocolError::connection(ProtocolErrorKind::ReservedBit {
            field: "keep-alive interval",
        }));
    }
    if keepalive_interval == 0 {
        return Err(ProtocolError::connection(ProtocolErrorKind::InvalidSetup {
            field: "keep-alive interval",
        }));
    }
    let max_lifetime = buf.get_u32();
    if max_lifetime & 0x8000_0000 != 0 {
        return Err(ProtocolError::connection(ProtocolErrorKind::ReservedBit {
            field: "max lifetime",
        }));
    }
    if max_lifetime == 0 {
        return Err(ProtocolError::connection(ProtocolErrorKind::InvalidSetup {
            field: "max lifetime",
        }));
    }
    let resume_token = if flags::has(frame_flags, flags::RESUME_ENABLE) {
        need(buf, 2, 0)?;
        let token_len = buf.get_u16() as usize;
        need(buf, token_len, 0)?;
        Some(buf.split_to(token_len))
    } else {
        None
    };
    let metadata_mime_type = take_mime_type(buf, "metadata MIME type")?;
    let data_mime_type = take_mime_type(buf, "data MIME type")?;
    let payload = take_payload(buf, 0, frame_flags)?;
    Ok(Frame::Setup {
        version,
        keepalive_interval,
        max_lifetime,
        resume_token,
        metadata_mime_type,
        data_mime_type,
        lease_requested: flags::has(frame_flags, flags::LEASE),
        payload,
    })
}
