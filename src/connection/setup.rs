//! SETUP construction and server-side validation.
//!
//! The client builds its SETUP frame from configuration; the server checks
//! version, MIME declarations, and timing fields before handing the
//! connection to the acceptor. Validation failures map onto the setup error
//! codes and close the connection before it is ever established.

use bytes::Bytes;

use crate::{
    config::EngineConfig,
    error::ErrorCode,
    frame::{Frame, MAX_REQUEST_N, Version},
    payload::SetupPayload,
};

/// Longest MIME type the one-byte length field can carry.
const MAX_MIME_LEN: usize = 0xFF;

/// Build the SETUP frame a client opens the connection with.
pub(crate) fn build_setup(config: &EngineConfig, resume_token: Option<Bytes>) -> Frame {
    Frame::Setup {
        version: Version::V1,
        keepalive_interval: clamp_millis(config.keepalive_interval),
        max_lifetime: clamp_millis(config.keepalive_max_lifetime),
        resume_token,
        metadata_mime_type: config.metadata_mime_type.clone(),
        data_mime_type: config.data_mime_type.clone(),
        lease_requested: config.lease_enabled,
        payload: config.setup_payload.clone(),
    }
}

/// Clamp a duration into the 31-bit millisecond field.
pub(crate) fn clamp_millis(duration: std::time::Duration) -> u32 {
    u32::try_from(duration.as_millis())
        .unwrap_or(MAX_REQUEST_N)
        .min(MAX_REQUEST_N)
        .max(1)
}

/// Validate a received SETUP frame, producing the acceptor's view of it.
///
/// # Errors
///
/// Returns the wire error code and diagnostic the connection must be
/// rejected with.
pub(crate) fn validate_setup(frame: Frame) -> Result<SetupPayload, (ErrorCode, String)> {
    let Frame::Setup {
        version,
        keepalive_interval,
        max_lifetime,
        resume_token,
        metadata_mime_type,
        data_mime_type,
        lease_requested,
        payload,
    } = frame
    else {
        return Err((
            ErrorCode::INVALID_SETUP,
            "expected SETUP as the first frame".into(),
        ));
    };

    if version.major != Version::V1.major {
        return Err((
            ErrorCode::UNSUPPORTED_SETUP,
            format!("unsupported protocol version {version}"),
        ));
    }
    for (mime, field) in [
        (&metadata_mime_type, "metadata MIME type"),
        (&data_mime_type, "data MIME type"),
    ] {
        if mime.is_empty() || mime.len() > MAX_MIME_LEN || !mime.is_ascii() {
            return Err((ErrorCode::INVALID_SETUP, format!("invalid {field}")));
        }
    }
    if max_lifetime < keepalive_interval {
        return Err((
            ErrorCode::INVALID_SETUP,
            "max lifetime shorter than keep-alive interval".into(),
        ));
    }

    Ok(SetupPayload {
        payload,
        metadata_mime_type,
        data_mime_type,
        keepalive_interval_millis: keepalive_interval,
        max_lifetime_millis: max_lifetime,
        lease_requested,
        resume_token,
    })
}
