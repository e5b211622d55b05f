//! Engine configuration.
//!
//! One [`EngineConfig`] covers both roles; the connector and server builders
//! expose the individual knobs. Validation happens once at connection setup
//! so the protocol paths can trust the values.

use std::time::Duration;

use crate::{
    error::{ErrorCode, RSocketError},
    fragment::MIN_FRAGMENT_MTU,
    frame::MAX_REQUEST_N,
    payload::Payload,
};

/// Default MIME type declared for both metadata and data.
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Tunable parameters of one connection.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Period between outbound KEEPALIVE frames.
    pub keepalive_interval: Duration,
    /// Quiet period after which the connection is declared dead.
    pub keepalive_max_lifetime: Duration,
    /// Maximum encoded frame size before fragmentation; zero disables it.
    pub fragmentation_mtu: usize,
    /// MIME type declared for metadata in SETUP.
    pub metadata_mime_type: String,
    /// MIME type declared for data in SETUP.
    pub data_mime_type: String,
    /// Opaque payload sent with SETUP.
    pub setup_payload: Payload,
    /// Whether to negotiate lease semantics.
    pub lease_enabled: bool,
    /// Initial credit granted when opening streams and channels.
    pub initial_request_n: u32,
    /// Hard ceiling on a single encoded frame, fragmented or not.
    pub max_frame_len: usize,
    /// Ceiling on bytes buffered while reassembling one fragment chain.
    pub max_reassembly_bytes: usize,
    /// Depth of the egress frame queue feeding the connection writer.
    pub egress_queue_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            keepalive_interval: Duration::from_secs(20),
            keepalive_max_lifetime: Duration::from_secs(90),
            fragmentation_mtu: 0,
            metadata_mime_type: DEFAULT_MIME_TYPE.to_owned(),
            data_mime_type: DEFAULT_MIME_TYPE.to_owned(),
            setup_payload: Payload::empty(),
            lease_enabled: false,
            initial_request_n: 64,
            // The 24-bit transport length prefix bounds frames anyway.
            max_frame_len: 0x00FF_FFFF,
            max_reassembly_bytes: usize::MAX,
            egress_queue_depth: 64,
        }
    }
}

impl EngineConfig {
    /// Check the configuration before a connection uses it.
    ///
    /// # Errors
    ///
    /// Returns an INVALID_SETUP-coded error describing the first offending
    /// option.
    pub fn validate(&self) -> Result<(), RSocketError> {
        let fail = |message: &str| {
            Err(RSocketError::Setup {
                code: ErrorCode::INVALID_SETUP,
                message: message.to_owned(),
            })
        };
        if self.keepalive_interval.is_zero() {
            return fail("keepalive_interval must be positive");
        }
        if self.keepalive_max_lifetime < self.keepalive_interval {
            return fail("keepalive_max_lifetime must cover at least one interval");
        }
        if self.fragmentation_mtu != 0 && self.fragmentation_mtu < MIN_FRAGMENT_MTU {
            return fail("fragmentation_mtu below the minimum fragment size");
        }
        if self.initial_request_n == 0 || self.initial_request_n > MAX_REQUEST_N {
            return fail("initial_request_n must be a positive 31-bit value");
        }
        for (mime, name) in [
            (&self.metadata_mime_type, "metadata_mime_type"),
            (&self.data_mime_type, "data_mime_type"),
        ] {
            if mime.is_empty() || mime.len() > 0xFF || !mime.is_ascii() {
                return fail(&format!("{name} must be 1-255 ASCII characters"));
            }
        }
        if self.egress_queue_depth == 0 {
            return fail("egress_queue_depth must be positive");
        }
        Ok(())
    }
}
