//! Inbound helper that joins FOLLOWS-chained fragments back together.
//!
//! Chains are keyed by stream id. The head frame fixes the interaction kind
//! for the whole chain; every continuation must be a PAYLOAD frame on the
//! same stream. CANCEL and ERROR abort an open chain and pass through, since
//! they legitimately race a fragmented delivery. Anything else mid-chain is a
//! connection-fatal protocol violation.

use std::collections::HashMap;

use bytes::BytesMut;

use crate::{
    error::{ProtocolError, ProtocolErrorKind},
    frame::Frame,
    payload::Payload,
};

/// Buffered state for one in-flight fragment chain.
#[derive(Debug)]
struct PartialFrame {
    head: Frame,
    has_metadata: bool,
    metadata: BytesMut,
    data: BytesMut,
}

impl PartialFrame {
    fn begin(mut head: Frame) -> Self {
        let payload = take_payload(&mut head);
        let mut partial = Self {
            head,
            has_metadata: false,
            metadata: BytesMut::new(),
            data: BytesMut::new(),
        };
        partial.append(payload);
        partial
    }

    fn append(&mut self, payload: Payload) {
        let (metadata, data) = payload.into_parts();
        if let Some(metadata) = metadata {
            self.has_metadata = true;
            self.metadata.extend_from_slice(&metadata);
        }
        self.data.extend_from_slice(&data);
    }

    fn buffered_len(&self) -> usize { self.metadata.len() + self.data.len() }

    /// Rebuild the head frame with the joined payload and terminal flags.
    fn assemble(self, terminal_next: bool, terminal_complete: bool) -> Frame {
        let metadata = self.has_metadata.then(|| self.metadata.freeze());
        let joined = Payload::from_parts(metadata, self.data.freeze());
        match self.head {
            Frame::RequestResponse { stream_id, .. } => Frame::RequestResponse {
                stream_id,
                follows: false,
                payload: joined,
            },
            Frame::RequestFnf { stream_id, .. } => Frame::RequestFnf {
                stream_id,
                follows: false,
                payload: joined,
            },
            Frame::RequestStream {
                stream_id,
                initial_request_n,
                ..
            } => Frame::RequestStream {
                stream_id,
                follows: false,
                initial_request_n,
                payload: joined,
            },
            Frame::RequestChannel {
                stream_id,
                initial_request_n,
                ..
            } => Frame::RequestChannel {
                stream_id,
                follows: false,
                complete: terminal_complete,
                initial_request_n,
                payload: joined,
            },
            Frame::Payload { stream_id, .. } => Frame::Payload {
                stream_id,
                follows: false,
                complete: terminal_complete,
                next: terminal_next,
                payload: joined,
            },
            other => other,
        }
    }
}

/// Replace the frame's payload with an empty one, returning the original.
fn take_payload(frame: &mut Frame) -> Payload {
    match frame {
        Frame::RequestResponse { payload, .. }
        | Frame::RequestFnf { payload, .. }
        | Frame::RequestStream { payload, .. }
        | Frame::RequestChannel { payload, .. }
        | Frame::Payload { payload, .. } => std::mem::take(payload),
        _ => Payload::empty(),
    }
}

/// Stateful per-connection reassembler keyed by stream id.
#[derive(Debug)]
pub struct Reassembler {
    chains: HashMap<u32, PartialFrame>,
    limit: usize,
}

impl Reassembler {
    /// Create a reassembler that caps any chain at `limit` buffered bytes.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            chains: HashMap::new(),
            limit,
        }
    }

    /// Feed one inbound frame through the reassembler.
    ///
    /// Returns `Ok(Some(_))` with a frame ready for dispatch: either the
    /// input untouched (no chain involved) or a freshly assembled logical
    /// frame. Returns `Ok(None)` while a chain is still accumulating.
    ///
    /// # Errors
    ///
    /// Returns a connection-fatal [`ProtocolError`] when a foreign frame
    /// interrupts an open chain or a chain outgrows the configured limit.
    pub fn accept(&mut self, frame: Frame) -> Result<Option<Frame>, ProtocolError> {
        let stream_id = frame.stream_id();
        if stream_id == 0 {
            return Ok(Some(frame));
        }

        if self.chains.contains_key(&stream_id) {
            return self.continue_chain(stream_id, frame);
        }

        if frame.follows() {
            self.chains.insert(stream_id, PartialFrame::begin(frame));
            return Ok(None);
        }
        Ok(Some(frame))
    }

    fn continue_chain(
        &mut self,
        stream_id: u32,
        frame: Frame,
    ) -> Result<Option<Frame>, ProtocolError> {
        match frame {
            Frame::Payload {
                follows,
                complete,
                next,
                payload,
                ..
            } => {
                let chain = self
                    .chains
                    .get_mut(&stream_id)
                    .expect("chain presence checked by caller");
                chain.append(payload);
                if chain.buffered_len() > self.limit {
                    self.chains.remove(&stream_id);
                    return Err(ProtocolError::stream(
                        stream_id,
                        ProtocolErrorKind::ReassemblyOverflow { limit: self.limit },
                    ));
                }
                if follows {
                    return Ok(None);
                }
                let chain = self
                    .chains
                    .remove(&stream_id)
                    .expect("chain presence checked by caller");
                Ok(Some(chain.assemble(next, complete)))
            }
            // Stream teardown races an in-flight chain; drop the partial
            // state and let the frame dispatch normally.
            Frame::Cancel { .. } | Frame::Error { .. } => {
                self.chains.remove(&stream_id);
                Ok(Some(frame))
            }
            other => Err(ProtocolError::stream(
                stream_id,
                ProtocolErrorKind::InterruptedFragmentChain {
                    frame: other.type_name(),
                },
            )),
        }
    }

    /// Discard any partial chain for `stream_id`.
    pub fn abort(&mut self, stream_id: u32) { self.chains.remove(&stream_id); }

    /// Number of chains currently buffering.
    #[must_use]
    pub fn open_chains(&self) -> usize { self.chains.len() }
}
