//! Flow-control credit accounting.
//!
//! Credit is strictly per stream. Two pieces cooperate:
//!
//! - [`InboundWindow`] tracks how many payloads the peer may still send this
//!   endpoint. The local consumer grants credit (mirrored on the wire as
//!   REQUEST_N) and the dispatcher charges one unit per NEXT payload; a
//!   charge against an empty window is a credit violation.
//! - [`DemandPolicy`] decides when the consumer should top the window up,
//!   batching grants so a steady consumer does not emit one REQUEST_N per
//!   payload.
//!
//! Outbound gating — a producer must hold credit before emitting NEXT — is
//! enforced inside each stream task, which owns its outbound counter as a
//! plain integer under the single-writer discipline.

use std::sync::atomic::{AtomicU64, Ordering};

/// Inbound credit window charged by the dispatcher.
///
/// A window of `u64::MAX` means the stream is not flow controlled
/// (request/response payloads), and charging it never fails or decrements.
#[derive(Debug)]
pub(crate) struct InboundWindow {
    remaining: AtomicU64,
}

impl InboundWindow {
    const UNLIMITED: u64 = u64::MAX;

    /// Window starting with `initial` credits.
    pub(crate) fn new(initial: u32) -> Self {
        Self {
            remaining: AtomicU64::new(u64::from(initial)),
        }
    }

    /// Window that never runs out, for interactions without flow control.
    pub(crate) fn unlimited() -> Self {
        Self {
            remaining: AtomicU64::new(Self::UNLIMITED),
        }
    }

    /// Add `n` credits, saturating at the unlimited sentinel.
    pub(crate) fn grant(&self, n: u32) {
        self.remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_add(u64::from(n)))
            })
            .ok();
    }

    /// Charge one credit. Returns `false` when no credit remains.
    pub(crate) fn try_charge(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| match current {
                0 => None,
                Self::UNLIMITED => Some(Self::UNLIMITED),
                n => Some(n - 1),
            })
            .is_ok()
    }

    /// Credits currently outstanding.
    pub(crate) fn remaining(&self) -> u64 { self.remaining.load(Ordering::Acquire) }
}

/// High/low watermark policy for replenishing inbound credit.
///
/// The policy re-grants in chunks of the initial request-n whenever the
/// outstanding demand falls below half of it, which bounds REQUEST_N frame
/// amplification to one grant per half-chunk of consumed payloads.
#[derive(Clone, Copy, Debug)]
pub(crate) struct DemandPolicy {
    chunk: u32,
    outstanding: u64,
}

impl DemandPolicy {
    /// Policy seeded with the initial request-n already on the wire.
    pub(crate) fn new(initial_request_n: u32) -> Self {
        Self {
            chunk: initial_request_n,
            outstanding: u64::from(initial_request_n),
        }
    }

    /// Record one delivered payload. Returns `Some(n)` when a REQUEST_N for
    /// `n` additional credits should be sent to the peer.
    pub(crate) fn on_delivered(&mut self) -> Option<u32> {
        self.outstanding = self.outstanding.saturating_sub(1);
        if self.outstanding < u64::from(self.chunk / 2).max(1) {
            self.outstanding += u64::from(self.chunk);
            return Some(self.chunk);
        }
        None
    }

    /// Demand currently outstanding toward the peer.
    #[cfg(test)]
    pub(crate) fn outstanding(&self) -> u64 { self.outstanding }
}
