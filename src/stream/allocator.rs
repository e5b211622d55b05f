//! Stream id allocation.
//!
//! Clients allocate odd ids, servers even ids, both counting up by two.
//! Ids are 31-bit; on wraparound the counter re-enters the id space at the
//! low end and skips any id still live in the registry, as well as the
//! reserved id zero.

use std::sync::atomic::{AtomicU32, Ordering};

use super::{StreamHandle, registry::StreamRegistry};
use crate::frame::MAX_STREAM_ID;

/// Monotonic parity-preserving id source for one side of a connection.
#[derive(Debug)]
pub(crate) struct StreamIdAllocator {
    next: AtomicU32,
}

impl StreamIdAllocator {
    /// Allocator for the client side (odd ids, starting at 1).
    pub(crate) fn client() -> Self {
        Self {
            next: AtomicU32::new(1),
        }
    }

    /// Allocator for the server side (even ids, starting at 2).
    pub(crate) fn server() -> Self {
        Self {
            next: AtomicU32::new(2),
        }
    }

    /// Produce the next candidate id, masking into the 31-bit space and
    /// skipping the reserved id zero. Wrapping the backing counter flips no
    /// parity bit, so odd stays odd and even stays even.
    fn bump(&self) -> u32 {
        loop {
            let raw = self.next.fetch_add(2, Ordering::Relaxed);
            let id = raw & MAX_STREAM_ID;
            if id != 0 {
                return id;
            }
        }
    }

    /// Allocate an id and insert `handle` under it atomically.
    ///
    /// Ids already present in the registry (possible only after 2^31 ids
    /// have been allocated) are skipped.
    pub(crate) fn allocate(&self, registry: &StreamRegistry, handle: StreamHandle) -> u32 {
        loop {
            let id = self.bump();
            if registry.insert(id, handle.clone()) {
                return id;
            }
        }
    }

    /// Allocate an id for a stream that never registers (fire-and-forget).
    ///
    /// Live ids are still skipped so the id cannot collide with a registered
    /// stream after wraparound.
    pub(crate) fn allocate_unregistered(&self, registry: &StreamRegistry) -> u32 {
        loop {
            let id = self.bump();
            if !registry.contains(id) {
                return id;
            }
        }
    }
}
