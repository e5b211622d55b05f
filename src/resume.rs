//! Resume-token store collaborator.
//!
//! The engine itself only moves positions around: the client advertises its
//! resume token in SETUP and records received positions; the server answers
//! RESUME from whatever store it was given. Retransmission buffers and any
//! durable storage live behind [`ResumeStore`].

use bytes::Bytes;
use dashmap::DashMap;

/// Storage collaborator for resumable connections.
pub trait ResumeStore: Send + Sync + 'static {
    /// Record the last frame position received for `token`.
    fn save(&self, token: &[u8], position: u64);

    /// Look up the last recorded position for `token`, if the session is
    /// known.
    fn load(&self, token: &[u8]) -> Option<u64>;
}

/// Process-local resume store backed by a concurrent map.
///
/// Suitable for tests and single-process deployments; positions vanish with
/// the process.
#[derive(Debug, Default)]
pub struct InMemoryResumeStore {
    positions: DashMap<Bytes, u64>,
}

impl InMemoryResumeStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Number of sessions currently tracked.
    #[must_use]
    pub fn len(&self) -> usize { self.positions.len() }

    /// Whether no sessions are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.positions.is_empty() }
}

impl ResumeStore for InMemoryResumeStore {
    fn save(&self, token: &[u8], position: u64) {
        self.positions
            .insert(Bytes::copy_from_slice(token), position);
    }

    fn load(&self, token: &[u8]) -> Option<u64> {
        self.positions.get(token).map(|entry| *entry.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saved_positions_are_recalled_by_token() {
        let store = InMemoryResumeStore::new();
        store.save(b"session-a", 17);
        store.save(b"session-b", 4);
        store.save(b"session-a", 23);

        assert_eq!(store.load(b"session-a"), Some(23));
        assert_eq!(store.load(b"session-b"), Some(4));
        assert_eq!(store.load(b"session-c"), None);
        assert_eq!(store.len(), 2);
    }
}
