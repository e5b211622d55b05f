//! Concurrent registry of live streams.
//!
//! The registry is the only broadly shared mutable structure in the engine.
//! It maps stream ids to [`StreamHandle`]s and must stay correct under
//! concurrent ingress dispatch and egress submission, so it is backed by a
//! sharded concurrent hash map keyed by stream id.

use dashmap::{DashMap, mapref::entry::Entry};

use super::StreamHandle;

/// Sharded map from stream id to live stream state.
#[derive(Default, Debug)]
pub(crate) struct StreamRegistry {
    streams: DashMap<u32, StreamHandle>,
}

impl StreamRegistry {
    pub(crate) fn new() -> Self { Self::default() }

    /// Insert a handle for a new stream.
    ///
    /// Fails (returning `false`) when the id is already live, preserving the
    /// at-most-one-stream-per-id invariant.
    #[must_use]
    pub(crate) fn insert(&self, stream_id: u32, handle: StreamHandle) -> bool {
        match self.streams.entry(stream_id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                vacant.insert(handle);
                true
            }
        }
    }

    /// Clone the handle for `stream_id`, if the stream is live.
    ///
    /// Handles are cheap to clone (a sender and two shared pointers); cloning
    /// avoids holding a shard lock across event delivery.
    pub(crate) fn get(&self, stream_id: u32) -> Option<StreamHandle> {
        self.streams
            .get(&stream_id)
            .map(|entry| entry.value().clone())
    }

    /// Remove and return the handle for `stream_id`.
    pub(crate) fn remove(&self, stream_id: u32) -> Option<StreamHandle> {
        self.streams.remove(&stream_id).map(|(_, handle)| handle)
    }

    /// Whether `stream_id` is currently live.
    pub(crate) fn contains(&self, stream_id: u32) -> bool {
        self.streams.contains_key(&stream_id)
    }

    /// Remove every stream, returning the drained handles.
    ///
    /// Used for shutdown fan-out: the caller delivers a terminal event to
    /// each handle after the registry is already empty, so late frames for
    /// those ids fall through to the ignored-frame consumer.
    pub(crate) fn drain(&self) -> Vec<(u32, StreamHandle)> {
        let ids: Vec<u32> = self.streams.iter().map(|entry| *entry.key()).collect();
        ids.into_iter()
            .filter_map(|id| self.streams.remove(&id))
            .collect()
    }

    /// Number of live streams.
    pub(crate) fn len(&self) -> usize { self.streams.len() }
}
