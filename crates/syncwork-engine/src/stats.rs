//! Per-stream record counters read by checkpoint enrichment.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use syncwork_types::protocol::{ReplicationMessage, StateMessage, StateType, StreamDescriptor};

/// Read-only view of record counts since each stream's previous checkpoint.
pub trait StatsTracker: Send + Sync {
    /// Records emitted since the previous checkpoint of the streams `state`
    /// covers. `None` when nothing is tracked for them.
    fn emitted_since_last_state(&self, state: &StateMessage) -> Option<u64>;

    /// Records dropped by transformation over the same window.
    fn filtered_since_last_state(&self, state: &StateMessage) -> Option<u64>;

    /// `(emitted, filtered)` read as one consistent snapshot.
    fn counts_since_last_state(&self, state: &StateMessage) -> (Option<u64>, Option<u64>) {
        (
            self.emitted_since_last_state(state),
            self.filtered_since_last_state(state),
        )
    }
}

#[derive(Debug, Default)]
struct Counters {
    emitted: HashMap<StreamDescriptor, u64>,
    filtered: HashMap<StreamDescriptor, u64>,
}

impl Counters {
    /// Per-stream checkpoints read their own stream. Global and legacy
    /// checkpoints sum every tracked stream.
    fn count(map: &HashMap<StreamDescriptor, u64>, state: &StateMessage) -> Option<u64> {
        match state.state_type {
            StateType::Stream => state
                .stream
                .as_ref()
                .and_then(|s| map.get(&s.stream_descriptor).copied()),
            StateType::Global | StateType::Legacy => {
                if map.is_empty() {
                    None
                } else {
                    Some(map.values().copied().fold(0u64, u64::saturating_add))
                }
            }
        }
    }
}

/// In-memory [`StatsTracker`] fed from the replication message stream.
///
/// Feed every message through [`RecordCountTracker::observe`] *after* it has
/// been enriched: a state message resets the counters it covers.
#[derive(Debug, Default)]
pub struct RecordCountTracker {
    counters: Mutex<Counters>,
}

impl RecordCountTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_emitted(&self, stream: &StreamDescriptor) {
        let mut counters = self.lock();
        let n = counters.emitted.entry(stream.clone()).or_default();
        *n = n.saturating_add(1);
    }

    pub fn record_filtered(&self, stream: &StreamDescriptor) {
        let mut counters = self.lock();
        let n = counters.filtered.entry(stream.clone()).or_default();
        *n = n.saturating_add(1);
    }

    /// Update counters from one source message.
    pub fn observe(&self, message: &ReplicationMessage) {
        match message {
            ReplicationMessage::Record(record) => self.record_emitted(&record.stream),
            ReplicationMessage::State(envelope) => self.checkpoint_taken(&envelope.state),
            ReplicationMessage::Log { .. } => {}
        }
    }

    /// Reset the counters of the streams `state` covers.
    pub fn checkpoint_taken(&self, state: &StateMessage) {
        let mut counters = self.lock();
        match state.state_type {
            StateType::Stream => {
                for stream in state.streams() {
                    counters.emitted.remove(stream);
                    counters.filtered.remove(stream);
                }
            }
            StateType::Global | StateType::Legacy => {
                counters.emitted.clear();
                counters.filtered.clear();
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl StatsTracker for RecordCountTracker {
    fn emitted_since_last_state(&self, state: &StateMessage) -> Option<u64> {
        Counters::count(&self.lock().emitted, state)
    }

    fn filtered_since_last_state(&self, state: &StateMessage) -> Option<u64> {
        Counters::count(&self.lock().filtered, state)
    }

    fn counts_since_last_state(&self, state: &StateMessage) -> (Option<u64>, Option<u64>) {
        let counters = self.lock();
        (
            Counters::count(&counters.emitted, state),
            Counters::count(&counters.filtered, state),
        )
    }
}
