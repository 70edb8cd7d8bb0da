//! Checkpoint identity and record-count enrichment.
//!
//! Every state message leaving a source is wrapped in a
//! [`StateCheckpointEnvelope`]. Enrichment attaches the number of records the
//! checkpoint covers and a monotonic id so the destination can acknowledge
//! partial progress.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use syncwork_types::protocol::{ReplicationMessage, StateCheckpointEnvelope};

use crate::stats::StatsTracker;

/// Fatal checkpoint invariant violations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnrichError {
    #[error("checkpoint for {streams}: filtered count {filtered} exceeds emitted count {emitted}")]
    FilteredExceedsEmitted {
        streams: String,
        filtered: u64,
        emitted: u64,
    },
}

/// Process-wide checkpoint id counter.
///
/// Shared by reference between enrichers so ids stay strictly increasing
/// across every stream of a run.
#[derive(Debug)]
pub struct CheckpointIdSequence {
    next: AtomicU64,
}

impl CheckpointIdSequence {
    const FIRST_ID: u64 = 1;

    #[must_use]
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(Self::FIRST_ID),
        }
    }

    /// Take the next id.
    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }

    /// Restart numbering from the first id.
    pub fn reset(&self) {
        self.next.store(Self::FIRST_ID, Ordering::SeqCst);
    }
}

impl Default for CheckpointIdSequence {
    fn default() -> Self {
        Self::new()
    }
}

/// Enriches checkpoint envelopes from a [`StatsTracker`].
pub struct CheckpointEnricher {
    tracker: Arc<dyn StatsTracker>,
    ids: Arc<CheckpointIdSequence>,
}

impl CheckpointEnricher {
    pub fn new(tracker: Arc<dyn StatsTracker>, ids: Arc<CheckpointIdSequence>) -> Self {
        Self { tracker, ids }
    }

    /// Enrich `message` in place. Non-checkpoint messages pass through.
    ///
    /// Enriching an already enriched envelope changes nothing.
    ///
    /// # Errors
    ///
    /// Returns [`EnrichError::FilteredExceedsEmitted`] when the tracker
    /// reports more filtered than emitted records.
    pub fn enrich(&self, message: &mut ReplicationMessage) -> Result<(), EnrichError> {
        match message {
            ReplicationMessage::State(envelope) => self.enrich_envelope(envelope),
            ReplicationMessage::Record(_) | ReplicationMessage::Log { .. } => Ok(()),
        }
    }

    fn enrich_envelope(&self, envelope: &mut StateCheckpointEnvelope) -> Result<(), EnrichError> {
        if envelope.source_record_count.is_none() {
            let (emitted, filtered) = self.tracker.counts_since_last_state(&envelope.state);
            let emitted = if let Some(n) = emitted {
                n
            } else {
                tracing::warn!(
                    streams = %stream_list(envelope),
                    "No record count tracked for checkpoint, attaching zero"
                );
                0
            };

            let mut count = emitted;
            if let Some(filtered) = filtered {
                if filtered > emitted {
                    return Err(EnrichError::FilteredExceedsEmitted {
                        streams: stream_list(envelope),
                        filtered,
                        emitted,
                    });
                }
                count = emitted - filtered;
                envelope.filtered_count = Some(filtered);
            }
            envelope.source_record_count = Some(count);
        }

        if envelope.id.is_none() {
            envelope.id = Some(self.ids.next_id());
        }
        Ok(())
    }
}

fn stream_list(envelope: &StateCheckpointEnvelope) -> String {
    let streams: Vec<String> = envelope
        .state
        .streams()
        .iter()
        .map(ToString::to_string)
        .collect();
    if streams.is_empty() {
        format!("{:?} state", envelope.state.state_type)
    } else {
        streams.join(",")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::RecordCountTracker;
    use syncwork_types::protocol::{RecordMessage, StateMessage, StreamDescriptor};

    fn users() -> StreamDescriptor {
        StreamDescriptor::new("users", None)
    }

    fn state_msg(stream: StreamDescriptor) -> ReplicationMessage {
        ReplicationMessage::State(StateCheckpointEnvelope::new(StateMessage::for_stream(
            stream,
            serde_json::json!({"cursor": 10}),
        )))
    }

    fn envelope(msg: &ReplicationMessage) -> &StateCheckpointEnvelope {
        match msg {
            ReplicationMessage::State(env) => env,
            other => panic!("expected state, got {other:?}"),
        }
    }

    fn enricher(tracker: &Arc<RecordCountTracker>) -> CheckpointEnricher {
        let tracker: Arc<dyn StatsTracker> = tracker.clone();
        CheckpointEnricher::new(tracker, Arc::new(CheckpointIdSequence::new()))
    }

    #[test]
    fn test_attaches_count_net_of_filtered() {
        let tracker = Arc::new(RecordCountTracker::new());
        for _ in 0..5 {
            tracker.record_emitted(&users());
        }
        tracker.record_filtered(&users());
        tracker.record_filtered(&users());

        let mut msg = state_msg(users());
        enricher(&tracker).enrich(&mut msg).unwrap();
        let env = envelope(&msg);
        assert_eq!(env.source_record_count, Some(3));
        assert_eq!(env.filtered_count, Some(2));
        assert_eq!(env.id, Some(1));
    }

    #[test]
    fn test_missing_count_attaches_zero() {
        let tracker = Arc::new(RecordCountTracker::new());
        let mut msg = state_msg(users());
        enricher(&tracker).enrich(&mut msg).unwrap();
        assert_eq!(envelope(&msg).source_record_count, Some(0));
    }

    #[test]
    fn test_filtered_above_emitted_is_fatal() {
        let tracker = Arc::new(RecordCountTracker::new());
        tracker.record_emitted(&users());
        tracker.record_filtered(&users());
        tracker.record_filtered(&users());

        let mut msg = state_msg(users());
        let err = enricher(&tracker).enrich(&mut msg).unwrap_err();
        assert_eq!(
            err,
            EnrichError::FilteredExceedsEmitted {
                streams: "users".into(),
                filtered: 2,
                emitted: 1,
            }
        );
    }

    #[test]
    fn test_re_enrichment_keeps_id_and_count() {
        let tracker = Arc::new(RecordCountTracker::new());
        tracker.record_emitted(&users());
        let e = enricher(&tracker);

        let mut msg = state_msg(users());
        e.enrich(&mut msg).unwrap();
        let first = envelope(&msg).clone();

        tracker.record_emitted(&users());
        tracker.record_filtered(&users());
        e.enrich(&mut msg).unwrap();
        assert_eq!(envelope(&msg), &first);
    }

    #[test]
    fn test_preset_count_is_kept() {
        let tracker = Arc::new(RecordCountTracker::new());
        tracker.record_emitted(&users());
        let mut msg = state_msg(users());
        if let ReplicationMessage::State(env) = &mut msg {
            env.source_record_count = Some(42);
        }
        enricher(&tracker).enrich(&mut msg).unwrap();
        assert_eq!(envelope(&msg).source_record_count, Some(42));
        assert!(envelope(&msg).filtered_count.is_none());
    }

    #[test]
    fn test_records_pass_through() {
        let tracker = Arc::new(RecordCountTracker::new());
        let mut msg = ReplicationMessage::Record(RecordMessage {
            stream: users(),
            data: serde_json::json!({}),
            emitted_at: 1,
        });
        let before = msg.clone();
        enricher(&tracker).enrich(&mut msg).unwrap();
        assert_eq!(msg, before);
    }

    #[test]
    fn test_sequence_increases_and_resets() {
        let seq = CheckpointIdSequence::new();
        assert_eq!(seq.next_id(), 1);
        assert_eq!(seq.next_id(), 2);
        seq.reset();
        assert_eq!(seq.next_id(), 1);
    }
}
