//! Flag streams that continued from a persisted checkpoint.

use std::collections::HashSet;

use syncwork_types::output::ReplicationOutput;
use syncwork_types::protocol::StreamDescriptor;
use syncwork_types::state::PersistedState;

/// The persisted state has no per-stream structure to inspect.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported state type '{0}': cannot determine resumed streams")]
pub struct UnsupportedStateType(pub &'static str);

/// Set `was_resumed` on every stream stats entry named in `prior`.
///
/// Creates no stats entries. Streams absent from `output` are ignored.
///
/// # Errors
///
/// Returns [`UnsupportedStateType`] for a legacy state blob.
pub fn mark_resumed_streams(
    prior: Option<&PersistedState>,
    output: &mut ReplicationOutput,
) -> Result<(), UnsupportedStateType> {
    let Some(prior) = prior else {
        return Ok(());
    };

    let resumed: HashSet<&StreamDescriptor> = match prior {
        PersistedState::Stream(states) => states.iter().map(|s| &s.stream_descriptor).collect(),
        PersistedState::Global(global) => global
            .stream_states
            .iter()
            .map(|s| &s.stream_descriptor)
            .collect(),
        PersistedState::Legacy(_) => return Err(UnsupportedStateType("legacy")),
    };

    let mut marked = 0usize;
    for entry in &mut output.stream_stats {
        if resumed.contains(&entry.stream) {
            entry.was_resumed = true;
            marked += 1;
        }
    }
    tracing::debug!(marked, prior_streams = resumed.len(), "Marked resumed streams");
    Ok(())
}
