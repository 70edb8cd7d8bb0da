//! Replication protocol messages.
//!
//! Sources emit [`ReplicationMessage`]s; state messages are wrapped in a
//! [`StateCheckpointEnvelope`] so the platform can attach identity and record
//! counts before the destination sees them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a stream by name and optional namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl StreamDescriptor {
    /// An empty namespace is the same as no namespace.
    #[must_use]
    pub fn new(name: impl Into<String>, namespace: Option<&str>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.filter(|ns| !ns.is_empty()).map(str::to_string),
        }
    }
}

impl fmt::Display for StreamDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{ns}.{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Opaque per-stream state blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamState {
    pub stream_descriptor: StreamDescriptor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_state: Option<serde_json::Value>,
}

/// State shared across streams plus each stream's own state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_state: Option<serde_json::Value>,
    #[serde(default)]
    pub stream_states: Vec<StreamState>,
}

/// Shape of a state message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateType {
    Stream,
    Global,
    /// Pre-per-stream format: a single untyped blob.
    Legacy,
}

/// A checkpoint emitted by a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateMessage {
    #[serde(rename = "type")]
    pub state_type: StateType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<StreamState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global: Option<GlobalState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl StateMessage {
    /// Per-stream checkpoint for `stream`.
    #[must_use]
    pub fn for_stream(stream: StreamDescriptor, state: serde_json::Value) -> Self {
        Self {
            state_type: StateType::Stream,
            stream: Some(StreamState {
                stream_descriptor: stream,
                stream_state: Some(state),
            }),
            global: None,
            data: None,
        }
    }

    /// Streams this checkpoint covers.
    #[must_use]
    pub fn streams(&self) -> Vec<&StreamDescriptor> {
        match self.state_type {
            StateType::Stream => self
                .stream
                .iter()
                .map(|s| &s.stream_descriptor)
                .collect(),
            StateType::Global => self
                .global
                .iter()
                .flat_map(|g| g.stream_states.iter().map(|s| &s.stream_descriptor))
                .collect(),
            StateType::Legacy => Vec::new(),
        }
    }
}

/// A state message plus platform-assigned identity and record counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateCheckpointEnvelope {
    pub state: StateMessage,
    /// Monotonic id, assigned at most once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    /// Records emitted since the previous checkpoint, net of filtered records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_record_count: Option<u64>,
    /// Records dropped by transformation since the previous checkpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filtered_count: Option<u64>,
}

impl StateCheckpointEnvelope {
    #[must_use]
    pub fn new(state: StateMessage) -> Self {
        Self {
            state,
            id: None,
            source_record_count: None,
            filtered_count: None,
        }
    }
}

/// A single data record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMessage {
    pub stream: StreamDescriptor,
    pub data: serde_json::Value,
    pub emitted_at: i64,
}

/// Message flowing from source to destination during replication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplicationMessage {
    Record(RecordMessage),
    State(StateCheckpointEnvelope),
    Log { level: String, message: String },
}
