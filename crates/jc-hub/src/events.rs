//! # Assistant Events
//!
//! Every event that flows through the hub. The type tag is a closed set and is
//! validated at the publish boundary; the payload is always a JSON object.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::HubError;

/// Event payload: a mapping of string keys to arbitrary JSON values.
pub type Payload = Map<String, Value>;

/// Kind of event carried by the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    // =========================================================================
    // TELEMETRY
    // =========================================================================
    /// Periodic CPU/memory snapshot.
    SystemMetrics,

    // =========================================================================
    // CHAT / MODELS / PLUGINS
    // =========================================================================
    /// A chat message was sent or answered.
    ChatMessage,
    /// The backend finished loading a model.
    ModelLoaded,
    /// A plugin was enabled or disabled.
    PluginToggled,
    /// A fine-tuning run was started.
    TrainingStarted,

    // =========================================================================
    // CUSTOM COMMANDS
    // =========================================================================
    CommandAdded,
    CommandDeleted,

    // =========================================================================
    // VOICE
    // =========================================================================
    RecordingStarted,
    RecordingStopped,
    TranscriptionReceived,
}

impl EventKind {
    /// Every known kind, in declaration order.
    pub const ALL: [EventKind; 10] = [
        EventKind::SystemMetrics,
        EventKind::ChatMessage,
        EventKind::ModelLoaded,
        EventKind::PluginToggled,
        EventKind::TrainingStarted,
        EventKind::CommandAdded,
        EventKind::CommandDeleted,
        EventKind::RecordingStarted,
        EventKind::RecordingStopped,
        EventKind::TranscriptionReceived,
    ];

    /// Wire name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::SystemMetrics => "system_metrics",
            EventKind::ChatMessage => "chat_message",
            EventKind::ModelLoaded => "model_loaded",
            EventKind::PluginToggled => "plugin_toggled",
            EventKind::TrainingStarted => "training_started",
            EventKind::CommandAdded => "command_added",
            EventKind::CommandDeleted => "command_deleted",
            EventKind::RecordingStarted => "recording_started",
            EventKind::RecordingStopped => "recording_stopped",
            EventKind::TranscriptionReceived => "transcription_received",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| HubError::UnknownEventKind(s.to_string()))
    }
}

/// An immutable event. Shared between mailboxes behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    kind: EventKind,
    data: Payload,
    timestamp: DateTime<Utc>,
}

impl Event {
    /// Create an event stamped with the current time.
    pub fn new(kind: EventKind, data: Payload) -> Self {
        Self {
            kind,
            data,
            timestamp: Utc::now(),
        }
    }

    /// Create an event from an arbitrary JSON value, which must be an object.
    pub fn from_value(kind: EventKind, data: Value) -> Result<Self, HubError> {
        match data {
            Value::Object(map) => Ok(Self::new(kind, map)),
            Value::Null => Err(HubError::InvalidPayload("null")),
            Value::Bool(_) => Err(HubError::InvalidPayload("boolean")),
            Value::Number(_) => Err(HubError::InvalidPayload("number")),
            Value::String(_) => Err(HubError::InvalidPayload("string")),
            Value::Array(_) => Err(HubError::InvalidPayload("array")),
        }
    }

    /// Replace the timestamp, e.g. with one supplied by the publisher.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn data(&self) -> &Payload {
        &self.data
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Serialize into a wire frame: `{"type", "data", "timestamp"}`.
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
