use rocket::serde::{Deserialize, Serialize};
use schemars::JsonSchema;
use serde_json::Value;

/// Lifecycle notification posted by Tavus to the conversation callback URL.
///
/// ```json
/// {
///   "event_type": "system.shutdown",
///   "message_type": "system",
///   "conversation_id": "c123",
///   "timestamp": "2024-01-01T00:00:00Z",
///   "properties": { "shutdown_reason": "max_call_duration" }
/// }
/// ```
#[derive(Deserialize, Debug, Clone)]
pub struct WebhookEvent {
    pub event_type: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub message_type: Option<Value>,
    #[serde(default)]
    pub timestamp: Option<Value>,
    /// Kept as raw JSON; its shape varies per event type and is read on demand.
    #[serde(default)]
    pub properties: Value,
}

impl WebhookEvent {
    pub fn session_id(&self) -> Option<&str> {
        self.properties.get("session_id").and_then(Value::as_str)
    }

    pub fn shutdown_reason(&self) -> Option<&str> {
        self.properties.get("shutdown_reason").and_then(Value::as_str)
    }

    /// Transcript turns that parse; anything else in the array is skipped.
    pub fn transcript(&self) -> Vec<TranscriptTurn> {
        self.properties
            .get("transcript")
            .and_then(Value::as_array)
            .map(|turns| {
                turns
                    .iter()
                    .filter_map(|turn| TranscriptTurn::deserialize(turn).ok())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct TranscriptTurn {
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
}

impl TranscriptTurn {
    /// Turns spoken by the AI replica, as opposed to the visitor or system prompt.
    pub fn is_replica(&self) -> bool {
        self.role.eq_ignore_ascii_case("assistant") || self.role.eq_ignore_ascii_case("replica")
    }
}

/// Coarse classification of vendor event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Termination,
    Liveness,
    Transcription,
    Perception,
    Other,
}

impl EventKind {
    pub fn classify(event_type: &str) -> Self {
        match event_type.trim().to_ascii_lowercase().as_str() {
            "system.shutdown" | "conversation.ended" | "application.conversation_ended" => EventKind::Termination,
            "system.replica_joined" | "conversation.participant_joined" | "participant_joined" => EventKind::Liveness,
            "application.transcription_ready" => EventKind::Transcription,
            "application.perception_analysis" => EventKind::Perception,
            _ => EventKind::Other,
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, JsonSchema)]
pub struct WebhookAck {
    pub received: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicate: Option<bool>,
}

impl WebhookAck {
    pub fn processed() -> Self {
        Self {
            received: true,
            duplicate: None,
        }
    }

    pub fn duplicate() -> Self {
        Self {
            received: true,
            duplicate: Some(true),
        }
    }
}
