use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{TimerId, UserId};
use crate::timer::TimerStatus;

/// Client-to-server mutation, tagged by `action`.
///
/// The tag set is closed: anything other than `timer_start`/`timer_stop`
/// decodes to `Unknown`, so callers drop unrecognized actions through an
/// explicit branch instead of a decode failure.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum ClientMessage {
    #[serde(rename = "timer_start")]
    TimerStart {
        id: TimerId,
        user_id: UserId,
        #[serde(default)]
        started_at: Option<DateTime<Utc>>,
    },

    #[serde(rename = "timer_stop")]
    TimerStop { id: TimerId, user_id: UserId },

    #[serde(other)]
    Unknown,
}

/// Server-to-client push, tagged by `event`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerNotification {
    TimerUpdated { payload: TimerPayload },
}

/// Canonical timer state as sent to clients. `started_at` is serialized as
/// an explicit `null` while the timer is stopped, never omitted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimerPayload {
    pub id: TimerId,
    pub status: TimerStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("encode failed: {0}")]
    Encode(String),
}

/// Decode one inbound text frame. A syntactically invalid frame (bad JSON,
/// missing fields, non-RFC 3339 timestamp) is `Malformed`; an intact frame
/// with an unrecognized action decodes to `ClientMessage::Unknown`.
pub fn decode_client_message(raw: &str) -> Result<ClientMessage, ProtocolError> {
    serde_json::from_str(raw).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

/// Encode a notification for the wire.
pub fn encode_notification(notification: &ServerNotification) -> Result<String, ProtocolError> {
    serde_json::to_string(notification).map_err(|e| ProtocolError::Encode(e.to_string()))
}
