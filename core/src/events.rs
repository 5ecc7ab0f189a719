use serde::Serialize;

use crate::ids::{SessionId, UserId};
use crate::model::{AudioFormat, TerminationReason};

/// Closed sum type of all outbound wire frames (§6.4, §9 "variants, not
/// class hierarchies"). `type` is the serde tag every frame carries;
/// `timestamp` (monotonic ms) is carried on every variant individually
/// rather than hoisted out, matching the wire shapes of §6.4 exactly.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    TransmissionStarted {
        session_id: SessionId,
        user_id: UserId,
        username: String,
        audio_format: AudioFormat,
        is_emergency: bool,
        timestamp: i64,
    },
    AudioChunk {
        session_id: SessionId,
        sequence: u64,
        audio_data: String,
        timestamp: i64,
        size_bytes: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_emergency: Option<bool>,
    },
    TransmissionEnded {
        session_id: SessionId,
        user_id: UserId,
        duration: i64,
        total_chunks: u64,
        total_bytes: u64,
        timestamp: i64,
        reason: TerminationReason,
    },
    ParticipantJoin {
        user_id: UserId,
        username: String,
        timestamp: i64,
    },
    ParticipantLeave {
        user_id: UserId,
        timestamp: i64,
    },
    ChannelClosing {
        timestamp: i64,
    },
    Error {
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<&'static str>,
        timestamp: i64,
    },
    Pong {
        timestamp: i64,
    },
}

impl ServerEvent {
    /// Control frames are never dropped by the fan-out engine's
    /// backpressure policy (§4.E, §9); everything else is best-effort
    /// audio that may be dropped oldest-first.
    pub fn is_control_frame(&self) -> bool {
        !matches!(self, ServerEvent::AudioChunk { .. })
    }
}

/// Closed sum type of inbound control frames carried over the socket
/// itself (§6.4) — distinct from the REST control surface.
#[derive(Clone, Debug, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Ping { timestamp: i64 },
    Leave,
}
