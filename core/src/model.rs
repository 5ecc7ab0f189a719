use serde::{Deserialize, Serialize};

use crate::ids::{ChannelId, DeviceToken, SessionId, UserId};

/// Capability tags resolved by the identity collaborator (§6.1) and
/// attached to the connection context, so the Coordinator can check
/// emergency eligibility without a network round trip per chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    Read,
    Write,
    Emergency,
    Admin,
}

/// An already-authenticated principal, as handed to the core by the
/// gateway edge after auth resolution.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: UserId,
    pub username: String,
    pub permissions: Vec<Permission>,
}

impl Principal {
    pub fn has(&self, perm: Permission) -> bool {
        self.permissions.contains(&perm)
    }
}

/// Channel identity as read from the external catalog (§3, §6.2). The
/// core only ever reads `uuid`/`max_participants`/`channel_type`; `name`
/// is carried for the catalog/REST edge and ignored by the coordinator.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub uuid: ChannelId,
    pub name: String,
    pub max_participants: u32,
    pub channel_type: ChannelType,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    Standard,
    Emergency,
}

/// Opaque, client-provided connection descriptor (os/os_version/app_version).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub os: Option<String>,
    pub os_version: Option<String>,
    pub app_version: Option<String>,
}

/// One connected listener on one device (§3 Participant).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: UserId,
    pub username: String,
    pub device_token: DeviceToken,
    pub joined_at: i64,
    pub last_seen: i64,
    pub descriptor: DeviceDescriptor,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioFormat {
    AacLc,
    Opus,
    Pcm,
}

impl AudioFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "aac-lc" => Some(AudioFormat::AacLc),
            "opus" => Some(AudioFormat::Opus),
            "pcm" => Some(AudioFormat::Pcm),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkQuality {
    Poor,
    Fair,
    Good,
    Excellent,
}

/// Reason a transmission session was closed (§4.C, §7).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    ClientEnd,
    Deadline,
    OwnerDisconnect,
    ChannelShutdown,
    Error,
}

/// Parameters supplied to `start_transmission` (§4.D.3).
#[derive(Clone, Debug)]
pub struct StartTransmissionParams {
    pub audio_format: AudioFormat,
    pub sample_rate: u32,
    pub bitrate: u32,
    pub network_quality: NetworkQuality,
    pub is_emergency: bool,
}

/// One buffered audio chunk, §3's `{sequence, payload, received_at,
/// expires_at}`.
#[derive(Clone, Debug)]
pub struct BufferedChunk {
    pub sequence: u64,
    pub payload_b64: String,
    pub size_bytes: usize,
    pub received_at: i64,
    pub expires_at: i64,
}

/// Outcome of `accept_chunk` (§4.C).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// Accepted in order (possibly draining a contiguous run behind it).
    Accepted,
    /// Buffered out of order, awaiting earlier sequences.
    BufferedOutOfOrder,
    /// Older than `expected_sequence`; dropped but acknowledged.
    Late,
}

/// Post-hoc audit record (§3), persisted out-of-band by the audit
/// emitter.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditRecord {
    pub session_id: SessionId,
    pub channel_uuid: ChannelId,
    pub owner_user_id: UserId,
    pub started_at: i64,
    pub ended_at: i64,
    pub duration_ms: i64,
    pub audio_format: AudioFormat,
    pub chunks_count: u64,
    pub total_bytes: u64,
    pub listener_count_at_start: usize,
    pub is_emergency: bool,
    pub network_quality: NetworkQuality,
    pub termination_reason: TerminationReason,
}

/// Summary handed back to the caller of `end_transmission` (§4.D.5).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransmissionSummary {
    pub session_id: SessionId,
    pub duration_ms: i64,
    pub chunks_count: u64,
    pub total_bytes: u64,
    pub reason: TerminationReason,
}
