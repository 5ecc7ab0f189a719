use std::collections::BTreeMap;

use base64::Engine;

use crate::config::CoreConfig;
use crate::errors::{CoreError, CoreResult};
use crate::ids::{ChannelId, DeviceToken, SessionId, UserId};
use crate::model::{
    AudioFormat, AuditRecord, BufferedChunk, ChunkOutcome, NetworkQuality, StartTransmissionParams,
    TerminationReason,
};

/// Component C: the state of one active transmission. Owned exclusively
/// by its Channel Coordinator; never shared.
pub struct TransmissionSession {
    pub session_id: SessionId,
    pub channel_uuid: ChannelId,
    pub owner_user_id: UserId,
    pub owner_device_token: DeviceToken,
    pub started_at: i64,
    pub deadline: i64,
    pub audio_format: AudioFormat,
    pub sample_rate: u32,
    pub bitrate: u32,
    pub network_quality: NetworkQuality,
    pub is_emergency: bool,
    pub expected_sequence: u64,
    /// Contiguous accepted chunks, drained as they are delivered — the
    /// fan-out engine consumes these immediately so this stays small.
    /// Out-of-order arrivals land in `pending`, keyed by sequence, until
    /// the gap closes.
    pending: BTreeMap<u64, BufferedChunk>,
    pub total_bytes: u64,
    pub chunks_count: u64,
    pub listener_count_at_start: usize,
}

/// Outcome of `accept_chunk`, including the drained contiguous run ready
/// for fan-out in order (§4.C, §4.D.4).
pub struct AcceptResult {
    pub outcome: ChunkOutcome,
    pub next_expected: u64,
    pub drained: Vec<BufferedChunk>,
}

impl TransmissionSession {
    pub fn new(
        session_id: SessionId,
        channel_uuid: ChannelId,
        owner_user_id: UserId,
        owner_device_token: DeviceToken,
        started_at: i64,
        params: StartTransmissionParams,
        listener_count_at_start: usize,
        cfg: &CoreConfig,
    ) -> Self {
        let deadline = started_at + cfg.max_transmission_ms(params.is_emergency) as i64;
        Self {
            session_id,
            channel_uuid,
            owner_user_id,
            owner_device_token,
            started_at,
            deadline,
            audio_format: params.audio_format,
            sample_rate: params.sample_rate,
            bitrate: params.bitrate,
            network_quality: params.network_quality,
            is_emergency: params.is_emergency,
            expected_sequence: 0,
            pending: BTreeMap::new(),
            total_bytes: 0,
            chunks_count: 0,
            listener_count_at_start,
        }
    }

    pub fn is_past_deadline(&self, now: i64) -> bool {
        now >= self.deadline
    }

    /// §4.C `accept_chunk`: validates, orders, and (for in-order arrival)
    /// drains any contiguous buffered successors.
    pub fn accept_chunk(
        &mut self,
        now: i64,
        sequence: u64,
        payload_b64: String,
        reported_size: usize,
        cfg: &CoreConfig,
    ) -> CoreResult<AcceptResult> {
        if self.is_past_deadline(now) {
            return Err(CoreError::NoSession);
        }
        if reported_size > cfg.max_chunk_bytes {
            return Err(CoreError::Validation("chunk exceeds MAX_CHUNK_BYTES"));
        }
        let decoded_len = base64::engine::general_purpose::STANDARD
            .decode(&payload_b64)
            .map_err(|_| CoreError::Validation("payload is not valid base64"))?
            .len();
        if decoded_len != reported_size {
            return Err(CoreError::Validation("reported_size does not match decoded payload"));
        }

        if sequence < self.expected_sequence {
            // Late: acknowledged success, silently dropped, counters untouched.
            return Ok(AcceptResult {
                outcome: ChunkOutcome::Late,
                next_expected: self.expected_sequence,
                drained: Vec::new(),
            });
        }

        let expires_at = now + cfg.chunk_buffer_ttl_ms as i64;
        let chunk = BufferedChunk {
            sequence,
            payload_b64,
            size_bytes: reported_size,
            received_at: now,
            expires_at,
        };

        if sequence == self.expected_sequence {
            let mut drained = vec![chunk];
            self.expected_sequence += 1;
            self.record_accepted(reported_size);

            while let Some(next) = self.pending.remove(&self.expected_sequence) {
                let size = next.size_bytes;
                drained.push(next);
                self.expected_sequence += 1;
                self.record_accepted(size);
            }

            Ok(AcceptResult {
                outcome: ChunkOutcome::Accepted,
                next_expected: self.expected_sequence,
                drained,
            })
        } else {
            let window_end = self.expected_sequence + cfg.out_of_order_window as u64;
            if sequence > window_end {
                return Err(CoreError::Validation("sequence beyond out-of-order window"));
            }
            self.pending.insert(sequence, chunk);
            Ok(AcceptResult {
                outcome: ChunkOutcome::BufferedOutOfOrder,
                next_expected: self.expected_sequence,
                drained: Vec::new(),
            })
        }
    }

    fn record_accepted(&mut self, size_bytes: usize) {
        self.chunks_count += 1;
        self.total_bytes += size_bytes as u64;
    }

    /// Removes chunks past their TTL from the out-of-order buffer; does
    /// not touch `expected_sequence` or the accounting counters.
    pub fn expire_old_chunks(&mut self, now: i64) {
        self.pending.retain(|_, c| c.expires_at > now);
    }

    pub fn close(self, now: i64, reason: TerminationReason) -> AuditRecord {
        AuditRecord {
            session_id: self.session_id,
            channel_uuid: self.channel_uuid,
            owner_user_id: self.owner_user_id,
            started_at: self.started_at,
            ended_at: now,
            duration_ms: now - self.started_at,
            audio_format: self.audio_format,
            chunks_count: self.chunks_count,
            total_bytes: self.total_bytes,
            listener_count_at_start: self.listener_count_at_start,
            is_emergency: self.is_emergency,
            network_quality: self.network_quality,
            termination_reason: reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> StartTransmissionParams {
        StartTransmissionParams {
            audio_format: AudioFormat::Opus,
            sample_rate: 16_000,
            bitrate: 24_000,
            network_quality: NetworkQuality::Good,
            is_emergency: false,
        }
    }

    fn new_session(cfg: &CoreConfig) -> TransmissionSession {
        TransmissionSession::new(
            SessionId("sess_test".into()),
            ChannelId::new("c1"),
            UserId::new("u1"),
            DeviceToken::new("d1"),
            0,
            params(),
            1,
            cfg,
        )
    }

    fn b64(s: &str) -> String {
        base64::engine::general_purpose::STANDARD.encode(s)
    }

    #[test]
    fn in_order_chunks_drain_immediately() {
        let cfg = CoreConfig::default();
        let mut sess = new_session(&cfg);
        let r = sess.accept_chunk(10, 0, b64("aaa"), 3, &cfg).unwrap();
        assert_eq!(r.outcome, ChunkOutcome::Accepted);
        assert_eq!(r.drained.len(), 1);
        assert_eq!(r.next_expected, 1);
    }

    #[test]
    fn out_of_order_then_fill_drains_contiguous_run() {
        let cfg = CoreConfig::default();
        let mut sess = new_session(&cfg);
        // S3 scenario: 0, 2, 1, 3, 1(dup-late)
        let r0 = sess.accept_chunk(0, 0, b64("aaa"), 3, &cfg).unwrap();
        assert_eq!(r0.drained.len(), 1);

        let r2 = sess.accept_chunk(1, 2, b64("ccc"), 3, &cfg).unwrap();
        assert_eq!(r2.outcome, ChunkOutcome::BufferedOutOfOrder);
        assert!(r2.drained.is_empty());

        let r1 = sess.accept_chunk(2, 1, b64("bbb"), 3, &cfg).unwrap();
        assert_eq!(r1.outcome, ChunkOutcome::Accepted);
        assert_eq!(r1.drained.len(), 2);
        assert_eq!(r1.drained[0].sequence, 1);
        assert_eq!(r1.drained[1].sequence, 2);

        let r3 = sess.accept_chunk(3, 3, b64("ddd"), 3, &cfg).unwrap();
        assert_eq!(r3.drained.len(), 1);
        assert_eq!(r3.next_expected, 4);

        let late = sess.accept_chunk(4, 1, b64("bbb"), 3, &cfg).unwrap();
        assert_eq!(late.outcome, ChunkOutcome::Late);
        assert_eq!(late.next_expected, 4);
        assert!(late.drained.is_empty());

        assert_eq!(sess.chunks_count, 4);
        assert_eq!(sess.total_bytes, 12);
    }

    #[test]
    fn oversize_chunk_rejected() {
        let mut cfg = CoreConfig::default();
        cfg.max_chunk_bytes = 2;
        let mut sess = new_session(&cfg);
        let err = sess.accept_chunk(0, 0, b64("aaa"), 3, &cfg).unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn mismatched_reported_size_rejected() {
        let cfg = CoreConfig::default();
        let mut sess = new_session(&cfg);
        let err = sess.accept_chunk(0, 0, b64("aaa"), 999, &cfg).unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn past_deadline_rejects_chunks() {
        let cfg = CoreConfig::default();
        let mut sess = new_session(&cfg);
        let err = sess
            .accept_chunk(sess.deadline, 0, b64("aaa"), 3, &cfg)
            .unwrap_err();
        assert!(matches!(err, CoreError::NoSession));
    }

    #[test]
    fn close_produces_audit_record_with_accurate_duration() {
        let cfg = CoreConfig::default();
        let mut sess = new_session(&cfg);
        sess.accept_chunk(0, 0, b64("aaa"), 3, &cfg).unwrap();
        let record = sess.close(1500, TerminationReason::ClientEnd);
        assert_eq!(record.duration_ms, 1500);
        assert_eq!(record.chunks_count, 1);
        assert_eq!(record.total_bytes, 3);
        assert_eq!(record.termination_reason, TerminationReason::ClientEnd);
    }
}
