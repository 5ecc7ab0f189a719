//! Property tests for the universal invariants of §8 that are pure
//! functions of a sequence of inputs (1, 2, 5, 7). Invariants 3, 4, 6, 8
//! are about ordering of async events and are covered by the scenario
//! tests in `scenarios.rs` instead.

use base64::Engine;
use proptest::prelude::*;

use ptt_core::config::CoreConfig;
use ptt_core::ids::{ChannelId, DeviceToken, SessionId, UserId};
use ptt_core::model::{AudioFormat, NetworkQuality, StartTransmissionParams};
use ptt_core::session::TransmissionSession;

fn b64(s: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(s)
}

fn session_with(cfg: &CoreConfig) -> TransmissionSession {
    TransmissionSession::new(
        SessionId("sess_prop".into()),
        ChannelId::new("c1"),
        UserId::new("u1"),
        DeviceToken::new("d1"),
        0,
        StartTransmissionParams {
            audio_format: AudioFormat::Opus,
            sample_rate: 16_000,
            bitrate: 24_000,
            network_quality: NetworkQuality::Good,
            is_emergency: false,
        },
        1,
        cfg,
    )
}

proptest! {
    /// Invariant 2 (ordered fan-out): whatever permutation of sequence
    /// numbers 0..N arrives, the drained chunks handed to the fan-out
    /// engine are always in strictly increasing sequence order and no
    /// sequence is drained twice.
    #[test]
    fn ordered_fanout_holds_for_any_arrival_order(mut perm in proptest::collection::vec(0u64..12, 12)) {
        // Dedup input to a true permutation of a 0..N range by clamping
        // to a fixed small universe and rejecting duplicates artificially
        // introduced by the generator — just replay each value once sorted
        // by first-seen order so the test still explores arrival orders.
        perm.sort();
        perm.dedup();

        let cfg = CoreConfig::default();
        let mut session = session_with(&cfg);
        let mut delivered = Vec::new();
        let mut now = 0i64;

        // Re-derive a genuine permutation of 0..perm.len() from the
        // (deduped, sorted) seed so every sequence in the contiguous
        // range is exercised exactly once, but shuffle arrival order
        // deterministically from the seed itself.
        let n = perm.len() as u64;
        let mut arrival: Vec<u64> = (0..n).collect();
        for i in (1..arrival.len()).rev() {
            let j = (perm.get(i).copied().unwrap_or(0) as usize) % (i + 1);
            arrival.swap(i, j);
        }

        for seq in arrival {
            now += 1;
            let result = session
                .accept_chunk(now, seq, b64(b"x"), 1, &cfg)
                .expect("well-formed chunk should never be rejected");
            for chunk in result.drained {
                delivered.push(chunk.sequence);
            }
        }

        for w in delivered.windows(2) {
            prop_assert!(w[1] > w[0], "sequences must be strictly increasing: {:?}", delivered);
        }
        let mut seen = std::collections::HashSet::new();
        for seq in &delivered {
            prop_assert!(seen.insert(*seq), "sequence {} delivered twice", seq);
        }
    }

    /// Invariant 7 (round-trip accounting): after N accepted in-order
    /// chunks, `total_bytes`/`chunks_count` equal the sum/count of
    /// accepted payload sizes, excluding any late drops.
    #[test]
    fn chunk_accounting_round_trips(sizes in proptest::collection::vec(1usize..64, 1..20)) {
        let cfg = CoreConfig::default();
        let mut session = session_with(&cfg);
        let mut expected_bytes = 0u64;
        let mut now = 0i64;

        for (seq, size) in sizes.iter().enumerate() {
            now += 1;
            let payload = vec![b'a'; *size];
            session
                .accept_chunk(now, seq as u64, b64(&payload), *size, &cfg)
                .unwrap();
            expected_bytes += *size as u64;
        }

        prop_assert_eq!(session.chunks_count, sizes.len() as u64);
        prop_assert_eq!(session.total_bytes, expected_bytes);

        let record = session.close(now + 1, ptt_core::model::TerminationReason::ClientEnd);
        prop_assert_eq!(record.chunks_count, sizes.len() as u64);
        prop_assert_eq!(record.total_bytes, expected_bytes);
    }

    /// Invariant 5 (roster uniqueness): joining the same (user_id,
    /// device_token) twice is always rejected, regardless of how many
    /// other distinct participants were admitted first.
    #[test]
    fn roster_uniqueness_holds(distinct_count in 0usize..10) {
        use ptt_core::model::DeviceDescriptor;
        use ptt_core::{Clock, SystemClock};
        use ptt_core::participants::ParticipantRegistry;

        let clock = SystemClock;
        let mut reg = ParticipantRegistry::new();

        for i in 0..distinct_count {
            reg.join(
                &clock,
                UserId::new(format!("user-{i}")),
                format!("pilot-{i}"),
                DeviceToken::new(format!("dev-{i}")),
                DeviceDescriptor::default(),
                100,
            )
            .unwrap();
        }

        let dup_token = DeviceToken::new("dev-dup");
        reg.join(
            &clock,
            UserId::new("dup"),
            "dup".into(),
            dup_token.clone(),
            DeviceDescriptor::default(),
            100,
        )
        .unwrap();

        let err = reg
            .join(&clock, UserId::new("dup"), "dup".into(), dup_token, DeviceDescriptor::default(), 100)
            .unwrap_err();
        prop_assert!(matches!(err, ptt_core::CoreError::DuplicateDevice));

        let snapshot = reg.snapshot();
        let mut seen = std::collections::HashSet::new();
        for p in &snapshot {
            prop_assert!(seen.insert(p.device_token.clone()), "duplicate device token in roster");
        }
    }
}

/// Invariant 1 (single transmitter): `start_transmission` can never
/// succeed while a session is already active. This is exercised at the
/// Coordinator level in `scenarios.rs::s2_busy_rejection`, which is the
/// layer that actually owns `active_session`; restated here as a note so
/// the full set of 8 invariants is traceable to one test each.
#[allow(dead_code)]
const INVARIANT_1_COVERED_BY: &str = "scenarios::s2_busy_rejection";
