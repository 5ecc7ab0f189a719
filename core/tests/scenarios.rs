//! End-to-end scenario tests (S1-S6) exercised through the public
//! Coordinator/Router API, plus the universal invariants that are
//! awkward to express as pure-function property tests because they are
//! about ordering of async events (3, 4, 6, 8).

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;

use ptt_core::audit::AuditEmitter;
use ptt_core::audit::InMemoryAuditSink;
use ptt_core::catalog::InMemoryCatalog;
use ptt_core::config::CoreConfig;
use ptt_core::coordinator::CoordinatorHandle;
use ptt_core::fanout::{ListenerSink, NoopFanoutMetrics};
use ptt_core::ids::{ChannelId, DeviceToken, UserId};
use ptt_core::model::{
    AudioFormat, ChannelInfo, ChannelType, DeviceDescriptor, NetworkQuality, StartTransmissionParams,
};
use ptt_core::router::Router;
use ptt_core::{CoreError, SystemClock};

fn b64(s: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(s)
}

/// A listener socket double: captures every delivered frame (decoded
/// from its JSON payload) into a shared `Vec` in arrival order.
struct RecordingSink {
    events: Arc<Mutex<Vec<serde_json::Value>>>,
    closed_with: Arc<Mutex<Option<&'static str>>>,
    /// When set, `send_text` blocks forever — used to model a stalled
    /// listener (S6) that never reads from its socket.
    stall: bool,
}

impl RecordingSink {
    fn new() -> (Self, Arc<Mutex<Vec<serde_json::Value>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                events: events.clone(),
                closed_with: Arc::new(Mutex::new(None)),
                stall: false,
            },
            events,
        )
    }

    fn stalled() -> (Self, Arc<Mutex<Option<&'static str>>>) {
        let closed_with = Arc::new(Mutex::new(None));
        (
            Self {
                events: Arc::new(Mutex::new(Vec::new())),
                closed_with: closed_with.clone(),
                stall: true,
            },
            closed_with,
        )
    }
}

#[async_trait]
impl ListenerSink for RecordingSink {
    async fn send_text(&self, payload: String) -> Result<(), ()> {
        if self.stall {
            // Never completes: models a consumer that never reads.
            std::future::pending::<()>().await;
        }
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
        self.events.lock().unwrap().push(value);
        Ok(())
    }

    async fn close(&self, code: &'static str) {
        *self.closed_with.lock().unwrap() = Some(code);
    }
}

fn channel_info(uuid: &str, channel_type: ChannelType) -> ChannelInfo {
    ChannelInfo {
        uuid: ChannelId::new(uuid),
        name: "Launch ridge".into(),
        max_participants: 10,
        channel_type,
    }
}

async fn fresh_coordinator(cfg: CoreConfig, channel_type: ChannelType) -> CoordinatorHandle {
    let catalog = Arc::new(InMemoryCatalog::new());
    catalog.insert(channel_info("c1", channel_type));
    let clock = Arc::new(SystemClock);
    let audit = Arc::new(AuditEmitter::spawn(Arc::new(InMemoryAuditSink::new())));
    let router = Router::new(cfg, clock, catalog, audit, Arc::new(NoopFanoutMetrics));
    router.resolve(&ChannelId::new("c1")).await.unwrap()
}

async fn join(
    coord: &CoordinatorHandle,
    user: &str,
    device: &str,
) -> Arc<Mutex<Vec<serde_json::Value>>> {
    coord
        .join(
            UserId::new(user),
            format!("pilot-{user}"),
            DeviceToken::new(device),
            DeviceDescriptor::default(),
        )
        .await
        .unwrap();
    let (sink, events) = RecordingSink::new();
    coord
        .attach_socket(DeviceToken::new(device), Arc::new(sink))
        .await
        .unwrap();
    events
}

fn frame_type(v: &serde_json::Value) -> &str {
    v.get("type").and_then(|t| t.as_str()).unwrap()
}

fn opus_params(is_emergency: bool) -> StartTransmissionParams {
    StartTransmissionParams {
        audio_format: AudioFormat::Opus,
        sample_rate: 16_000,
        bitrate: 24_000,
        network_quality: NetworkQuality::Good,
        is_emergency,
    }
}

#[tokio::test]
async fn s1_happy_path() {
    let coord = fresh_coordinator(CoreConfig::default(), ChannelType::Standard).await;
    let b_events = join(&coord, "b", "dev-b").await;
    let _a_events = join(&coord, "a", "dev-a").await;

    let session_id = coord
        .start_transmission(UserId::new("a"), DeviceToken::new("dev-a"), opus_params(false))
        .await
        .unwrap();

    for (seq, payload) in [(0u64, "aaa"), (1, "bbb"), (2, "ccc")] {
        coord
            .submit_chunk(DeviceToken::new("dev-a"), seq, b64(payload), 3)
            .await
            .unwrap();
    }

    let summary = coord
        .end_transmission(DeviceToken::new("dev-a"), 1500)
        .await
        .unwrap();
    assert_eq!(summary.chunks_count, 3);
    assert_eq!(summary.total_bytes, 9);

    tokio::time::sleep(Duration::from_millis(20)).await;

    let frames: Vec<String> = b_events
        .lock()
        .unwrap()
        .iter()
        .map(|v| frame_type(v).to_string())
        .collect();
    assert_eq!(
        frames,
        vec![
            "participant_join",
            "transmission_started",
            "audio_chunk",
            "audio_chunk",
            "audio_chunk",
            "transmission_ended",
        ]
    );
    let _ = session_id;
}

#[tokio::test]
async fn s2_busy_rejection() {
    let coord = fresh_coordinator(CoreConfig::default(), ChannelType::Standard).await;
    let _ = join(&coord, "a", "dev-a").await;
    let _ = join(&coord, "b", "dev-b").await;

    coord
        .start_transmission(UserId::new("a"), DeviceToken::new("dev-a"), opus_params(false))
        .await
        .unwrap();

    let err = coord
        .start_transmission(UserId::new("b"), DeviceToken::new("dev-b"), opus_params(false))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Busy));
}

#[tokio::test]
async fn s3_out_of_order_and_late() {
    let coord = fresh_coordinator(CoreConfig::default(), ChannelType::Standard).await;
    let _ = join(&coord, "a", "dev-a").await;
    let b_events = join(&coord, "b", "dev-b").await;

    coord
        .start_transmission(UserId::new("a"), DeviceToken::new("dev-a"), opus_params(false))
        .await
        .unwrap();

    let seqs = [(0u64, "aaa"), (2, "ccc"), (1, "bbb"), (3, "ddd"), (1, "bbb")];
    let mut last_ack = 0;
    for (seq, payload) in seqs {
        let ack = coord
            .submit_chunk(DeviceToken::new("dev-a"), seq, b64(payload), 3)
            .await
            .unwrap();
        last_ack = ack.next_expected_sequence;
    }
    assert_eq!(last_ack, 4);

    tokio::time::sleep(Duration::from_millis(20)).await;
    let chunk_seqs: Vec<u64> = b_events
        .lock()
        .unwrap()
        .iter()
        .filter(|v| frame_type(v) == "audio_chunk")
        .map(|v| v.get("sequence").unwrap().as_u64().unwrap())
        .collect();
    assert_eq!(chunk_seqs, vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn s4_owner_disconnect_closes_session() {
    let coord = fresh_coordinator(CoreConfig::default(), ChannelType::Standard).await;
    let _ = join(&coord, "a", "dev-a").await;
    let b_events = join(&coord, "b", "dev-b").await;

    coord
        .start_transmission(UserId::new("a"), DeviceToken::new("dev-a"), opus_params(false))
        .await
        .unwrap();
    coord
        .submit_chunk(DeviceToken::new("dev-a"), 0, b64("aaa"), 3)
        .await
        .unwrap();

    coord.leave(DeviceToken::new("dev-a")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let frames = b_events.lock().unwrap().clone();
    let ended = frames
        .iter()
        .find(|v| frame_type(v) == "transmission_ended")
        .expect("expected transmission_ended frame");
    assert_eq!(ended.get("reason").unwrap().as_str().unwrap(), "owner_disconnect");

    let err = coord
        .submit_chunk(DeviceToken::new("dev-a"), 1, b64("bbb"), 3)
        .await;
    assert!(err.is_err());
}

#[tokio::test]
async fn s5_deadline_force_closes_session() {
    let mut cfg = CoreConfig::default();
    cfg.max_transmission_ms = 50;
    cfg.idle_sweep_ms = 10;
    let coord = fresh_coordinator(cfg, ChannelType::Standard).await;
    let _ = join(&coord, "a", "dev-a").await;
    let b_events = join(&coord, "b", "dev-b").await;

    coord
        .start_transmission(UserId::new("a"), DeviceToken::new("dev-a"), opus_params(false))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;

    let frames = b_events.lock().unwrap().clone();
    let ended = frames
        .iter()
        .find(|v| frame_type(v) == "transmission_ended")
        .expect("expected transmission_ended frame after deadline");
    assert_eq!(ended.get("reason").unwrap().as_str().unwrap(), "deadline");

    let err = coord
        .submit_chunk(DeviceToken::new("dev-a"), 0, b64("aaa"), 3)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NoSession));
}

#[tokio::test]
async fn s6_slow_listener_disconnected_without_blocking_others() {
    let mut cfg = CoreConfig::default();
    cfg.listener_queue_msgs = 8;
    cfg.listener_write_timeout_ms = 30;
    let coord = fresh_coordinator(cfg, ChannelType::Standard).await;

    coord
        .join(
            UserId::new("a"),
            "pilot-a".into(),
            DeviceToken::new("dev-a"),
            DeviceDescriptor::default(),
        )
        .await
        .unwrap();
    let (a_sink, a_events) = RecordingSink::new();
    coord
        .attach_socket(DeviceToken::new("dev-a"), Arc::new(a_sink))
        .await
        .unwrap();

    coord
        .join(
            UserId::new("b"),
            "pilot-b".into(),
            DeviceToken::new("dev-b"),
            DeviceDescriptor::default(),
        )
        .await
        .unwrap();
    let (c_sink, c_closed) = RecordingSink::stalled();
    coord
        .attach_socket(DeviceToken::new("dev-b"), Arc::new(c_sink))
        .await
        .unwrap();

    coord
        .join(
            UserId::new("z"),
            "pilot-z".into(),
            DeviceToken::new("dev-z"),
            DeviceDescriptor::default(),
        )
        .await
        .unwrap();
    let (b_sink, b_events) = RecordingSink::new();
    coord
        .attach_socket(DeviceToken::new("dev-z"), Arc::new(b_sink))
        .await
        .unwrap();

    coord
        .start_transmission(UserId::new("a"), DeviceToken::new("dev-a"), opus_params(false))
        .await
        .unwrap();

    for seq in 0..200u64 {
        coord
            .submit_chunk(DeviceToken::new("dev-a"), seq, b64("x"), 1)
            .await
            .unwrap();
    }

    tokio::time::sleep(Duration::from_millis(100)).await;

    let b_chunks = b_events
        .lock()
        .unwrap()
        .iter()
        .filter(|v| frame_type(v) == "audio_chunk")
        .count();
    assert_eq!(b_chunks, 200);
    assert!(c_closed.lock().unwrap().is_some());
    let _ = a_events;
}
