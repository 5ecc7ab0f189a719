use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json;
use tokio::sync::mpsc;
use tracing::warn;

use crate::config::CoreConfig;
use crate::events::ServerEvent;
use crate::ids::{ChannelId, DeviceToken};

/// Sink a listener's writer task drains. The gateway implements this over
/// a real WebSocket sink; tests use an in-memory channel.
#[async_trait]
pub trait ListenerSink: Send + Sync {
    async fn send_text(&self, payload: String) -> Result<(), ()>;
    async fn close(&self, code: &'static str);
}

/// Metrics collaborator for the Fan-out Engine (§9's ambient-instrumentation
/// note): kept as a trait, like [`crate::catalog::ChannelCatalog`] and
/// [`crate::audit::AuditSink`], so the core never depends on a concrete
/// metrics crate directly.
pub trait FanoutMetrics: Send + Sync {
    fn listener_attached(&self);
    fn listener_detached(&self);
    fn listener_disconnected(&self, reason: &'static str);
    fn frame_sent(&self, fanout: usize);
    fn frame_dropped(&self, reason: &'static str);
    fn chunk_rx(&self, channel_route_hash: u32);
}

/// No-op implementation for tests and any caller that doesn't need
/// metrics wired up.
pub struct NoopFanoutMetrics;

impl FanoutMetrics for NoopFanoutMetrics {
    fn listener_attached(&self) {}
    fn listener_detached(&self) {}
    fn listener_disconnected(&self, _reason: &'static str) {}
    fn frame_sent(&self, _fanout: usize) {}
    fn frame_dropped(&self, _reason: &'static str) {}
    fn chunk_rx(&self, _channel_route_hash: u32) {}
}

fn channel_route_hash(uuid: &ChannelId) -> u32 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    uuid.0.hash(&mut hasher);
    hasher.finish() as u32
}

struct QueuedMessage {
    payload: String,
    byte_len: usize,
    is_control: bool,
}

/// Per-listener bounded outbound queue (§4.E). One instance owns one
/// writer task so a single slow consumer never blocks the others;
/// the Coordinator only ever touches the cheap `mpsc::Sender` handle.
struct ListenerQueue {
    tx: mpsc::UnboundedSender<QueuedMessage>,
}

/// Component E: serializes one message once, fans it out to every
/// listener's independent writer task, and applies the drop-oldest-audio
/// backpressure policy (§4.E, §9) per listener.
pub struct FanoutEngine {
    cfg: CoreConfig,
    queues: tokio::sync::RwLock<HashMap<DeviceToken, ListenerQueue>>,
    metrics: Arc<dyn FanoutMetrics>,
    channel_route_hash: u32,
}

impl FanoutEngine {
    pub fn new(cfg: CoreConfig, channel_uuid: &ChannelId, metrics: Arc<dyn FanoutMetrics>) -> Self {
        Self {
            cfg,
            queues: tokio::sync::RwLock::new(HashMap::new()),
            metrics,
            channel_route_hash: channel_route_hash(channel_uuid),
        }
    }

    /// Registers a listener socket, spawning its dedicated writer task.
    /// The queue itself is unbounded at the `mpsc` layer — capacity is
    /// enforced in-task against `listener_queue_msgs`/`listener_queue_bytes`
    /// so the drop-oldest-audio policy can run synchronously with queueing
    /// rather than racing `mpsc`'s own backpressure.
    pub async fn attach(&self, device_token: DeviceToken, sink: Arc<dyn ListenerSink>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<QueuedMessage>();
        let max_msgs = self.cfg.listener_queue_msgs;
        let max_bytes = self.cfg.listener_queue_bytes;
        let write_timeout = Duration::from_millis(self.cfg.listener_write_timeout_ms);
        let token_for_task = device_token.clone();
        let metrics = self.metrics.clone();

        tokio::spawn(async move {
            let mut backlog: VecDeque<QueuedMessage> = VecDeque::new();
            let mut backlog_bytes = 0usize;

            while let Some(msg) = rx.recv().await {
                let dropped =
                    enqueue_with_backpressure(&mut backlog, &mut backlog_bytes, msg, max_msgs, max_bytes);
                for _ in 0..dropped {
                    metrics.frame_dropped("queue_overflow");
                }

                while let Some(next) = backlog.pop_front() {
                    backlog_bytes -= next.byte_len;
                    match tokio::time::timeout(write_timeout, sink.send_text(next.payload)).await {
                        Ok(Ok(())) => {}
                        Ok(Err(())) => {
                            warn!(device_token = %token_for_task, "listener write failed, detaching");
                            metrics.listener_disconnected("slow_consumer");
                            sink.close("slow_consumer").await;
                            return;
                        }
                        Err(_elapsed) => {
                            warn!(device_token = %token_for_task, "listener write stalled past timeout, detaching");
                            metrics.listener_disconnected("slow_consumer");
                            sink.close("slow_consumer").await;
                            return;
                        }
                    }
                }
            }
        });

        self.queues
            .write()
            .await
            .insert(device_token, ListenerQueue { tx });
        self.metrics.listener_attached();
    }

    pub async fn detach(&self, device_token: &DeviceToken) {
        if self.queues.write().await.remove(device_token).is_some() {
            self.metrics.listener_detached();
        }
    }

    /// Serializes `event` once and enqueues it for every listed listener.
    /// Listeners not currently attached are silently skipped (tolerates
    /// the removal races §3 names for the Fan-out Engine's weak
    /// references into the participant map).
    pub async fn broadcast(&self, listeners: &[DeviceToken], event: &ServerEvent) {
        let payload = match serde_json::to_string(event) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "failed to serialize outbound event");
                return;
            }
        };
        let is_control = event.is_control_frame();
        let byte_len = payload.len();

        let queues = self.queues.read().await;
        let mut delivered = 0usize;
        for token in listeners {
            if let Some(q) = queues.get(token) {
                if q.tx
                    .send(QueuedMessage {
                        payload: payload.clone(),
                        byte_len,
                        is_control,
                    })
                    .is_ok()
                {
                    delivered += 1;
                }
            }
        }
        if delivered > 0 {
            self.metrics.frame_sent(delivered);
        }
        if matches!(event, ServerEvent::AudioChunk { .. }) {
            self.metrics.chunk_rx(self.channel_route_hash);
        }
    }
}

/// Drop-oldest-audio-first backpressure: control frames are never
/// dropped; if the backlog still overflows after dropping every droppable
/// audio message, the newest message itself is the one discarded.
/// Returns the number of messages dropped to bring the backlog back
/// within its caps.
fn enqueue_with_backpressure(
    backlog: &mut VecDeque<QueuedMessage>,
    backlog_bytes: &mut usize,
    msg: QueuedMessage,
    max_msgs: usize,
    max_bytes: usize,
) -> usize {
    backlog.push_back(msg);
    *backlog_bytes += backlog.back().unwrap().byte_len;

    let mut dropped = 0usize;
    while backlog.len() > max_msgs || *backlog_bytes > max_bytes {
        let drop_idx = backlog.iter().position(|m| !m.is_control);
        match drop_idx {
            Some(idx) => {
                let removed = backlog.remove(idx).expect("index just found");
                *backlog_bytes -= removed.byte_len;
                dropped += 1;
            }
            None => {
                // Nothing droppable (all control frames) — give up further
                // shrinking; the caller's send loop will drain regardless.
                break;
            }
        }
    }
    dropped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(is_control: bool, byte_len: usize) -> QueuedMessage {
        QueuedMessage {
            payload: "x".repeat(byte_len),
            byte_len,
            is_control,
        }
    }

    #[test]
    fn drops_oldest_audio_before_control() {
        let mut backlog = VecDeque::new();
        let mut bytes = 0usize;
        enqueue_with_backpressure(&mut backlog, &mut bytes, msg(false, 10), 2, 1000);
        enqueue_with_backpressure(&mut backlog, &mut bytes, msg(true, 10), 2, 1000);
        enqueue_with_backpressure(&mut backlog, &mut bytes, msg(false, 10), 2, 1000);

        // capacity 2: the first audio message should have been dropped,
        // leaving the control frame and the newest audio frame.
        assert_eq!(backlog.len(), 2);
        assert!(backlog.iter().any(|m| m.is_control));
    }

    #[test]
    fn never_drops_control_frames() {
        let mut backlog = VecDeque::new();
        let mut bytes = 0usize;
        for _ in 0..5 {
            enqueue_with_backpressure(&mut backlog, &mut bytes, msg(true, 10), 2, 1000);
        }
        assert!(backlog.iter().all(|m| m.is_control));
    }
}
