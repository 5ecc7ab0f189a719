use metrics::{counter, histogram};

use crate::labels::LabelPolicy;

/// Metric names under: {ns}_fanout_*
pub struct FanoutMetricsImpl {
    ns: &'static str,
    policy: LabelPolicy,
}

impl FanoutMetricsImpl {
    pub fn new(namespace: &'static str, policy: LabelPolicy) -> Self {
        Self { ns: namespace, policy }
    }

    #[inline]
    pub fn listener_attached(&self) {
        counter!(format!("{}_fanout_listeners_attached_total", self.ns)).increment(1);
    }

    #[inline]
    pub fn listener_detached(&self) {
        counter!(format!("{}_fanout_listeners_detached_total", self.ns)).increment(1);
    }

    #[inline]
    pub fn listener_disconnected(&self, reason: &'static str) {
        counter!(
            format!("{}_fanout_listeners_disconnected_total", self.ns),
            "reason" => self.policy.reason(reason).as_str().to_string()
        )
        .increment(1);
    }

    #[inline]
    pub fn frame_sent(&self, fanout: usize) {
        counter!(format!("{}_fanout_frames_sent_total", self.ns)).increment(1);
        histogram!(format!("{}_fanout_fanout_width", self.ns)).record(fanout as f64);
    }

    #[inline]
    pub fn frame_dropped(&self, reason: &'static str) {
        counter!(
            format!("{}_fanout_frames_dropped_total", self.ns),
            "reason" => self.policy.reason(reason).as_str().to_string()
        )
        .increment(1);
    }

    #[inline]
    pub fn queue_overflow_drop(&self) {
        self.frame_dropped("queue_overflow");
    }

    #[inline]
    pub fn per_channel_chunk_rx(&self, channel_route_hash: u32) {
        counter!(
            format!("{}_fanout_chunks_rx_by_channel_total", self.ns),
            "ch" => self.policy.channel_bucket(channel_route_hash).as_str().to_string()
        )
        .increment(1);
    }
}
