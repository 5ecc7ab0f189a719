use std::sync::Arc;

use ptt_core::fanout::FanoutMetrics;
use ptt_metrics::FanoutMetricsImpl;

/// Bridges the core's [`FanoutMetrics`] collaborator trait onto the
/// concrete Prometheus counters in `ptt-metrics`, so `ptt-core` never
/// depends on a metrics crate directly.
pub struct FanoutMetricsAdapter {
    inner: Arc<FanoutMetricsImpl>,
}

impl FanoutMetricsAdapter {
    pub fn new(inner: Arc<FanoutMetricsImpl>) -> Self {
        Self { inner }
    }
}

impl FanoutMetrics for FanoutMetricsAdapter {
    fn listener_attached(&self) {
        self.inner.listener_attached();
    }

    fn listener_detached(&self) {
        self.inner.listener_detached();
    }

    fn listener_disconnected(&self, reason: &'static str) {
        self.inner.listener_disconnected(reason);
    }

    fn frame_sent(&self, fanout: usize) {
        self.inner.frame_sent(fanout);
    }

    fn frame_dropped(&self, reason: &'static str) {
        self.inner.frame_dropped(reason);
    }

    fn chunk_rx(&self, channel_route_hash: u32) {
        self.inner.per_channel_chunk_rx(channel_route_hash);
    }
}
