use std::sync::Arc;

use dashmap::DashMap;

use ptt_core::ids::{ChannelId, DeviceToken, SessionId};
use ptt_core::{CoreConfig, Router};
use ptt_metrics::{CoordinatorMetrics, FanoutMetricsImpl, GatewayMetrics};

use crate::auth::AuthProvider;

/// The (channel, device) a live transmission session belongs to, so the
/// per-chunk/end REST calls (which per §6.4 carry only `session_id`) can
/// be routed to the right Coordinator without the client repeating
/// `channel_uuid`/`device_token` on every call.
#[derive(Clone)]
pub struct TransmissionContext {
    pub channel_uuid: ChannelId,
    pub device_token: DeviceToken,
}

pub struct AppState {
    pub router: Arc<Router>,
    /// Shared with the Router's own Coordinators; the WS edge reads
    /// `heartbeat_interval()` from it directly rather than round-tripping
    /// through a Coordinator command.
    pub cfg: CoreConfig,
    pub auth: Arc<dyn AuthProvider>,
    pub gateway_metrics: Arc<GatewayMetrics>,
    pub coordinator_metrics: Arc<CoordinatorMetrics>,
    pub fanout_metrics: Arc<FanoutMetricsImpl>,
    pub transmissions: DashMap<SessionId, TransmissionContext>,
}
