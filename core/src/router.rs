use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, info};

use crate::audit::AuditEmitter;
use crate::catalog::ChannelCatalog;
use crate::clock::Clock;
use crate::config::CoreConfig;
use crate::coordinator::CoordinatorHandle;
use crate::errors::{CoreError, CoreResult};
use crate::fanout::{FanoutEngine, FanoutMetrics};
use crate::ids::ChannelId;

/// Component G. Maps `channel_uuid` to its Coordinator, materializing
/// lazily on first reference (§4.G, §9 "Router lookup uses a concurrent
/// map with per-entry atomic initialization") and evicting idle entries.
/// `dashmap` gives per-shard locking so one channel's lookup never
/// contends with another's.
pub struct Router {
    coordinators: DashMap<ChannelId, CoordinatorHandle>,
    cfg: CoreConfig,
    clock: Arc<dyn Clock>,
    catalog: Arc<dyn ChannelCatalog>,
    audit: Arc<AuditEmitter>,
    fanout_metrics: Arc<dyn FanoutMetrics>,
}

impl Router {
    pub fn new(
        cfg: CoreConfig,
        clock: Arc<dyn Clock>,
        catalog: Arc<dyn ChannelCatalog>,
        audit: Arc<AuditEmitter>,
        fanout_metrics: Arc<dyn FanoutMetrics>,
    ) -> Self {
        Self {
            coordinators: DashMap::new(),
            cfg,
            clock,
            catalog,
            audit,
            fanout_metrics,
        }
    }

    /// Resolves (or lazily materializes) the Coordinator for `uuid`.
    /// Fails with `ChannelNotFound` if the catalog collaborator does not
    /// recognize the channel.
    pub async fn resolve(&self, uuid: &ChannelId) -> CoreResult<CoordinatorHandle> {
        if let Some(existing) = self.coordinators.get(uuid) {
            return Ok(existing.clone());
        }

        let channel_info = self
            .catalog
            .get_channel(uuid)
            .await
            .map_err(|e| CoreError::FatalChannel(e.to_string()))?
            .ok_or(CoreError::ChannelNotFound)?;

        // Re-check under the entry API to avoid a duplicate spawn if two
        // callers raced the lookup above.
        let entry = self
            .coordinators
            .entry(uuid.clone())
            .or_insert_with(|| {
                info!(channel_uuid = %uuid, "materializing channel coordinator");
                let fanout = Arc::new(FanoutEngine::new(
                    self.cfg.clone(),
                    uuid,
                    self.fanout_metrics.clone(),
                ));
                CoordinatorHandle::spawn(
                    channel_info,
                    self.cfg.clone(),
                    self.clock.clone(),
                    fanout,
                    self.audit.clone(),
                )
            });
        Ok(entry.clone())
    }

    /// Periodic eviction sweep (§4.G): removes coordinators reporting no
    /// participants and no active session. The caller is expected to run
    /// this on `COORDINATOR_EVICT_MS` (default 300 s).
    pub async fn sweep_evictable(&self) {
        let candidates: Vec<ChannelId> = self
            .coordinators
            .iter()
            .map(|entry| entry.key().clone())
            .collect();

        for uuid in candidates {
            let handle = match self.coordinators.get(&uuid) {
                Some(h) => h.clone(),
                None => continue,
            };
            if handle.is_evictable().await {
                handle.shutdown();
                self.coordinators.remove(&uuid);
                debug!(channel_uuid = %uuid, "evicted idle coordinator");
            }
        }
    }

    pub fn spawn_eviction_sweep(self: Arc<Self>) {
        let interval = Duration::from_millis(self.cfg.coordinator_evict_ms);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                self.sweep_evictable().await;
            }
        });
    }
}
