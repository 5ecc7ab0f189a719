use std::time::Duration;

/// Tunables enumerated in §6.5, carried as a plain struct with defaults
/// rather than a CLI parser — the process-level overlay (env-prefixed
/// flags) lives in the gateway binary, mirroring the split between the
/// teacher's in-crate `ControlConfig` and its binary's `clap`-derived
/// `Config`.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub max_transmission_ms: u64,
    pub max_transmission_ms_emergency: u64,
    pub max_chunk_bytes: usize,
    pub chunk_buffer_ttl_ms: u64,
    pub out_of_order_window: usize,
    pub listener_queue_msgs: usize,
    pub listener_queue_bytes: usize,
    pub idle_participant_ms: u64,
    pub idle_sweep_ms: u64,
    pub coordinator_evict_ms: u64,
    pub heartbeat_ms: u64,
    /// Configured envelope for `start_transmission`'s `FAIL(invalid_params)`
    /// precondition (§4.D.3). spec.md names the check but not the bounds;
    /// these match a typical voice-codec range (narrowband-to-wideband
    /// sample rates, Opus-class low-bitrate voice) — see DESIGN.md.
    pub sample_rate_min_hz: u32,
    pub sample_rate_max_hz: u32,
    pub bitrate_min_bps: u32,
    pub bitrate_max_bps: u32,
    /// Not named in §6.5 directly: a listener whose writer cannot drain a
    /// single queued message within this window is treated as the
    /// "still over" case of §4.E's overflow policy and disconnected with
    /// `slow_consumer`, even if dropping audio would otherwise keep the
    /// backlog under its size cap (see DESIGN.md).
    pub listener_write_timeout_ms: u64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            max_transmission_ms: 60_000,
            max_transmission_ms_emergency: 300_000,
            max_chunk_bytes: 65_536,
            chunk_buffer_ttl_ms: 30_000,
            out_of_order_window: 8,
            listener_queue_msgs: 64,
            listener_queue_bytes: 1_048_576,
            idle_participant_ms: 120_000,
            idle_sweep_ms: 30_000,
            coordinator_evict_ms: 300_000,
            heartbeat_ms: 30_000,
            listener_write_timeout_ms: 5_000,
            sample_rate_min_hz: 8_000,
            sample_rate_max_hz: 48_000,
            bitrate_min_bps: 6_000,
            bitrate_max_bps: 64_000,
        }
    }
}

impl CoreConfig {
    pub fn max_transmission_ms(&self, is_emergency: bool) -> u64 {
        if is_emergency {
            self.max_transmission_ms_emergency
        } else {
            self.max_transmission_ms
        }
    }

    pub fn idle_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.idle_sweep_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms)
    }
}
