use metrics::{counter, histogram};

/// Metric names under: {ns}_coordinator_*
///
/// Tracks the channel coordinator's transmission lifecycle and the
/// catalog/audit queries it depends on.
pub struct CoordinatorMetrics {
    ns: &'static str,
}

impl CoordinatorMetrics {
    pub fn new(namespace: &'static str) -> Self {
        Self { ns: namespace }
    }

    #[inline]
    pub fn transmission_started(&self, is_emergency: bool) {
        counter!(
            format!("{}_coordinator_transmissions_started_total", self.ns),
            "emergency" => if is_emergency { "true" } else { "false" }
        )
        .increment(1);
    }

    #[inline]
    pub fn transmission_ended(&self, reason: &'static str) {
        counter!(format!("{}_coordinator_transmissions_ended_total", self.ns), "reason" => reason)
            .increment(1);
    }

    #[inline]
    pub fn busy_rejected(&self) {
        counter!(format!("{}_coordinator_busy_rejected_total", self.ns)).increment(1);
    }

    #[inline]
    pub fn chunk_accepted(&self) {
        counter!(format!("{}_coordinator_chunks_accepted_total", self.ns)).increment(1);
    }

    #[inline]
    pub fn chunk_late_dropped(&self) {
        counter!(format!("{}_coordinator_chunks_late_dropped_total", self.ns)).increment(1);
    }

    #[inline]
    pub fn chunk_buffered_out_of_order(&self) {
        counter!(format!("{}_coordinator_chunks_buffered_total", self.ns)).increment(1);
    }

    #[inline]
    pub fn chunk_rejected(&self, reason: &'static str) {
        counter!(format!("{}_coordinator_chunks_rejected_total", self.ns), "reason" => reason)
            .increment(1);
    }

    #[inline]
    pub fn audit_retry(&self, attempt: u32) {
        counter!(format!("{}_coordinator_audit_retries_total", self.ns), "attempt" => attempt.to_string())
            .increment(1);
    }

    #[inline]
    pub fn audit_dropped(&self) {
        counter!(format!("{}_coordinator_audit_dropped_total", self.ns)).increment(1);
    }

    #[inline]
    pub fn db_seconds(&self, query: &'static str, seconds: f64) {
        histogram!(format!("{}_coordinator_db_seconds", self.ns), "query" => query).record(seconds);
    }
}
