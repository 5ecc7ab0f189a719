use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::warn;

use crate::model::AuditRecord;

/// Persistence collaborator for audit records (§6.3). `append_audit` is
/// fire-and-forget with acknowledgement; the emitter owns all retry
/// policy so the sink implementation stays a thin adapter.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append_audit(&self, record: AuditRecord) -> anyhow::Result<()>;
}

const BACKOFF_START_MS: u64 = 1_000;
const BACKOFF_CAP_MS: u64 = 60_000;
const MAX_ATTEMPTS: u32 = 10;

/// Component F. Runs its own task draining an unbounded queue so the
/// Coordinator's `close()` call never blocks on storage latency (§4.F,
/// §9 "audit decoupling").
pub struct AuditEmitter {
    tx: mpsc::UnboundedSender<AuditRecord>,
}

impl AuditEmitter {
    pub fn spawn(sink: Arc<dyn AuditSink>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<AuditRecord>();

        tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                Self::emit_with_retry(sink.as_ref(), record).await;
            }
        });

        Self { tx }
    }

    /// Hands a record to the emitter task. Never blocks; drops the
    /// record only if the background task has already exited, which
    /// only happens at process shutdown.
    pub fn emit(&self, record: AuditRecord) {
        if self.tx.send(record).is_err() {
            warn!("audit emitter task is gone, dropping audit record");
        }
    }

    async fn emit_with_retry(sink: &dyn AuditSink, record: AuditRecord) {
        let mut delay_ms = BACKOFF_START_MS;
        for attempt in 1..=MAX_ATTEMPTS {
            match sink.append_audit(record.clone()).await {
                Ok(()) => return,
                Err(e) => {
                    warn!(
                        attempt,
                        session_id = %record.session_id,
                        error = %e,
                        "audit append failed, retrying"
                    );
                    if attempt == MAX_ATTEMPTS {
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    delay_ms = (delay_ms * 2).min(BACKOFF_CAP_MS);
                }
            }
        }
        warn!(
            session_id = %record.session_id,
            "audit record dropped after exhausting retries"
        );
    }
}

/// Always-succeeds sink for tests and local development without a
/// database.
pub struct InMemoryAuditSink {
    records: parking_lot::Mutex<Vec<AuditRecord>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self {
            records: parking_lot::Mutex::new(Vec::new()),
        }
    }

    pub fn snapshot(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }
}

impl Default for InMemoryAuditSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn append_audit(&self, record: AuditRecord) -> anyhow::Result<()> {
        self.records.lock().push(record);
        Ok(())
    }
}

/// Postgres-backed sink writing into the `audit_log` table, mirroring
/// `PgControlRepo::insert_audit`.
pub struct PgAuditSink {
    pool: sqlx::PgPool,
}

impl PgAuditSink {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for PgAuditSink {
    async fn append_audit(&self, record: AuditRecord) -> anyhow::Result<()> {
        use anyhow::Context;

        sqlx::query(
            r#"
            INSERT INTO audit_log (
                session_id, channel_uuid, owner_user_id, started_at, ended_at,
                duration_ms, audio_format, chunks_count, total_bytes,
                listener_count_at_start, is_emergency, network_quality,
                termination_reason
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(record.session_id.0)
        .bind(record.channel_uuid.0)
        .bind(record.owner_user_id.0)
        .bind(record.started_at)
        .bind(record.ended_at)
        .bind(record.duration_ms)
        .bind(format!("{:?}", record.audio_format))
        .bind(record.chunks_count as i64)
        .bind(record.total_bytes as i64)
        .bind(record.listener_count_at_start as i32)
        .bind(record.is_emergency)
        .bind(format!("{:?}", record.network_quality))
        .bind(format!("{:?}", record.termination_reason))
        .execute(&self.pool)
        .await
        .context("insert audit_log")?;
        Ok(())
    }
}
