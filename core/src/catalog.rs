use std::collections::HashMap;

use anyhow::Context;
use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::ids::ChannelId;
use crate::model::{ChannelInfo, ChannelType};

/// Channel catalog collaborator (§6.2): `get_channel` is synchronous from
/// the coordinator's point of view, but the trait is async so both a
/// Postgres-backed and an in-memory implementation satisfy it uniformly.
#[async_trait]
pub trait ChannelCatalog: Send + Sync {
    async fn get_channel(&self, uuid: &ChannelId) -> anyhow::Result<Option<ChannelInfo>>;
}

/// Dev/test catalog with no external dependency, mirroring
/// `InMemoryStore`'s role alongside a Postgres-backed repo.
#[derive(Default)]
pub struct InMemoryCatalog {
    channels: parking_lot::RwLock<HashMap<ChannelId, ChannelInfo>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, info: ChannelInfo) {
        self.channels.write().insert(info.uuid.clone(), info);
    }
}

#[async_trait]
impl ChannelCatalog for InMemoryCatalog {
    async fn get_channel(&self, uuid: &ChannelId) -> anyhow::Result<Option<ChannelInfo>> {
        Ok(self.channels.read().get(uuid).cloned())
    }
}

/// Postgres-backed catalog reading the `channels` table populated by the
/// REST CRUD surface (out of scope for the core itself, per §1).
pub struct PgChannelCatalog {
    pool: PgPool,
}

impl PgChannelCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChannelCatalog for PgChannelCatalog {
    async fn get_channel(&self, uuid: &ChannelId) -> anyhow::Result<Option<ChannelInfo>> {
        let row = sqlx::query(
            r#"
            SELECT uuid, name, max_participants, channel_type
            FROM channels
            WHERE uuid = $1
            "#,
        )
        .bind(&uuid.0)
        .fetch_optional(&self.pool)
        .await
        .context("get_channel")?;

        Ok(row.map(|r| ChannelInfo {
            uuid: ChannelId(r.get::<String, _>("uuid")),
            name: r.get::<String, _>("name"),
            max_participants: r.get::<i32, _>("max_participants") as u32,
            channel_type: match r.get::<String, _>("channel_type").as_str() {
                "emergency" => ChannelType::Emergency,
                _ => ChannelType::Standard,
            },
        }))
    }
}
