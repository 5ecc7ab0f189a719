mod auth;
mod config;
mod error;
mod metrics_adapter;
mod routes;
mod state;
mod ws;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use dashmap::DashMap;
use tokio::net::TcpListener;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

use ptt_core::audit::{AuditEmitter, AuditSink, InMemoryAuditSink, PgAuditSink};
use ptt_core::catalog::{ChannelCatalog, InMemoryCatalog, PgChannelCatalog};
use ptt_core::model::{ChannelInfo, ChannelType};
use ptt_core::fanout::FanoutMetrics;
use ptt_core::ids::ChannelId;
use ptt_core::{CoreConfig, Router as CoreRouter, SystemClock};
use ptt_metrics::labels::LabelPolicy;
use ptt_metrics::{CoordinatorMetrics, FanoutMetricsImpl, GatewayMetrics, MetricsConfig, MetricsServer};

use crate::auth::StaticAuthProvider;
use crate::config::Config;
use crate::metrics_adapter::FanoutMetricsAdapter;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let cfg = Config::parse();

    let metrics_server = MetricsServer::install(MetricsConfig {
        listen: cfg.metrics_listen.clone(),
        namespace: "ptt",
    })?;
    tokio::spawn(async move {
        let _ = metrics_server.serve().await;
    });

    let (catalog, audit_sink): (Arc<dyn ChannelCatalog>, Arc<dyn AuditSink>) =
        if let Some(url) = &cfg.database_url {
            let pool = sqlx::postgres::PgPoolOptions::new().max_connections(16).connect(url).await?;
            sqlx::migrate!("./migrations").run(&pool).await?;
            (Arc::new(PgChannelCatalog::new(pool.clone())), Arc::new(PgAuditSink::new(pool)))
        } else {
            info!("PTT_DATABASE_URL unset, using in-memory catalog and audit sink");
            let catalog = Arc::new(InMemoryCatalog::new());
            // Dev seed so `POST /channels/{uuid}/join` has something to resolve
            // against out of the box.
            catalog.insert(ChannelInfo {
                uuid: ChannelId::new("demo"),
                name: "Demo ridge".into(),
                max_participants: 20,
                channel_type: ChannelType::Standard,
            });
            (catalog, Arc::new(InMemoryAuditSink::new()))
        };

    let core_cfg = CoreConfig::default();
    let clock = Arc::new(SystemClock);
    let audit = Arc::new(AuditEmitter::spawn(audit_sink));
    let fanout_metrics = Arc::new(FanoutMetricsImpl::new("ptt", LabelPolicy::default()));
    let fanout_metrics_adapter: Arc<dyn FanoutMetrics> =
        Arc::new(FanoutMetricsAdapter::new(fanout_metrics.clone()));
    let router = Arc::new(CoreRouter::new(
        core_cfg.clone(),
        clock,
        catalog,
        audit,
        fanout_metrics_adapter,
    ));
    router.clone().spawn_eviction_sweep();

    let auth_provider = Arc::new(StaticAuthProvider::new(cfg.dev_auth_prefix.clone()));

    let state = Arc::new(AppState {
        router,
        cfg: core_cfg,
        auth: auth_provider,
        gateway_metrics: Arc::new(GatewayMetrics::new("ptt")),
        coordinator_metrics: Arc::new(CoordinatorMetrics::new("ptt")),
        fanout_metrics,
        transmissions: DashMap::new(),
    });

    let app = routes::build_router(state);
    let listener = TcpListener::bind(&cfg.listen).await?;
    info!("ptt-gateway listening on {}", cfg.listen);

    tokio::select! {
        r = axum::serve(listener, app) => r?,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown");
        }
    }

    Ok(())
}
