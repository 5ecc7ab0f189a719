use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "ptt-gateway", about = "Push-to-talk HTTP/WebSocket gateway")]
pub struct Config {
    #[arg(long, env = "PTT_LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: String,

    #[arg(long, env = "PTT_METRICS_LISTEN", default_value = "0.0.0.0:9100")]
    pub metrics_listen: String,

    #[arg(long, env = "PTT_DEV_MODE", default_value_t = true)]
    pub dev_mode: bool,

    /// Shared-secret prefix accepted by the dev `StaticAuthProvider`.
    #[arg(long, env = "PTT_DEV_AUTH_PREFIX", default_value = "dev")]
    pub dev_auth_prefix: String,

    /// Postgres connection string; if unset the in-memory catalog/audit
    /// sink are used instead (local dev and tests).
    #[arg(long, env = "PTT_DATABASE_URL")]
    pub database_url: Option<String>,
}
