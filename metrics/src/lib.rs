pub mod config;
pub mod coordinator;
pub mod fanout;
pub mod gateway;
pub mod http;
pub mod labels;

pub use config::MetricsConfig;
pub use coordinator::CoordinatorMetrics;
pub use fanout::FanoutMetricsImpl;
pub use gateway::GatewayMetrics;
pub use http::MetricsServer;
pub use labels::{BoundedLabel, LabelPolicy};
