//! Metrics and Monitoring Adapters
//!
//! Prometheus counters for the deal lifecycle and a single axum server
//! exposing /live, /ready and /metrics.

pub mod health;
pub mod prometheus;

pub use health::{HealthServer, HealthState};
pub use prometheus::MetricsRegistry;
