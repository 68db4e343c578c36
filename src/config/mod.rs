//! Configuration Module - TOML-based Service Configuration
//!
//! Loads and validates configuration from `config.toml`. The operator
//! list can be extended from the environment (`ESCROW_OPERATOR_ID`).
//! Nothing tunable is hardcoded in the domain layer.

pub mod loader;

use serde::Deserialize;

/// Environment variable naming one extra operator actor id.
pub const OPERATOR_ENV: &str = "ESCROW_OPERATOR_ID";

/// Top-level service configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
  pub service: ServiceConfig,
  #[serde(default)]
  pub ledger: LedgerConfig,
  #[serde(default)]
  pub deals: DealsConfig,
  #[serde(default)]
  pub session: SessionConfig,
  #[serde(default)]
  pub operators: OperatorsConfig,
  #[serde(default)]
  pub rate_limits: RateLimitConfig,
  #[serde(default)]
  pub metrics: MetricsConfig,
  #[serde(default)]
  pub persistence: PersistenceConfig,
}

/// Service identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
  /// Human-readable service name.
  pub name: String,
  /// Log level (trace, debug, info, warn, error).
  #[serde(default = "default_log_level")]
  pub log_level: String,
}

/// Ledger configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
  /// Account holding escrowed funds of in-progress deals.
  #[serde(default = "default_custody_account")]
  pub custody_account: String,
  /// Display label for amounts in messages.
  #[serde(default = "default_currency")]
  pub currency: String,
}

/// Deal id configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DealsConfig {
  /// First id issued by a fresh store, e.g. `A7342`.
  #[serde(default = "default_id_seed")]
  pub id_seed: String,
}

/// Pending input and worker configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
  /// Lifetime of a declared intent (seconds).
  #[serde(default = "default_pending_ttl")]
  pub pending_ttl_secs: u64,
  /// Interval between expired-slot sweeps (seconds).
  #[serde(default = "default_sweep_interval")]
  pub sweep_interval_secs: u64,
  /// Number of actor-sharded worker lanes.
  #[serde(default = "default_workers")]
  pub workers: usize,
}

/// Operator accounts allowed to credit balances and cancel any deal.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OperatorsConfig {
  #[serde(default)]
  pub ids: Vec<String>,
}

/// Per-actor inbound rate limiting.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
  #[serde(default = "default_max_events")]
  pub max_events_per_minute: u32,
}

/// Metrics and monitoring configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
  /// Serve `/metrics` next to the health probes.
  #[serde(default = "default_true")]
  pub enabled: bool,
  /// Health and metrics server port.
  #[serde(default = "default_health_port")]
  pub health_port: u16,
}

/// Persistence configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
  /// Directory for the state snapshot and journal.
  #[serde(default = "default_data_dir")]
  pub data_dir: String,
  /// Keep everything in memory (dry run, nothing survives a restart).
  #[serde(default)]
  pub in_memory: bool,
}

impl Default for LedgerConfig {
  fn default() -> Self {
    Self {
      custody_account: default_custody_account(),
      currency: default_currency(),
    }
  }
}

impl Default for DealsConfig {
  fn default() -> Self {
    Self {
      id_seed: default_id_seed(),
    }
  }
}

impl Default for SessionConfig {
  fn default() -> Self {
    Self {
      pending_ttl_secs: default_pending_ttl(),
      sweep_interval_secs: default_sweep_interval(),
      workers: default_workers(),
    }
  }
}

impl Default for RateLimitConfig {
  fn default() -> Self {
    Self {
      max_events_per_minute: default_max_events(),
    }
  }
}

impl Default for MetricsConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      health_port: default_health_port(),
    }
  }
}

impl Default for PersistenceConfig {
  fn default() -> Self {
    Self {
      data_dir: default_data_dir(),
      in_memory: false,
    }
  }
}

// Default value functions for serde

fn default_log_level() -> String {
  "info".to_string()
}

fn default_true() -> bool {
  true
}

fn default_custody_account() -> String {
  "escrow".to_string()
}

fn default_currency() -> String {
  "USDT".to_string()
}

fn default_id_seed() -> String {
  "A7342".to_string()
}

fn default_pending_ttl() -> u64 {
  900
}

fn default_sweep_interval() -> u64 {
  60
}

fn default_workers() -> usize {
  8
}

fn default_max_events() -> u32 {
  60
}

fn default_health_port() -> u16 {
  9090
}

fn default_data_dir() -> String {
  "data".to_string()
}
