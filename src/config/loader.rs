//! Configuration Loader - File Loading and Validation
//!
//! Handles loading `config.toml`, merging the operator override from the
//! environment, and validating every parameter with clear messages.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use super::{AppConfig, OPERATOR_ENV};
use crate::domain::DealIdSequence;

/// Load and validate configuration from a TOML file.
///
/// # Errors
/// Returns detailed error if:
/// - File doesn't exist or can't be read
/// - TOML parsing fails
/// - Validation rules are violated
pub fn load_config(path: &str) -> Result<AppConfig> {
  let path = Path::new(path);

  let content = std::fs::read_to_string(path)
    .with_context(|| format!("Failed to read config file: {}", path.display()))?;

  let config = parse_config(&content, std::env::var(OPERATOR_ENV).ok())?;

  info!(
    name = %config.service.name,
    operators = config.operators.ids.len(),
    id_seed = %config.deals.id_seed,
    in_memory = config.persistence.in_memory,
    "Configuration loaded successfully"
  );

  Ok(config)
}

/// Parse TOML text, append the env operator, and validate.
pub fn parse_config(content: &str, env_operator: Option<String>) -> Result<AppConfig> {
  let mut config: AppConfig =
    toml::from_str(content).with_context(|| "Failed to parse config.toml")?;

  if let Some(operator) = env_operator.map(|id| id.trim().to_string()) {
    if !operator.is_empty() && !config.operators.ids.contains(&operator) {
      config.operators.ids.push(operator);
    }
  }

  validate_config(&config)?;
  Ok(config)
}

/// Validate all configuration parameters.
fn validate_config(config: &AppConfig) -> Result<()> {
  anyhow::ensure!(
    !config.service.name.trim().is_empty(),
    "service.name must not be empty"
  );

  // Ledger validation
  let custody = config.ledger.custody_account.trim();
  anyhow::ensure!(!custody.is_empty(), "ledger.custody_account must not be empty");
  anyhow::ensure!(
    !config.operators.ids.iter().any(|id| id.trim() == custody),
    "custody account {custody} cannot also be an operator"
  );

  // Deal id seed
  anyhow::ensure!(
    DealIdSequence::parse_seed(&config.deals.id_seed).is_some(),
    "deals.id_seed must look like A7342 (letter A-Z, number 1000-9999), got {}",
    config.deals.id_seed
  );

  // Session validation
  anyhow::ensure!(
    config.session.pending_ttl_secs > 0,
    "session.pending_ttl_secs must be positive"
  );
  anyhow::ensure!(
    config.session.sweep_interval_secs > 0,
    "session.sweep_interval_secs must be positive"
  );
  anyhow::ensure!(
    (1..=256).contains(&config.session.workers),
    "session.workers must be in [1, 256], got {}",
    config.session.workers
  );

  // Operators
  for (i, id) in config.operators.ids.iter().enumerate() {
    anyhow::ensure!(!id.trim().is_empty(), "operators.ids[{}] is empty", i);
  }

  // Rate limit validation
  anyhow::ensure!(
    config.rate_limits.max_events_per_minute > 0,
    "max_events_per_minute must be positive"
  );

  // Persistence
  anyhow::ensure!(
    config.persistence.in_memory || !config.persistence.data_dir.trim().is_empty(),
    "persistence.data_dir must not be empty"
  );

  Ok(())
}
