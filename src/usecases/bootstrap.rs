//! Bootstrap - Rebuild Use Cases from Durable State
//!
//! Loads the last snapshot from the repository, rebuilds the ledger and
//! the registry from it, and checks that custody still covers every
//! in-progress deal before any event is accepted.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, instrument};

use crate::domain::{ActorId, DealIdSequence};
use crate::ports::repository::EscrowRepository;

use super::deal_registry::DealRegistry;
use super::ledger::Ledger;

/// Restored ledger and registry sharing one repository.
pub struct RestoredDesk<R: EscrowRepository> {
  pub ledger: Arc<Ledger<R>>,
  pub registry: Arc<DealRegistry<R>>,
}

/// Restore state from `repo`, or start empty from `seed`.
///
/// # Errors
/// Fails when the repository cannot be read or when the custody balance
/// disagrees with the sum of in-progress deal prices.
#[instrument(skip_all, fields(custody = %custody))]
pub async fn restore_desk<R: EscrowRepository>(
  repo: Arc<R>,
  custody: ActorId,
  seed: DealIdSequence,
  operators: HashSet<ActorId>,
) -> Result<RestoredDesk<R>> {
  let snapshot = repo.load().await.context("Failed to load escrow state")?;

  let (ledger, registry) = match snapshot {
    Some(snapshot) => {
      let ledger = Arc::new(Ledger::restore(
        Arc::clone(&repo),
        custody,
        snapshot.accounts,
      ));
      let registry = DealRegistry::restore(
        repo,
        Arc::clone(&ledger),
        snapshot.deals.into_values(),
        snapshot.sequence,
        operators,
      );
      (ledger, registry)
    }
    None => {
      let ledger = Arc::new(Ledger::new(Arc::clone(&repo), custody));
      let registry = DealRegistry::new(repo, Arc::clone(&ledger), seed, operators);
      (ledger, registry)
    }
  };

  let held = ledger.balance(ledger.custody()).await;
  let escrowed = registry.escrowed_total().await;
  anyhow::ensure!(
    held == escrowed,
    "custody balance {held} does not match in-progress deals {escrowed}"
  );

  info!(
    accounts = ledger.account_count().await,
    deals = registry.deal_count().await,
    total = %ledger.total().await,
    escrowed = %escrowed,
    "Escrow state restored"
  );

  Ok(RestoredDesk {
    ledger,
    registry: Arc::new(registry),
  })
}
