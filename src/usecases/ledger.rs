//! Ledger Use Case - Account Balances and Fund Movement
//!
//! The ledger is the only component allowed to change a balance. Each
//! account sits behind its own async mutex; operations that touch two
//! accounts lock them in `ActorId` order so concurrent transfers cannot
//! deadlock. Every mutation is committed to the repository while the
//! account locks are held, and only then applied in memory.
//!
//! Escrowed funds live in a reserved custody account, so joins,
//! settlements and refunds are all plain transfers and the sum of all
//! balances only ever changes through `credit`.

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info, instrument};

use crate::domain::{validate_amount, ActorId, EscrowError};
use crate::ports::repository::{Changeset, EscrowRepository, JournalEntry, JournalEvent};

type Slot = Arc<Mutex<Decimal>>;

/// Per-actor balances backed by the escrow repository.
pub struct Ledger<R: EscrowRepository> {
  repo: Arc<R>,
  /// Account slots, materialized on first write.
  accounts: RwLock<HashMap<ActorId, Slot>>,
  /// Reserved account that holds escrowed funds.
  custody: ActorId,
}

impl<R: EscrowRepository> Ledger<R> {
  /// Create an empty ledger.
  pub fn new(repo: Arc<R>, custody: ActorId) -> Self {
    Self::restore(repo, custody, std::iter::empty())
  }

  /// Rebuild a ledger from persisted balances.
  pub fn restore(
    repo: Arc<R>,
    custody: ActorId,
    balances: impl IntoIterator<Item = (ActorId, Decimal)>,
  ) -> Self {
    let accounts = balances
      .into_iter()
      .map(|(actor, balance)| (actor, Arc::new(Mutex::new(balance))))
      .collect();
    Self {
      repo,
      accounts: RwLock::new(accounts),
      custody,
    }
  }

  /// The custody account id.
  pub fn custody(&self) -> &ActorId {
    &self.custody
  }

  /// Current balance; 0 for an actor the ledger has never seen.
  pub async fn balance(&self, actor: &ActorId) -> Decimal {
    let slot = {
      let accounts = self.accounts.read().await;
      accounts.get(actor).cloned()
    };
    match slot {
      Some(slot) => *slot.lock().await,
      None => Decimal::ZERO,
    }
  }

  /// Sum of every balance, custody included.
  ///
  /// Accounts are read one at a time, so the figure is only exact when
  /// no mutation is in flight.
  pub async fn total(&self) -> Decimal {
    let slots: Vec<Slot> = {
      let accounts = self.accounts.read().await;
      accounts.values().cloned().collect()
    };
    let mut total = Decimal::ZERO;
    for slot in slots {
      total += *slot.lock().await;
    }
    total
  }

  /// Number of materialized accounts (custody included once used).
  pub async fn account_count(&self) -> usize {
    self.accounts.read().await.len()
  }

  /// Add `amount` to an account. Returns the new balance.
  #[instrument(skip_all, fields(actor = %actor, amount = %amount))]
  pub async fn credit(&self, actor: &ActorId, amount: Decimal) -> Result<Decimal, EscrowError> {
    let amount = validate_amount(amount)?;
    let mut guard = self.slot(actor).await.lock_owned().await;
    let after = checked_add(*guard, amount)?;

    let changes = Changeset {
      accounts: vec![(actor.clone(), after)],
      journal: vec![JournalEntry::new(JournalEvent::Credit, actor.clone()).with_amount(amount)],
      ..Changeset::default()
    };
    self.commit(&changes).await?;
    *guard = after;

    info!(balance = %after, "Account credited");
    Ok(after)
  }

  /// Remove `amount` from an account. Returns the new balance.
  #[instrument(skip_all, fields(actor = %actor, amount = %amount))]
  pub async fn debit(&self, actor: &ActorId, amount: Decimal) -> Result<Decimal, EscrowError> {
    let amount = validate_amount(amount)?;
    let mut guard = self.slot(actor).await.lock_owned().await;
    let after = checked_sub(actor, *guard, amount)?;

    let changes = Changeset {
      accounts: vec![(actor.clone(), after)],
      journal: vec![JournalEntry::new(JournalEvent::Debit, actor.clone()).with_amount(amount)],
      ..Changeset::default()
    };
    self.commit(&changes).await?;
    *guard = after;

    info!(balance = %after, "Account debited");
    Ok(after)
  }

  /// Move `amount` from one account to another as a single commit.
  #[instrument(skip_all, fields(from = %from, to = %to, amount = %amount))]
  pub async fn transfer(
    &self,
    from: &ActorId,
    to: &ActorId,
    amount: Decimal,
  ) -> Result<(), EscrowError> {
    let staged = self.stage_transfer(from, to, amount).await?;
    let changes = Changeset {
      accounts: staged.balances(),
      journal: vec![JournalEntry::new(JournalEvent::Transfer, from.clone())
        .with_counterparty(to.clone())
        .with_amount(staged.amount())],
      ..Changeset::default()
    };
    self.commit(&changes).await?;
    staged.apply();
    Ok(())
  }

  /// Lock both accounts and compute the post-transfer balances.
  ///
  /// Nothing changes until `StagedTransfer::apply`. The locks are held
  /// by the returned value, so the caller can commit the balances
  /// together with other records (a deal update) and then apply.
  pub async fn stage_transfer(
    &self,
    from: &ActorId,
    to: &ActorId,
    amount: Decimal,
  ) -> Result<StagedTransfer, EscrowError> {
    let amount = validate_amount(amount)?;
    let source_slot = self.slot(from).await;

    if from == to {
      let source = source_slot.lock_owned().await;
      checked_sub(from, *source, amount)?;
      let unchanged = *source;
      return Ok(StagedTransfer {
        from: from.clone(),
        to: to.clone(),
        amount,
        source,
        target: None,
        source_after: unchanged,
        target_after: unchanged,
      });
    }

    let target_slot = self.slot(to).await;
    let (source, target) = if from < to {
      let source = source_slot.lock_owned().await;
      let target = target_slot.lock_owned().await;
      (source, target)
    } else {
      let target = target_slot.lock_owned().await;
      let source = source_slot.lock_owned().await;
      (source, target)
    };

    let source_after = checked_sub(from, *source, amount)?;
    let target_after = checked_add(*target, amount)?;
    debug!(from = %from, to = %to, amount = %amount, "Transfer staged");

    Ok(StagedTransfer {
      from: from.clone(),
      to: to.clone(),
      amount,
      source,
      target: Some(target),
      source_after,
      target_after,
    })
  }

  /// Get or lazily create the slot for `actor`.
  async fn slot(&self, actor: &ActorId) -> Slot {
    {
      let accounts = self.accounts.read().await;
      if let Some(slot) = accounts.get(actor) {
        return Arc::clone(slot);
      }
    }
    let mut accounts = self.accounts.write().await;
    Arc::clone(accounts.entry(actor.clone()).or_default())
  }

  async fn commit(&self, changes: &Changeset) -> Result<(), EscrowError> {
    self
      .repo
      .commit(changes)
      .await
      .map_err(EscrowError::Persistence)
  }
}

/// A transfer whose accounts are locked and whose result is computed,
/// waiting to be committed and applied.
pub struct StagedTransfer {
  from: ActorId,
  to: ActorId,
  amount: Decimal,
  source: OwnedMutexGuard<Decimal>,
  target: Option<OwnedMutexGuard<Decimal>>,
  source_after: Decimal,
  target_after: Decimal,
}

impl StagedTransfer {
  pub fn amount(&self) -> Decimal {
    self.amount
  }

  /// Post-transfer balances for the changeset.
  pub fn balances(&self) -> Vec<(ActorId, Decimal)> {
    if self.target.is_none() {
      return vec![(self.from.clone(), self.source_after)];
    }
    vec![
      (self.from.clone(), self.source_after),
      (self.to.clone(), self.target_after),
    ]
  }

  /// Write the staged balances and release the locks.
  pub fn apply(mut self) {
    *self.source = self.source_after;
    if let Some(target) = self.target.as_mut() {
      **target = self.target_after;
    }
  }
}

fn checked_add(balance: Decimal, amount: Decimal) -> Result<Decimal, EscrowError> {
  balance
    .checked_add(amount)
    .ok_or_else(|| EscrowError::InvalidAmount(amount.to_string()))
}

fn checked_sub(actor: &ActorId, balance: Decimal, amount: Decimal) -> Result<Decimal, EscrowError> {
  if balance < amount {
    return Err(EscrowError::InsufficientFunds {
      actor: actor.clone(),
      balance,
      required: amount,
    });
  }
  Ok(balance - amount)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::adapters::persistence::InMemoryRepository;
  use rust_decimal_macros::dec;

  fn ledger() -> (Ledger<InMemoryRepository>, Arc<InMemoryRepository>) {
    let repo = Arc::new(InMemoryRepository::new());
    (Ledger::new(Arc::clone(&repo), ActorId::from("escrow")), repo)
  }

  #[tokio::test]
  async fn test_unknown_actor_has_zero_balance() {
    let (ledger, _) = ledger();
    assert_eq!(ledger.balance(&ActorId::from("ghost")).await, Decimal::ZERO);
    assert_eq!(ledger.account_count().await, 0);
  }

  #[tokio::test]
  async fn test_credit_then_debit() {
    let (ledger, repo) = ledger();
    let alice = ActorId::from("alice");

    assert_eq!(ledger.credit(&alice, dec!(40)).await.unwrap(), dec!(40));
    assert_eq!(ledger.debit(&alice, dec!(15)).await.unwrap(), dec!(25));
    assert_eq!(ledger.balance(&alice).await, dec!(25));

    let snapshot = repo.snapshot().await;
    assert_eq!(snapshot.accounts[&alice], dec!(25));
    assert_eq!(repo.journal().await.len(), 2);
  }

  #[tokio::test]
  async fn test_invalid_amounts() {
    let (ledger, _) = ledger();
    let alice = ActorId::from("alice");
    assert!(matches!(
      ledger.credit(&alice, dec!(0)).await,
      Err(EscrowError::InvalidAmount(_))
    ));
    assert!(matches!(
      ledger.debit(&alice, dec!(-1)).await,
      Err(EscrowError::InvalidAmount(_))
    ));
  }

  #[tokio::test]
  async fn test_overdraft_rejected_without_effect() {
    let (ledger, repo) = ledger();
    let alice = ActorId::from("alice");
    ledger.credit(&alice, dec!(10)).await.unwrap();

    let err = ledger.debit(&alice, dec!(35)).await.unwrap_err();
    assert!(matches!(
      err,
      EscrowError::InsufficientFunds { balance, required, .. }
        if balance == dec!(10) && required == dec!(35)
    ));
    assert_eq!(ledger.balance(&alice).await, dec!(10));
    assert_eq!(repo.commit_count(), 1);
  }

  #[tokio::test]
  async fn test_transfer_conserves_total() {
    let (ledger, _) = ledger();
    let alice = ActorId::from("alice");
    let bob = ActorId::from("bob");
    ledger.credit(&alice, dec!(40)).await.unwrap();

    ledger.transfer(&alice, &bob, dec!(35)).await.unwrap();
    assert_eq!(ledger.balance(&alice).await, dec!(5));
    assert_eq!(ledger.balance(&bob).await, dec!(35));
    assert_eq!(ledger.total().await, dec!(40));

    assert!(ledger.transfer(&alice, &bob, dec!(6)).await.is_err());
    assert_eq!(ledger.total().await, dec!(40));
  }

  #[tokio::test]
  async fn test_self_transfer_is_noop() {
    let (ledger, _) = ledger();
    let alice = ActorId::from("alice");
    ledger.credit(&alice, dec!(5)).await.unwrap();
    ledger.transfer(&alice, &alice, dec!(5)).await.unwrap();
    assert_eq!(ledger.balance(&alice).await, dec!(5));
  }

  #[tokio::test]
  async fn test_failed_commit_leaves_balance_untouched() {
    let (ledger, repo) = ledger();
    let alice = ActorId::from("alice");
    ledger.credit(&alice, dec!(10)).await.unwrap();

    repo.fail_commits(true);
    let err = ledger.debit(&alice, dec!(4)).await.unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(ledger.balance(&alice).await, dec!(10));
  }

  #[tokio::test]
  async fn test_concurrent_transfers_in_opposite_directions() {
    let (ledger, _) = ledger();
    let ledger = Arc::new(ledger);
    let alice = ActorId::from("alice");
    let bob = ActorId::from("bob");
    ledger.credit(&alice, dec!(100)).await.unwrap();
    ledger.credit(&bob, dec!(100)).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..50 {
      let ledger = Arc::clone(&ledger);
      let (from, to) = if i % 2 == 0 {
        (alice.clone(), bob.clone())
      } else {
        (bob.clone(), alice.clone())
      };
      handles.push(tokio::spawn(async move {
        ledger.transfer(&from, &to, dec!(1)).await
      }));
    }
    for handle in handles {
      handle.await.unwrap().unwrap();
    }

    assert_eq!(ledger.balance(&alice).await, dec!(100));
    assert_eq!(ledger.balance(&bob).await, dec!(100));
  }
}
