//! Repository Port - Durable Escrow State
//!
//! The ledger, the deal registry and the id sequence all persist through
//! this single port. A mutation is described as a `Changeset` holding the
//! post-images of every record it touched; the repository applies a
//! changeset atomically, so readers never see half of an operation.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{ActorId, Deal, DealId, DealIdSequence};

/// Current on-disk snapshot format.
pub const SNAPSHOT_VERSION: &str = "1";

/// Full durable state: accounts, deals, and the id sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscrowSnapshot {
  /// Version of the snapshot format.
  pub version: String,
  /// When this snapshot was written.
  pub saved_at: DateTime<Utc>,
  /// Balance per actor. Accounts are never removed.
  pub accounts: BTreeMap<ActorId, Decimal>,
  /// Every deal ever created, keyed by id.
  pub deals: BTreeMap<DealId, Deal>,
  /// Next deal id to hand out.
  pub sequence: DealIdSequence,
}

impl EscrowSnapshot {
  /// Empty state for a first start.
  pub fn empty(sequence: DealIdSequence) -> Self {
    Self {
      version: SNAPSHOT_VERSION.to_string(),
      saved_at: Utc::now(),
      accounts: BTreeMap::new(),
      deals: BTreeMap::new(),
      sequence,
    }
  }

  /// Apply a changeset in place.
  pub fn apply(&mut self, changes: &Changeset) {
    for (actor, balance) in &changes.accounts {
      self.accounts.insert(actor.clone(), *balance);
    }
    for deal in &changes.deals {
      self.deals.insert(deal.id.clone(), deal.clone());
    }
    if let Some(sequence) = changes.sequence {
      self.sequence = sequence;
    }
    self.saved_at = Utc::now();
  }

  /// Sum of all balances.
  pub fn total_balance(&self) -> Decimal {
    self.accounts.values().copied().sum()
  }
}

/// Post-images of the records touched by one operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Changeset {
  /// New balance per touched account.
  pub accounts: Vec<(ActorId, Decimal)>,
  /// New version of each touched deal.
  pub deals: Vec<Deal>,
  /// New id sequence state, when an id was issued.
  pub sequence: Option<DealIdSequence>,
  /// Audit entries describing the operation.
  pub journal: Vec<JournalEntry>,
}

impl Changeset {
  pub fn is_empty(&self) -> bool {
    self.accounts.is_empty() && self.deals.is_empty() && self.sequence.is_none()
  }
}

/// What a journal entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalEvent {
  Credit,
  Debit,
  Transfer,
  DealCreated,
  DealJoined,
  DealSettled,
  DealCancelled,
}

/// One line of the append-only audit journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
  /// Unique entry id.
  pub id: Uuid,
  /// When the operation was committed.
  pub timestamp: DateTime<Utc>,
  /// Kind of operation.
  pub event: JournalEvent,
  /// Actor that initiated the operation (or funds source for transfers).
  pub actor: ActorId,
  /// Other side of a transfer or deal, if any.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub counterparty: Option<ActorId>,
  /// Deal involved, if any.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub deal_id: Option<DealId>,
  /// Amount moved, if any.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub amount: Option<Decimal>,
}

impl JournalEntry {
  pub fn new(event: JournalEvent, actor: ActorId) -> Self {
    Self {
      id: Uuid::new_v4(),
      timestamp: Utc::now(),
      event,
      actor,
      counterparty: None,
      deal_id: None,
      amount: None,
    }
  }

  pub fn with_counterparty(mut self, counterparty: ActorId) -> Self {
    self.counterparty = Some(counterparty);
    self
  }

  pub fn with_deal(mut self, deal_id: DealId) -> Self {
    self.deal_id = Some(deal_id);
    self
  }

  pub fn with_amount(mut self, amount: Decimal) -> Self {
    self.amount = Some(amount);
    self
  }
}

/// Trait for durable escrow storage.
///
/// `commit` must be atomic per changeset and must have reached durable
/// storage before it returns `Ok`. Callers treat any error as fatal.
#[async_trait]
pub trait EscrowRepository: Send + Sync + 'static {
  /// Load the last committed state, `None` on first start.
  async fn load(&self) -> anyhow::Result<Option<EscrowSnapshot>>;

  /// Atomically persist one operation's changes.
  async fn commit(&self, changes: &Changeset) -> anyhow::Result<()>;

  /// Load the audit journal in commit order.
  async fn load_journal(&self) -> anyhow::Result<Vec<JournalEntry>>;

  /// Check if the storage is writable.
  async fn is_healthy(&self) -> bool;
}
