//! Deal Registry Use Case - Deal Lifecycle and Escrow Movements
//!
//! Owns every deal record and drives the state machine in
//! `crate::domain::deal`. Each deal sits behind its own async mutex.
//! A transition holds that mutex across the status check, the ledger
//! staging, the durable commit and the in-memory apply, so two buyers
//! racing for the same listing cannot both win, and a balance change is
//! never visible without its matching status change.
//!
//! Lock order is always deal → accounts; the ledger never calls back
//! into the registry.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, instrument};

use crate::domain::{ActorId, Deal, DealId, DealIdSequence, DealStatus, EscrowError, Item};
use crate::ports::repository::{Changeset, EscrowRepository, JournalEntry, JournalEvent};

use super::ledger::Ledger;

type DealSlot = Arc<Mutex<Deal>>;

/// Registry of all deals, backed by the ledger and the repository.
pub struct DealRegistry<R: EscrowRepository> {
  repo: Arc<R>,
  ledger: Arc<Ledger<R>>,
  /// Every deal ever created. Never shrinks.
  deals: RwLock<HashMap<DealId, DealSlot>>,
  /// Next id to issue. Held across the commit of a new deal.
  sequence: Mutex<DealIdSequence>,
  /// Actors allowed to cancel any deal.
  operators: HashSet<ActorId>,
}

impl<R: EscrowRepository> DealRegistry<R> {
  /// Create an empty registry issuing ids from `seed`.
  pub fn new(
    repo: Arc<R>,
    ledger: Arc<Ledger<R>>,
    seed: DealIdSequence,
    operators: HashSet<ActorId>,
  ) -> Self {
    Self::restore(repo, ledger, std::iter::empty(), seed, operators)
  }

  /// Rebuild a registry from persisted deals and sequence state.
  pub fn restore(
    repo: Arc<R>,
    ledger: Arc<Ledger<R>>,
    deals: impl IntoIterator<Item = Deal>,
    sequence: DealIdSequence,
    operators: HashSet<ActorId>,
  ) -> Self {
    let deals = deals
      .into_iter()
      .map(|deal| (deal.id.clone(), Arc::new(Mutex::new(deal))))
      .collect();
    Self {
      repo,
      ledger,
      deals: RwLock::new(deals),
      sequence: Mutex::new(sequence),
      operators,
    }
  }

  pub fn ledger(&self) -> &Arc<Ledger<R>> {
    &self.ledger
  }

  pub fn is_operator(&self, actor: &ActorId) -> bool {
    self.operators.contains(actor)
  }

  /// List a new item for sale. No funds move.
  #[instrument(skip_all, fields(seller = %seller))]
  pub async fn create_deal(&self, seller: &ActorId, item: Item) -> Result<Deal, EscrowError> {
    let item = Item::new(&item.kind, &item.name, &item.description, item.price)?;
    if seller == self.ledger.custody() {
      return Err(EscrowError::InvalidListing(format!("seller id {seller} is reserved")));
    }

    let mut sequence = self.sequence.lock().await;
    let id = sequence.peek();
    let next_sequence = sequence.advanced();

    if self.deals.read().await.contains_key(&id) {
      error!(deal_id = %id, "Deal id sequence wrapped onto an existing deal");
      self
        .commit(&Changeset {
          sequence: Some(next_sequence),
          ..Changeset::default()
        })
        .await?;
      *sequence = next_sequence;
      return Err(EscrowError::DealIdCollision(id));
    }

    let deal = Deal::new(id.clone(), seller.clone(), item, Utc::now());
    let changes = Changeset {
      deals: vec![deal.clone()],
      sequence: Some(next_sequence),
      journal: vec![JournalEntry::new(JournalEvent::DealCreated, seller.clone())
        .with_deal(id.clone())
        .with_amount(deal.price())],
      ..Changeset::default()
    };
    self.commit(&changes).await?;

    *sequence = next_sequence;
    self
      .deals
      .write()
      .await
      .insert(id.clone(), Arc::new(Mutex::new(deal.clone())));
    drop(sequence);

    info!(deal_id = %id, price = %deal.price(), "Deal created");
    Ok(deal)
  }

  /// Join a waiting deal as its buyer, moving the price into custody.
  #[instrument(skip_all, fields(deal_id = %deal_id, buyer = %buyer))]
  pub async fn join_deal(&self, deal_id: &DealId, buyer: &ActorId) -> Result<Deal, EscrowError> {
    let slot = self.slot(deal_id).await?;
    let mut deal = slot.lock().await;

    let next = deal.joined(buyer.clone(), Utc::now())?;
    if buyer == self.ledger.custody() {
      return Err(EscrowError::NotAuthorized {
        actor: buyer.clone(),
        deal_id: deal_id.clone(),
      });
    }

    let staged = self
      .ledger
      .stage_transfer(buyer, self.ledger.custody(), deal.price())
      .await?;
    let changes = Changeset {
      accounts: staged.balances(),
      deals: vec![next.clone()],
      journal: vec![JournalEntry::new(JournalEvent::DealJoined, buyer.clone())
        .with_counterparty(deal.seller.clone())
        .with_deal(deal_id.clone())
        .with_amount(deal.price())],
      ..Changeset::default()
    };
    self.commit(&changes).await?;
    staged.apply();
    *deal = next.clone();

    info!(price = %next.price(), "Buyer joined deal, funds in custody");
    Ok(next)
  }

  /// Seller confirms delivery; custody pays the seller.
  #[instrument(skip_all, fields(deal_id = %deal_id, actor = %actor))]
  pub async fn settle_deal(&self, deal_id: &DealId, actor: &ActorId) -> Result<Deal, EscrowError> {
    let slot = self.slot(deal_id).await?;
    let mut deal = slot.lock().await;

    let next = deal.settled(actor, Utc::now())?;
    let staged = self
      .ledger
      .stage_transfer(self.ledger.custody(), &deal.seller, deal.price())
      .await?;
    let changes = Changeset {
      accounts: staged.balances(),
      deals: vec![next.clone()],
      journal: vec![JournalEntry::new(JournalEvent::DealSettled, actor.clone())
        .with_counterparty(deal.buyer.clone().unwrap_or_else(|| actor.clone()))
        .with_deal(deal_id.clone())
        .with_amount(deal.price())],
      ..Changeset::default()
    };
    self.commit(&changes).await?;
    staged.apply();
    *deal = next.clone();

    info!(price = %next.price(), "Deal settled, seller paid");
    Ok(next)
  }

  /// Cancel a deal; an in-progress deal refunds its buyer from custody.
  ///
  /// Allowed for the seller, the buyer, or an operator.
  #[instrument(skip_all, fields(deal_id = %deal_id, actor = %actor))]
  pub async fn cancel_deal(&self, deal_id: &DealId, actor: &ActorId) -> Result<Deal, EscrowError> {
    let slot = self.slot(deal_id).await?;
    let mut deal = slot.lock().await;

    if !deal.is_party(actor) && !self.is_operator(actor) {
      return Err(EscrowError::NotAuthorized {
        actor: actor.clone(),
        deal_id: deal_id.clone(),
      });
    }
    let next = deal.cancelled(Utc::now())?;

    let mut journal = JournalEntry::new(JournalEvent::DealCancelled, actor.clone())
      .with_deal(deal_id.clone());
    let staged = match (&deal.status, &deal.buyer) {
      (DealStatus::InProgress, Some(buyer)) => {
        journal = journal
          .with_counterparty(buyer.clone())
          .with_amount(deal.price());
        Some(
          self
            .ledger
            .stage_transfer(self.ledger.custody(), buyer, deal.price())
            .await?,
        )
      }
      _ => None,
    };

    let changes = Changeset {
      accounts: staged.as_ref().map(|s| s.balances()).unwrap_or_default(),
      deals: vec![next.clone()],
      journal: vec![journal],
      ..Changeset::default()
    };
    self.commit(&changes).await?;
    if let Some(staged) = staged {
      staged.apply();
    }
    let refunded = next.refunded_to.is_some();
    *deal = next.clone();

    info!(refunded, "Deal cancelled");
    Ok(next)
  }

  /// Current version of a deal.
  pub async fn get_deal(&self, deal_id: &DealId) -> Option<Deal> {
    let slot = self.deals.read().await.get(deal_id).cloned()?;
    let deal = slot.lock().await;
    Some(deal.clone())
  }

  /// Deals where `actor` is seller, buyer, or refunded buyer, oldest first.
  pub async fn deals_for(&self, actor: &ActorId) -> Vec<Deal> {
    let mut deals = Vec::new();
    for slot in self.slots().await {
      let deal = slot.lock().await;
      if deal.is_party(actor) || deal.refunded_to.as_ref() == Some(actor) {
        deals.push(deal.clone());
      }
    }
    deals.sort_by_key(|d| d.created_at);
    deals
  }

  /// Sum of prices of all in-progress deals; equals the custody balance.
  pub async fn escrowed_total(&self) -> Decimal {
    let mut total = Decimal::ZERO;
    for slot in self.slots().await {
      let deal = slot.lock().await;
      if deal.status == DealStatus::InProgress {
        total += deal.price();
      }
    }
    total
  }

  /// Number of deals ever created.
  pub async fn deal_count(&self) -> usize {
    self.deals.read().await.len()
  }

  async fn slot(&self, deal_id: &DealId) -> Result<DealSlot, EscrowError> {
    self
      .deals
      .read()
      .await
      .get(deal_id)
      .cloned()
      .ok_or_else(|| EscrowError::DealNotFound(deal_id.clone()))
  }

  async fn slots(&self) -> Vec<DealSlot> {
    self.deals.read().await.values().cloned().collect()
  }

  async fn commit(&self, changes: &Changeset) -> Result<(), EscrowError> {
    self
      .repo
      .commit(changes)
      .await
      .map_err(EscrowError::Persistence)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::adapters::persistence::InMemoryRepository;
  use rust_decimal_macros::dec;

  struct Fixture {
    registry: Arc<DealRegistry<InMemoryRepository>>,
    ledger: Arc<Ledger<InMemoryRepository>>,
    repo: Arc<InMemoryRepository>,
  }

  fn fixture() -> Fixture {
    let repo = Arc::new(InMemoryRepository::new());
    let ledger = Arc::new(Ledger::new(Arc::clone(&repo), ActorId::from("escrow")));
    let operators = HashSet::from([ActorId::from("operator")]);
    let registry = Arc::new(DealRegistry::new(
      Arc::clone(&repo),
      Arc::clone(&ledger),
      DealIdSequence::default(),
      operators,
    ));
    Fixture {
      registry,
      ledger,
      repo,
    }
  }

  fn moon_art() -> Item {
    Item::new("NFT", "MoonArt #12", "desc", dec!(35)).unwrap()
  }

  #[tokio::test]
  async fn test_scenario_list_join_settle() {
    let f = fixture();
    let seller = ActorId::from("seller");
    let buyer = ActorId::from("buyer");
    f.ledger.credit(&buyer, dec!(40)).await.unwrap();

    let deal = f.registry.create_deal(&seller, moon_art()).await.unwrap();
    assert_eq!(deal.id.as_str(), "#A7342");
    assert_eq!(deal.status, DealStatus::WaitingBuyer);
    assert_eq!(deal.price(), dec!(35));

    let joined = f.registry.join_deal(&deal.id, &buyer).await.unwrap();
    assert_eq!(joined.status, DealStatus::InProgress);
    assert_eq!(f.ledger.balance(&buyer).await, dec!(5));
    assert_eq!(f.ledger.balance(f.ledger.custody()).await, dec!(35));

    let settled = f.registry.settle_deal(&deal.id, &seller).await.unwrap();
    assert_eq!(settled.status, DealStatus::Completed);
    assert_eq!(f.ledger.balance(&seller).await, dec!(35));
    assert_eq!(f.ledger.balance(f.ledger.custody()).await, dec!(0));
    assert_eq!(f.ledger.total().await, dec!(40));
  }

  #[tokio::test]
  async fn test_insufficient_funds_leaves_deal_waiting() {
    let f = fixture();
    let buyer = ActorId::from("buyer");
    f.ledger.credit(&buyer, dec!(10)).await.unwrap();
    let deal = f
      .registry
      .create_deal(&ActorId::from("seller"), moon_art())
      .await
      .unwrap();

    let err = f.registry.join_deal(&deal.id, &buyer).await.unwrap_err();
    assert!(matches!(err, EscrowError::InsufficientFunds { .. }));

    let stored = f.registry.get_deal(&deal.id).await.unwrap();
    assert_eq!(stored.status, DealStatus::WaitingBuyer);
    assert!(stored.buyer.is_none());
    assert_eq!(f.ledger.balance(&buyer).await, dec!(10));
  }

  #[tokio::test]
  async fn test_cancel_in_progress_refunds_and_blocks_further_moves() {
    let f = fixture();
    let seller = ActorId::from("seller");
    let buyer = ActorId::from("buyer");
    f.ledger.credit(&buyer, dec!(40)).await.unwrap();
    let deal = f.registry.create_deal(&seller, moon_art()).await.unwrap();
    f.registry.join_deal(&deal.id, &buyer).await.unwrap();

    let cancelled = f.registry.cancel_deal(&deal.id, &buyer).await.unwrap();
    assert_eq!(cancelled.status, DealStatus::Cancelled);
    assert_eq!(cancelled.refunded_to, Some(buyer.clone()));
    assert_eq!(f.ledger.balance(&buyer).await, dec!(40));

    let other = ActorId::from("other");
    f.ledger.credit(&other, dec!(100)).await.unwrap();
    assert!(matches!(
      f.registry.join_deal(&deal.id, &other).await,
      Err(EscrowError::DealNotJoinable { .. })
    ));
    assert!(matches!(
      f.registry.settle_deal(&deal.id, &seller).await,
      Err(EscrowError::DealNotJoinable { .. })
    ));
  }

  #[tokio::test]
  async fn test_cancel_waiting_moves_no_funds() {
    let f = fixture();
    let seller = ActorId::from("seller");
    let deal = f.registry.create_deal(&seller, moon_art()).await.unwrap();
    let commits = f.repo.commit_count();

    let cancelled = f.registry.cancel_deal(&deal.id, &seller).await.unwrap();
    assert_eq!(cancelled.status, DealStatus::Cancelled);
    assert!(cancelled.refunded_to.is_none());
    assert_eq!(f.repo.commit_count(), commits + 1);
    assert_eq!(f.ledger.total().await, dec!(0));
  }

  #[tokio::test]
  async fn test_cancel_authorization() {
    let f = fixture();
    let deal = f
      .registry
      .create_deal(&ActorId::from("seller"), moon_art())
      .await
      .unwrap();

    assert!(matches!(
      f.registry.cancel_deal(&deal.id, &ActorId::from("stranger")).await,
      Err(EscrowError::NotAuthorized { .. })
    ));
    let cancelled = f
      .registry
      .cancel_deal(&deal.id, &ActorId::from("operator"))
      .await
      .unwrap();
    assert_eq!(cancelled.status, DealStatus::Cancelled);
  }

  #[tokio::test]
  async fn test_unknown_deal_and_self_join() {
    let f = fixture();
    let seller = ActorId::from("seller");
    assert!(matches!(
      f.registry.join_deal(&DealId::from("#Z9999"), &seller).await,
      Err(EscrowError::DealNotFound(_))
    ));

    f.ledger.credit(&seller, dec!(100)).await.unwrap();
    let deal = f.registry.create_deal(&seller, moon_art()).await.unwrap();
    assert!(matches!(
      f.registry.join_deal(&deal.id, &seller).await,
      Err(EscrowError::SelfDealNotAllowed(_))
    ));
    assert_eq!(f.ledger.balance(&seller).await, dec!(100));
  }

  #[tokio::test]
  async fn test_settle_on_waiting_deal_fails_unchanged() {
    let f = fixture();
    let seller = ActorId::from("seller");
    let deal = f.registry.create_deal(&seller, moon_art()).await.unwrap();
    assert!(matches!(
      f.registry.settle_deal(&deal.id, &seller).await,
      Err(EscrowError::DealNotJoinable {
        status: DealStatus::WaitingBuyer,
        ..
      })
    ));
    assert_eq!(f.registry.get_deal(&deal.id).await.unwrap(), deal);
  }

  #[tokio::test]
  async fn test_racing_joins_single_winner() {
    let f = fixture();
    let deal = f
      .registry
      .create_deal(&ActorId::from("seller"), moon_art())
      .await
      .unwrap();
    let b1 = ActorId::from("b1");
    let b2 = ActorId::from("b2");
    f.ledger.credit(&b1, dec!(50)).await.unwrap();
    f.ledger.credit(&b2, dec!(50)).await.unwrap();

    let (r1, r2) = tokio::join!(
      {
        let registry = Arc::clone(&f.registry);
        let id = deal.id.clone();
        let b1 = b1.clone();
        tokio::spawn(async move { registry.join_deal(&id, &b1).await })
      },
      {
        let registry = Arc::clone(&f.registry);
        let id = deal.id.clone();
        let b2 = b2.clone();
        tokio::spawn(async move { registry.join_deal(&id, &b2).await })
      }
    );
    let results = [r1.unwrap(), r2.unwrap()];
    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    assert!(results
      .iter()
      .any(|r| matches!(r, Err(EscrowError::DealNotJoinable { .. }))));

    let stored = f.registry.get_deal(&deal.id).await.unwrap();
    let winner = stored.buyer.clone().unwrap();
    assert_eq!(f.ledger.balance(&winner).await, dec!(15));
    assert_eq!(
      f.ledger.balance(f.ledger.custody()).await,
      f.registry.escrowed_total().await
    );
  }

  #[tokio::test]
  async fn test_failed_commit_keeps_memory_consistent() {
    let f = fixture();
    let buyer = ActorId::from("buyer");
    f.ledger.credit(&buyer, dec!(40)).await.unwrap();
    let deal = f
      .registry
      .create_deal(&ActorId::from("seller"), moon_art())
      .await
      .unwrap();

    f.repo.fail_commits(true);
    let err = f.registry.join_deal(&deal.id, &buyer).await.unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(f.ledger.balance(&buyer).await, dec!(40));
    assert_eq!(
      f.registry.get_deal(&deal.id).await.unwrap().status,
      DealStatus::WaitingBuyer
    );
  }

  #[tokio::test]
  async fn test_id_collision_after_wrap_is_refused() {
    let repo = Arc::new(InMemoryRepository::new());
    let ledger = Arc::new(Ledger::new(Arc::clone(&repo), ActorId::from("escrow")));
    let existing = Deal::new(
      DealId::from("#A1000"),
      ActorId::from("old"),
      moon_art(),
      Utc::now(),
    );
    let registry = DealRegistry::restore(
      Arc::clone(&repo),
      ledger,
      [existing.clone()],
      DealIdSequence::new('A', 1000).unwrap(),
      HashSet::new(),
    );

    let err = registry
      .create_deal(&ActorId::from("seller"), moon_art())
      .await
      .unwrap_err();
    assert!(matches!(err, EscrowError::DealIdCollision(_)));
    assert_eq!(registry.get_deal(&existing.id).await.unwrap(), existing);

    let next = registry
      .create_deal(&ActorId::from("seller"), moon_art())
      .await
      .unwrap();
    assert_eq!(next.id.as_str(), "#A1001");
  }

  #[tokio::test]
  async fn test_deals_for_actor() {
    let f = fixture();
    let seller = ActorId::from("seller");
    let buyer = ActorId::from("buyer");
    f.ledger.credit(&buyer, dec!(100)).await.unwrap();
    let first = f.registry.create_deal(&seller, moon_art()).await.unwrap();
    let second = f.registry.create_deal(&seller, moon_art()).await.unwrap();
    f.registry.join_deal(&second.id, &buyer).await.unwrap();

    let seller_deals = f.registry.deals_for(&seller).await;
    assert_eq!(seller_deals.len(), 2);
    assert_eq!(seller_deals[0].id, first.id);

    let buyer_deals = f.registry.deals_for(&buyer).await;
    assert_eq!(buyer_deals.len(), 1);
    assert_eq!(buyer_deals[0].id, second.id);
  }
}
