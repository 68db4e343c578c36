//! Dispatcher Use Case - Inbound Event Routing
//!
//! Turns chat events into registry, ledger and router calls, and turns
//! their results into replies and counterparty notifications.
//!
//! Event flow:
//! 1. Per-actor rate limit (`governor` keyed limiter); excess is dropped
//! 2. Route by kind: command, callback, or free text
//! 3. Recoverable `EscrowError`s become a reply to the actor
//! 4. `Persistence` errors are escalated to the caller as fatal
//!
//! Notifications are best-effort: failures are logged and never undo a
//! committed mutation.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Instant;

use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use rust_decimal::Decimal;
use tracing::{debug, error, info, instrument, warn};

use crate::domain::{parse_amount, ActorId, Deal, DealId, DealStatus, EscrowError};
use crate::ports::repository::EscrowRepository;
use crate::ports::telemetry::Telemetry;
use crate::ports::transport::{EventKind, InboundEvent, Notifier};

use super::deal_registry::DealRegistry;
use super::session_router::{InputOutcome, PendingKind, SessionRouter};

/// Dispatcher settings taken from configuration.
#[derive(Debug, Clone)]
pub struct DispatcherSettings {
  /// Label appended to amounts in messages.
  pub currency: String,
  /// Per-actor inbound budget.
  pub max_events_per_minute: u32,
}

/// Routes inbound events to the escrow use cases.
pub struct Dispatcher<R: EscrowRepository, N: Notifier> {
  registry: Arc<DealRegistry<R>>,
  router: Arc<SessionRouter<R>>,
  notifier: Arc<N>,
  telemetry: Arc<dyn Telemetry>,
  limiter: DefaultKeyedRateLimiter<ActorId>,
  currency: String,
}

impl<R: EscrowRepository, N: Notifier> Dispatcher<R, N> {
  pub fn new(
    registry: Arc<DealRegistry<R>>,
    router: Arc<SessionRouter<R>>,
    notifier: Arc<N>,
    telemetry: Arc<dyn Telemetry>,
    settings: DispatcherSettings,
  ) -> Self {
    let per_minute = NonZeroU32::new(settings.max_events_per_minute).unwrap_or(NonZeroU32::MIN);
    Self {
      registry,
      router,
      notifier,
      telemetry,
      limiter: RateLimiter::keyed(Quota::per_minute(per_minute)),
      currency: settings.currency,
    }
  }

  pub fn registry(&self) -> &Arc<DealRegistry<R>> {
    &self.registry
  }

  pub fn router(&self) -> &Arc<SessionRouter<R>> {
    &self.router
  }

  /// Handle one event.
  ///
  /// # Errors
  /// Only fatal failures (persistence) are returned; every other
  /// outcome is reported to the actor.
  #[instrument(skip_all, fields(actor = %event.actor_id, kind = ?event.kind))]
  pub async fn handle(&self, event: InboundEvent) -> anyhow::Result<()> {
    if self.limiter.check_key(&event.actor_id).is_err() {
      self.telemetry.rate_limited();
      debug!("Event dropped by rate limiter");
      return Ok(());
    }

    let started = Instant::now();
    let result = match event.kind {
      EventKind::Command => self.on_command(&event).await,
      EventKind::Callback => self.on_callback(&event).await,
      EventKind::Text => self.on_text(&event).await,
    };
    self.telemetry.event_handled(event.kind, started.elapsed());

    match result {
      Ok(()) => Ok(()),
      Err(e) if e.is_fatal() => {
        error!(error = %e, "Fatal failure while handling event");
        Err(anyhow::Error::new(e).context("escrow state could not be persisted"))
      }
      Err(e) => {
        self.telemetry.rejected(e.kind());
        info!(reason = e.kind(), "Operation rejected");
        self.reply(&event.actor_id, &self.render_error(&e)).await;
        Ok(())
      }
    }
  }

  /// Periodic cleanup of expired pending inputs and idle limiter keys.
  pub async fn housekeeping(&self) -> usize {
    self.limiter.retain_recent();
    self.limiter.shrink_to_fit();
    self.router.sweep_expired().await
  }

  async fn on_command(&self, event: &InboundEvent) -> Result<(), EscrowError> {
    let mut parts = event.payload.trim().trim_start_matches('/').split_whitespace();
    let Some(head) = parts.next() else {
      return Ok(());
    };
    // `/cmd@botname` form
    let name = head.split('@').next().unwrap_or(head).to_ascii_lowercase();
    let args: Vec<&str> = parts.collect();

    match name.as_str() {
      "givebalance" => self.give_balance(&event.actor_id, &args).await,
      "deal" => match args.first().and_then(|raw| DealId::parse(raw)) {
        Some(deal_id) => self.show_deal(&event.actor_id, &deal_id).await,
        None => {
          self.reply(&event.actor_id, "Usage: /deal #A7342").await;
          Ok(())
        }
      },
      other => self.on_action(event, other).await,
    }
  }

  async fn on_callback(&self, event: &InboundEvent) -> Result<(), EscrowError> {
    let data = event.payload.trim();
    if let Some((action, raw_id)) = data.split_once(':') {
      let deal_id = DealId::parse(raw_id).unwrap_or_else(|| DealId::from(raw_id));
      return match action {
        "settle" => self.settle(event, &deal_id).await,
        "cancel" => self.cancel(event, &deal_id).await,
        "deal" => self.show_deal(&event.actor_id, &deal_id).await,
        _ => {
          debug!(data, "Unknown callback ignored");
          Ok(())
        }
      };
    }
    self.on_action(event, data).await
  }

  /// Actions reachable both as commands and as buttons.
  async fn on_action(&self, event: &InboundEvent, action: &str) -> Result<(), EscrowError> {
    let actor = &event.actor_id;
    match action {
      "start" | "menu" => {
        self.reply(actor, &self.welcome(event)).await;
      }
      "balance" => {
        let balance = self.registry.ledger().balance(actor).await;
        self
          .reply(actor, &format!("Your balance: {}", self.money(balance)))
          .await;
      }
      "create_deal" => {
        self
          .reply(
            actor,
            "Who are you in this deal?\n[role_seller] I am the seller\n[role_buyer] I am the buyer",
          )
          .await;
      }
      "role_seller" => {
        self.router.declare_intent(actor, PendingKind::SubmitListing).await;
        self
          .reply(
            actor,
            "Send the item as: type; name; description; price\nExample: NFT; MoonArt #12; Hand-drawn moon; 35",
          )
          .await;
      }
      "role_buyer" => {
        self.router.declare_intent(actor, PendingKind::SubmitDealId).await;
        self.reply(actor, "Send the deal id, for example #A7342").await;
      }
      "deals" => self.list_deals(actor).await,
      _ => {
        debug!(action, "Unknown action");
        self
          .reply(actor, "Unknown command. Send /menu to see what I can do.")
          .await;
      }
    }
    Ok(())
  }

  async fn on_text(&self, event: &InboundEvent) -> Result<(), EscrowError> {
    let actor = &event.actor_id;
    match self.router.consume_input(actor, &event.payload).await? {
      InputOutcome::Ignored | InputOutcome::Malformed(_) => {}
      InputOutcome::Created(deal) => {
        self.telemetry.deal_transition("created");
        let message = format!(
          "Deal created. Share the id {} with your buyer.\n\n{}",
          deal.id,
          self.render_deal(&deal)
        );
        self.reply(actor, &message).await;
      }
      InputOutcome::Joined(deal) => {
        self.telemetry.deal_transition("joined");
        self.observe_custody().await;
        let message = format!(
          "You joined deal {}. {} is held in escrow until the seller confirms.\n[cancel:{}] Cancel",
          deal.id,
          self.money(deal.price()),
          deal.id
        );
        self.reply(actor, &message).await;
        let seller_message = format!(
          "{} joined your deal {}. {} is in escrow. Deliver the item, then confirm.\n[settle:{}] Confirm delivery",
          event.display_name(),
          deal.id,
          self.money(deal.price()),
          deal.id
        );
        self.notify(&deal.seller, &seller_message).await;
      }
    }
    Ok(())
  }

  async fn settle(&self, event: &InboundEvent, deal_id: &DealId) -> Result<(), EscrowError> {
    let deal = self.registry.settle_deal(deal_id, &event.actor_id).await?;
    self.telemetry.deal_transition("settled");
    self.observe_custody().await;

    self
      .reply(
        &event.actor_id,
        &format!("Deal {} completed. {} credited to you.", deal.id, self.money(deal.price())),
      )
      .await;
    if let Some(buyer) = &deal.buyer {
      self
        .notify(buyer, &format!("Deal {} was completed by the seller.", deal.id))
        .await;
    }
    Ok(())
  }

  async fn cancel(&self, event: &InboundEvent, deal_id: &DealId) -> Result<(), EscrowError> {
    let actor = &event.actor_id;
    let deal = self.registry.cancel_deal(deal_id, actor).await?;
    self.telemetry.deal_transition("cancelled");

    let refund = match &deal.refunded_to {
      Some(buyer) => {
        self.observe_custody().await;
        format!(" {} refunded to {}.", self.money(deal.price()), buyer)
      }
      None => String::new(),
    };
    self
      .reply(actor, &format!("Deal {} cancelled.{refund}", deal.id))
      .await;

    let mut others: Vec<&ActorId> = vec![&deal.seller];
    others.extend(deal.refunded_to.as_ref());
    for other in others.into_iter().filter(|other| *other != actor) {
      self
        .notify(
          other,
          &format!("Deal {} was cancelled by {}.{refund}", deal.id, event.display_name()),
        )
        .await;
    }
    Ok(())
  }

  async fn show_deal(&self, actor: &ActorId, deal_id: &DealId) -> Result<(), EscrowError> {
    let deal = self
      .registry
      .get_deal(deal_id)
      .await
      .ok_or_else(|| EscrowError::DealNotFound(deal_id.clone()))?;
    let visible = deal.is_party(actor)
      || deal.refunded_to.as_ref() == Some(actor)
      || self.registry.is_operator(actor);
    if !visible {
      return Err(EscrowError::NotAuthorized {
        actor: actor.clone(),
        deal_id: deal_id.clone(),
      });
    }
    self.reply(actor, &self.render_deal(&deal)).await;
    Ok(())
  }

  async fn list_deals(&self, actor: &ActorId) {
    let deals = self.registry.deals_for(actor).await;
    if deals.is_empty() {
      self.reply(actor, "You have no deals yet.").await;
      return;
    }
    let lines: Vec<String> = deals
      .iter()
      .map(|deal| {
        let role = if &deal.seller == actor { "seller" } else { "buyer" };
        format!(
          "{} {} ({}) {} [{}]",
          deal.id,
          deal.item.name,
          role,
          self.money(deal.price()),
          deal.status
        )
      })
      .collect();
    self
      .reply(actor, &format!("Your deals:\n{}", lines.join("\n")))
      .await;
  }

  /// `givebalance <actor> <amount>`; silent for non-operators.
  async fn give_balance(&self, operator: &ActorId, args: &[&str]) -> Result<(), EscrowError> {
    if !self.registry.is_operator(operator) {
      debug!("givebalance from non-operator ignored");
      return Ok(());
    }
    let [target, raw_amount] = args else {
      self
        .reply(operator, "Usage: /givebalance <actor_id> <amount>")
        .await;
      return Ok(());
    };
    let Ok(amount) = parse_amount(raw_amount) else {
      self
        .reply(operator, &format!("Invalid amount: {raw_amount}"))
        .await;
      return Ok(());
    };

    let target = ActorId::from(*target);
    if &target == self.registry.ledger().custody() {
      self
        .reply(operator, "The custody account cannot be credited directly.")
        .await;
      return Ok(());
    }

    let balance = self.registry.ledger().credit(&target, amount).await?;
    self.telemetry.credited();
    info!(recipient = %target, amount = %amount, "Operator credit applied");

    self
      .reply(
        operator,
        &format!(
          "Credited {} to {}. New balance: {}",
          self.money(amount),
          target,
          self.money(balance)
        ),
      )
      .await;
    self
      .notify(
        &target,
        &format!(
          "Your balance was credited with {}. Balance: {}",
          self.money(amount),
          self.money(balance)
        ),
      )
      .await;
    Ok(())
  }

  async fn observe_custody(&self) {
    let ledger = self.registry.ledger();
    self
      .telemetry
      .custody_balance(ledger.balance(ledger.custody()).await);
  }

  fn welcome(&self, event: &InboundEvent) -> String {
    format!(
      "Hello, {}! This desk holds payment in escrow until the seller delivers.\n\
       [create_deal] New deal\n[balance] Balance\n[deals] My deals",
      event.display_name()
    )
  }

  fn money(&self, amount: Decimal) -> String {
    format!("{} {}", amount.normalize(), self.currency)
  }

  fn render_deal(&self, deal: &Deal) -> String {
    let buyer = deal
      .buyer
      .as_ref()
      .or(deal.refunded_to.as_ref())
      .map_or_else(|| "-".to_string(), ToString::to_string);
    let mut card = format!(
      "Deal {}\nItem: {} - {}\nDescription: {}\nPrice: {}\nStatus: {}\nSeller: {}\nBuyer: {}",
      deal.id,
      deal.item.kind,
      deal.item.name,
      deal.item.description,
      self.money(deal.price()),
      deal.status,
      deal.seller,
      buyer
    );
    match deal.status {
      DealStatus::WaitingBuyer => card.push_str(&format!("\n[cancel:{}] Cancel", deal.id)),
      DealStatus::InProgress => card.push_str(&format!(
        "\n[settle:{}] Confirm delivery\n[cancel:{}] Cancel",
        deal.id, deal.id
      )),
      DealStatus::Completed | DealStatus::Cancelled => {}
    }
    card
  }

  fn render_error(&self, error: &EscrowError) -> String {
    match error {
      EscrowError::InsufficientFunds { balance, required, .. } => format!(
        "Insufficient funds: you have {}, the deal needs {}.",
        self.money(*balance),
        self.money(*required)
      ),
      other => format!("Sorry, {other}."),
    }
  }

  async fn reply(&self, actor: &ActorId, message: &str) {
    self.notify(actor, message).await;
  }

  async fn notify(&self, actor: &ActorId, message: &str) {
    if let Err(e) = self.notifier.notify(actor, message).await {
      warn!(to = %actor, error = %e, "Notification failed");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::adapters::persistence::InMemoryRepository;
  use crate::domain::DealIdSequence;
  use crate::ports::telemetry::NoopTelemetry;
  use crate::usecases::ledger::Ledger;
  use async_trait::async_trait;
  use rust_decimal_macros::dec;
  use std::collections::HashSet;
  use tokio::sync::Mutex;

  #[derive(Default)]
  struct Outbox {
    sent: Mutex<Vec<(ActorId, String)>>,
  }

  impl Outbox {
    async fn last_to(&self, actor: &str) -> Option<String> {
      self
        .sent
        .lock()
        .await
        .iter()
        .rev()
        .find(|(to, _)| to.as_str() == actor)
        .map(|(_, m)| m.clone())
    }
  }

  #[async_trait]
  impl Notifier for Outbox {
    async fn notify(&self, actor: &ActorId, message: &str) -> anyhow::Result<()> {
      self.sent.lock().await.push((actor.clone(), message.to_string()));
      Ok(())
    }
  }

  fn dispatcher(limit: u32) -> (Dispatcher<InMemoryRepository, Outbox>, Arc<Outbox>) {
    let repo = Arc::new(InMemoryRepository::new());
    let ledger = Arc::new(Ledger::new(Arc::clone(&repo), ActorId::from("escrow")));
    let registry = Arc::new(DealRegistry::new(
      repo,
      ledger,
      DealIdSequence::default(),
      HashSet::from([ActorId::from("op")]),
    ));
    let router = Arc::new(SessionRouter::new(
      Arc::clone(&registry),
      chrono::Duration::minutes(15),
    ));
    let outbox = Arc::new(Outbox::default());
    let dispatcher = Dispatcher::new(
      registry,
      router,
      Arc::clone(&outbox),
      Arc::new(NoopTelemetry),
      DispatcherSettings {
        currency: "USDT".into(),
        max_events_per_minute: limit,
      },
    );
    (dispatcher, outbox)
  }

  fn cmd(actor: &str, payload: &str) -> InboundEvent {
    InboundEvent::new(actor, EventKind::Command, payload)
  }

  #[tokio::test]
  async fn test_givebalance_usage_and_invalid_amount() {
    let (d, outbox) = dispatcher(100);
    d.handle(cmd("op", "/givebalance 42")).await.unwrap();
    assert!(outbox.last_to("op").await.unwrap().starts_with("Usage"));

    d.handle(cmd("op", "/givebalance 42 abc")).await.unwrap();
    assert!(outbox.last_to("op").await.unwrap().contains("Invalid amount"));

    d.handle(cmd("op", "/givebalance 42 -5")).await.unwrap();
    assert!(outbox.last_to("op").await.unwrap().contains("Invalid amount"));
  }

  #[tokio::test]
  async fn test_givebalance_credits_and_notifies() {
    let (d, outbox) = dispatcher(100);
    d.handle(cmd("op", "/givebalance 42 40")).await.unwrap();
    assert_eq!(d.registry().ledger().balance(&ActorId::from("42")).await, dec!(40));
    assert!(outbox.last_to("42").await.unwrap().contains("40 USDT"));
  }

  #[tokio::test]
  async fn test_givebalance_silent_for_non_operator() {
    let (d, outbox) = dispatcher(100);
    d.handle(cmd("42", "/givebalance 42 1000")).await.unwrap();
    assert_eq!(d.registry().ledger().balance(&ActorId::from("42")).await, dec!(0));
    assert!(outbox.sent.lock().await.is_empty());
  }

  #[tokio::test]
  async fn test_rate_limiter_drops_flood() {
    let (d, outbox) = dispatcher(2);
    for _ in 0..5 {
      d.handle(cmd("42", "/balance")).await.unwrap();
    }
    assert_eq!(outbox.sent.lock().await.len(), 2);
  }

  #[tokio::test]
  async fn test_fatal_persistence_is_escalated() {
    let repo = Arc::new(InMemoryRepository::new());
    let ledger = Arc::new(Ledger::new(Arc::clone(&repo), ActorId::from("escrow")));
    let registry = Arc::new(DealRegistry::new(
      Arc::clone(&repo),
      ledger,
      DealIdSequence::default(),
      HashSet::from([ActorId::from("op")]),
    ));
    let router = Arc::new(SessionRouter::new(
      Arc::clone(&registry),
      chrono::Duration::minutes(15),
    ));
    let d = Dispatcher::new(
      registry,
      router,
      Arc::new(Outbox::default()),
      Arc::new(NoopTelemetry),
      DispatcherSettings {
        currency: "USDT".into(),
        max_events_per_minute: 100,
      },
    );

    repo.fail_commits(true);
    assert!(d.handle(cmd("op", "/givebalance 42 10")).await.is_err());
  }
}
