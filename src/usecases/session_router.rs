//! Session Router - Per-Actor Pending Input
//!
//! Remembers which free-text input an actor was last asked for and routes
//! the next text message to the matching registry operation. One slot per
//! actor; declaring a new intent replaces the old one.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::domain::{parse_listing, ActorId, Deal, DealId, EscrowError, Item};
use crate::ports::repository::EscrowRepository;

use super::deal_registry::DealRegistry;

/// What the next free-text message from an actor is expected to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingKind {
  /// `type; name; description; price`
  SubmitListing,
  /// `#A7342`
  SubmitDealId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingInput {
  pub kind: PendingKind,
  pub expires_at: DateTime<Utc>,
}

/// Result of feeding free text to the router.
#[derive(Debug, Clone, PartialEq)]
pub enum InputOutcome {
  /// No live slot for the actor; the text is not part of any flow.
  Ignored,
  /// Text did not parse; the slot is kept so the actor can resend.
  Malformed(PendingKind),
  Created(Deal),
  Joined(Deal),
}

enum Parsed {
  Listing(Item),
  DealId(DealId),
}

pub struct SessionRouter<R: EscrowRepository> {
  registry: Arc<DealRegistry<R>>,
  pending: Mutex<HashMap<ActorId, PendingInput>>,
  ttl: Duration,
}

impl<R: EscrowRepository> SessionRouter<R> {
  pub fn new(registry: Arc<DealRegistry<R>>, ttl: Duration) -> Self {
    Self {
      registry,
      pending: Mutex::new(HashMap::new()),
      ttl,
    }
  }

  /// Record that the actor's next text is `kind`. Last declaration wins.
  #[instrument(skip(self), fields(actor = %actor))]
  pub async fn declare_intent(&self, actor: &ActorId, kind: PendingKind) {
    let slot = PendingInput {
      kind,
      expires_at: Utc::now() + self.ttl,
    };
    self.pending.lock().await.insert(actor.clone(), slot);
    debug!("Pending input declared");
  }

  /// Live pending kind for the actor, if any.
  pub async fn pending_kind(&self, actor: &ActorId) -> Option<PendingKind> {
    let pending = self.pending.lock().await;
    pending
      .get(actor)
      .filter(|slot| slot.expires_at > Utc::now())
      .map(|slot| slot.kind)
  }

  /// Route free text according to the actor's pending slot.
  ///
  /// A successful parse clears the slot before the registry is called, so
  /// a rejected create or join needs a fresh `declare_intent`.
  #[instrument(skip(self, raw), fields(actor = %actor))]
  pub async fn consume_input(&self, actor: &ActorId, raw: &str) -> Result<InputOutcome, EscrowError> {
    let parsed = {
      let mut pending = self.pending.lock().await;
      let Some(slot) = pending.get(actor) else {
        return Ok(InputOutcome::Ignored);
      };
      if slot.expires_at <= Utc::now() {
        pending.remove(actor);
        debug!("Pending input expired");
        return Ok(InputOutcome::Ignored);
      }

      let kind = slot.kind;
      let parsed = match kind {
        PendingKind::SubmitListing => parse_listing(raw).map(Parsed::Listing),
        PendingKind::SubmitDealId => DealId::parse(raw).map(Parsed::DealId),
      };
      match parsed {
        Some(parsed) => {
          pending.remove(actor);
          parsed
        }
        None => {
          debug!(?kind, "Malformed input, slot kept");
          return Ok(InputOutcome::Malformed(kind));
        }
      }
    };

    match parsed {
      Parsed::Listing(item) => self
        .registry
        .create_deal(actor, item)
        .await
        .map(InputOutcome::Created),
      Parsed::DealId(deal_id) => self
        .registry
        .join_deal(&deal_id, actor)
        .await
        .map(InputOutcome::Joined),
    }
  }

  /// Drop every expired slot. Returns how many were removed.
  pub async fn sweep_expired(&self) -> usize {
    let now = Utc::now();
    let mut pending = self.pending.lock().await;
    let before = pending.len();
    pending.retain(|_, slot| slot.expires_at > now);
    let removed = before - pending.len();
    if removed > 0 {
      info!(removed, remaining = pending.len(), "Swept expired pending inputs");
    }
    removed
  }

  pub async fn pending_count(&self) -> usize {
    self.pending.lock().await.len()
  }
}
