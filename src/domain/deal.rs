//! Deal records and their state machine.
//!
//! ```text
//! waiting_buyer --join-->   in_progress
//! waiting_buyer --cancel--> cancelled
//! in_progress   --settle--> completed
//! in_progress   --cancel--> cancelled   (buyer refunded)
//! ```
//!
//! Transitions are pure: each returns the next version of the deal and
//! leaves `self` untouched, so the registry can persist the new version
//! before it replaces the old one in memory.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::amount::validate_amount;
use super::error::EscrowError;
use super::ids::{ActorId, DealId};

/// Lifecycle status of a deal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DealStatus {
    /// Listed by the seller, no buyer yet, no funds held.
    WaitingBuyer,
    /// Buyer joined; the price sits in custody.
    InProgress,
    /// Seller confirmed delivery and was paid.
    Completed,
    /// Cancelled; any escrowed funds went back to the buyer.
    Cancelled,
}

impl DealStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl fmt::Display for DealStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::WaitingBuyer => "waiting_buyer",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// The thing being sold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Free-form category, e.g. `NFT`.
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub description: String,
    pub price: Decimal,
}

impl Item {
    /// Validate and build an item.
    ///
    /// Text fields are trimmed and must be non-empty; the price must be
    /// positive.
    pub fn new(
        kind: &str,
        name: &str,
        description: &str,
        price: Decimal,
    ) -> Result<Self, EscrowError> {
        let fields = [("type", kind), ("name", name), ("description", description)];
        for (label, value) in fields {
            if value.trim().is_empty() {
                return Err(EscrowError::InvalidListing(format!("{label} is empty")));
            }
        }
        let price = validate_amount(price)
            .map_err(|_| EscrowError::InvalidListing(format!("price {price} is not positive")))?;

        Ok(Self {
            kind: kind.trim().to_string(),
            name: name.trim().to_string(),
            description: description.trim().to_string(),
            price,
        })
    }
}

/// One escrowed trade between a seller and (eventually) a buyer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deal {
    pub id: DealId,
    pub seller: ActorId,
    /// Set exactly while the deal is `in_progress` or `completed`.
    pub buyer: Option<ActorId>,
    pub item: Item,
    pub status: DealStatus,
    /// Buyer that received the refund when an in-progress deal was cancelled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refunded_to: Option<ActorId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Deal {
    /// A fresh listing waiting for a buyer.
    pub fn new(id: DealId, seller: ActorId, item: Item, now: DateTime<Utc>) -> Self {
        Self {
            id,
            seller,
            buyer: None,
            item,
            status: DealStatus::WaitingBuyer,
            refunded_to: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn price(&self) -> Decimal {
        self.item.price
    }

    /// Whether `actor` is the seller or the buyer.
    pub fn is_party(&self, actor: &ActorId) -> bool {
        &self.seller == actor || self.buyer.as_ref() == Some(actor)
    }

    /// `waiting_buyer` → `in_progress` with `buyer` assigned.
    pub fn joined(&self, buyer: ActorId, now: DateTime<Utc>) -> Result<Self, EscrowError> {
        self.require(DealStatus::WaitingBuyer)?;
        if buyer == self.seller {
            return Err(EscrowError::SelfDealNotAllowed(self.id.clone()));
        }
        Ok(Self {
            buyer: Some(buyer),
            status: DealStatus::InProgress,
            updated_at: now,
            ..self.clone()
        })
    }

    /// `in_progress` → `completed`. Only the seller may settle.
    pub fn settled(&self, actor: &ActorId, now: DateTime<Utc>) -> Result<Self, EscrowError> {
        if actor != &self.seller {
            return Err(EscrowError::NotAuthorized {
                actor: actor.clone(),
                deal_id: self.id.clone(),
            });
        }
        self.require(DealStatus::InProgress)?;
        Ok(Self {
            status: DealStatus::Completed,
            updated_at: now,
            ..self.clone()
        })
    }

    /// Any non-terminal state → `cancelled`.
    ///
    /// Authorization is checked by the caller, which knows who the
    /// operators are. The buyer (if any) moves to `refunded_to`.
    pub fn cancelled(&self, now: DateTime<Utc>) -> Result<Self, EscrowError> {
        if self.status.is_terminal() {
            return Err(self.not_joinable());
        }
        Ok(Self {
            buyer: None,
            refunded_to: self.buyer.clone(),
            status: DealStatus::Cancelled,
            updated_at: now,
            ..self.clone()
        })
    }

    fn require(&self, status: DealStatus) -> Result<(), EscrowError> {
        if self.status == status {
            Ok(())
        } else {
            Err(self.not_joinable())
        }
    }

    fn not_joinable(&self) -> EscrowError {
        EscrowError::DealNotJoinable {
            deal_id: self.id.clone(),
            status: self.status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn listing() -> Deal {
        let item = Item::new("NFT", "MoonArt #12", "desc", dec!(35)).unwrap();
        Deal::new(DealId::from("#A7342"), ActorId::from("seller"), item, Utc::now())
    }

    #[test]
    fn test_item_rejects_empty_fields_and_bad_price() {
        assert!(Item::new(" ", "n", "d", dec!(1)).is_err());
        assert!(Item::new("t", "", "d", dec!(1)).is_err());
        assert!(Item::new("t", "n", "\t", dec!(1)).is_err());
        assert!(matches!(
            Item::new("t", "n", "d", dec!(0)),
            Err(EscrowError::InvalidListing(_))
        ));
    }

    #[test]
    fn test_item_trims_fields() {
        let item = Item::new(" NFT ", " MoonArt ", " rare ", dec!(35)).unwrap();
        assert_eq!(item.kind, "NFT");
        assert_eq!(item.name, "MoonArt");
        assert_eq!(item.description, "rare");
    }

    #[test]
    fn test_full_happy_path() {
        let deal = listing();
        assert_eq!(deal.status, DealStatus::WaitingBuyer);
        assert!(deal.buyer.is_none());

        let joined = deal.joined(ActorId::from("buyer"), Utc::now()).unwrap();
        assert_eq!(joined.status, DealStatus::InProgress);
        assert_eq!(joined.buyer, Some(ActorId::from("buyer")));
        // original untouched
        assert_eq!(deal.status, DealStatus::WaitingBuyer);

        let done = joined.settled(&ActorId::from("seller"), Utc::now()).unwrap();
        assert_eq!(done.status, DealStatus::Completed);
        assert_eq!(done.buyer, Some(ActorId::from("buyer")));
    }

    #[test]
    fn test_join_twice_is_not_joinable() {
        let joined = listing().joined(ActorId::from("b1"), Utc::now()).unwrap();
        let err = joined.joined(ActorId::from("b2"), Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            EscrowError::DealNotJoinable {
                status: DealStatus::InProgress,
                ..
            }
        ));
    }

    #[test]
    fn test_self_deal_rejected() {
        let err = listing().joined(ActorId::from("seller"), Utc::now()).unwrap_err();
        assert!(matches!(err, EscrowError::SelfDealNotAllowed(_)));
    }

    #[test]
    fn test_only_seller_settles() {
        let joined = listing().joined(ActorId::from("buyer"), Utc::now()).unwrap();
        let err = joined.settled(&ActorId::from("buyer"), Utc::now()).unwrap_err();
        assert!(matches!(err, EscrowError::NotAuthorized { .. }));
    }

    #[test]
    fn test_settle_requires_in_progress() {
        let err = listing()
            .settled(&ActorId::from("seller"), Utc::now())
            .unwrap_err();
        assert!(matches!(
            err,
            EscrowError::DealNotJoinable {
                status: DealStatus::WaitingBuyer,
                ..
            }
        ));
    }

    #[test]
    fn test_cancel_clears_buyer_and_records_refund() {
        let joined = listing().joined(ActorId::from("buyer"), Utc::now()).unwrap();
        let cancelled = joined.cancelled(Utc::now()).unwrap();
        assert_eq!(cancelled.status, DealStatus::Cancelled);
        assert!(cancelled.buyer.is_none());
        assert_eq!(cancelled.refunded_to, Some(ActorId::from("buyer")));

        assert!(cancelled.cancelled(Utc::now()).is_err());
        assert!(cancelled.joined(ActorId::from("b2"), Utc::now()).is_err());
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&DealStatus::WaitingBuyer).unwrap();
        assert_eq!(json, "\"waiting_buyer\"");
    }
}
