//! Escrow error taxonomy.
//!
//! Every variant except `Persistence` is an expected, recoverable outcome
//! that the presentation layer turns into a user-facing message.
//! `Persistence` means a durable write failed; the caller must escalate it,
//! since dropping a ledger write would break conservation.

use rust_decimal::Decimal;
use thiserror::Error;

use super::deal::DealStatus;
use super::ids::{ActorId, DealId};

/// Errors produced by the ledger, the deal registry and the session router.
#[derive(Debug, Error)]
pub enum EscrowError {
    /// Amount is not a positive number.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// Balance is lower than the amount requested.
    #[error("insufficient funds for {actor}: balance {balance}, required {required}")]
    InsufficientFunds {
        actor: ActorId,
        balance: Decimal,
        required: Decimal,
    },

    /// Listing fields failed validation.
    #[error("invalid listing: {0}")]
    InvalidListing(String),

    /// No deal with this id exists.
    #[error("deal {0} not found")]
    DealNotFound(DealId),

    /// The deal's status does not allow the requested transition.
    #[error("deal {deal_id} is {status} and cannot accept this action")]
    DealNotJoinable { deal_id: DealId, status: DealStatus },

    /// The actor is not a party to the deal (or not its seller).
    #[error("{actor} is not authorized to act on deal {deal_id}")]
    NotAuthorized { actor: ActorId, deal_id: DealId },

    /// A seller tried to join their own deal.
    #[error("seller cannot join their own deal {0}")]
    SelfDealNotAllowed(DealId),

    /// The id sequence wrapped onto an id that is already in use.
    #[error("deal id {0} is already in use; the id sequence has wrapped")]
    DealIdCollision(DealId),

    /// A durable write failed. Fatal for the process.
    #[error("persistence failure: {0:#}")]
    Persistence(anyhow::Error),
}

impl EscrowError {
    /// Short machine-readable label, used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidAmount(_) => "invalid_amount",
            Self::InsufficientFunds { .. } => "insufficient_funds",
            Self::InvalidListing(_) => "invalid_listing",
            Self::DealNotFound(_) => "deal_not_found",
            Self::DealNotJoinable { .. } => "deal_not_joinable",
            Self::NotAuthorized { .. } => "not_authorized",
            Self::SelfDealNotAllowed(_) => "self_deal_not_allowed",
            Self::DealIdCollision(_) => "deal_id_collision",
            Self::Persistence(_) => "persistence",
        }
    }

    /// Whether this error must stop the process instead of being reported.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Persistence(_))
    }
}
