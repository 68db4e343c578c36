//! Domain layer - Escrow entities and pure rules.
//!
//! Deals, items, identifiers, amounts and the error taxonomy. Nothing in
//! here performs I/O or holds locks; the use-case layer owns concurrency
//! and persistence.

pub mod amount;
pub mod deal;
pub mod error;
pub mod ids;
pub mod listing;

pub use amount::{parse_amount, validate_amount};
pub use deal::{Deal, DealStatus, Item};
pub use error::EscrowError;
pub use ids::{ActorId, DealId, DealIdSequence};
pub use listing::parse_listing;
