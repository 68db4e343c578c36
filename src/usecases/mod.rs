//! Use Cases Layer - Application Business Logic
//!
//! Orchestrates domain logic with port interfaces to implement the
//! desk's workflows.
//!
//! Use cases:
//! - `restore_desk`: rebuild ledger and registry from durable state
//! - `Ledger`: balances, credits, debits and atomic transfers
//! - `DealRegistry`: deal lifecycle and escrow movements
//! - `SessionRouter`: pending free-text input per actor
//! - `Dispatcher`: inbound event routing, replies and notifications
//! - `WorkerLanes`: actor-sharded concurrent event processing

pub mod bootstrap;
pub mod deal_registry;
pub mod dispatcher;
pub mod lanes;
pub mod ledger;
pub mod session_router;

pub use bootstrap::{restore_desk, RestoredDesk};
pub use deal_registry::DealRegistry;
pub use dispatcher::{Dispatcher, DispatcherSettings};
pub use lanes::WorkerLanes;
pub use ledger::{Ledger, StagedTransfer};
pub use session_router::{InputOutcome, PendingInput, PendingKind, SessionRouter};
