//! Ports Layer - Hexagonal Architecture Boundaries
//!
//! Defines the interfaces (traits) that the use-case layer requires
//! from the outside world. Adapters implement these traits.
//!
//! Port categories:
//! - `EscrowRepository`: durable accounts, deals and id sequence
//! - `Notifier` / `InboundEvent`: the chat transport
//! - `Telemetry`: operational counters

pub mod repository;
pub mod telemetry;
pub mod transport;
