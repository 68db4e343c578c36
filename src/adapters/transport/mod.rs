//! Transport Adapters
//!
//! Concrete inbound sources and `Notifier` implementations.

pub mod console;

pub use console::{read_events, ConsoleNotifier};
