//! Persistence Adapters - File and In-Memory Escrow Storage
//!
//! Implements the `EscrowRepository` port with atomic JSON snapshots
//! plus an append-only JSONL journal, and a volatile in-memory variant.
//! No database dependency - lightweight and crash-recoverable.

pub mod journal;
pub mod memory;
pub mod repository_impl;
pub mod state;

pub use journal::JournalLogger;
pub use memory::InMemoryRepository;
pub use repository_impl::FileRepository;
pub use state::StateStore;
