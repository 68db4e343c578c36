//! Adapters Layer - Hexagonal Architecture Outer Ring
//!
//! Implements the port traits defined in `crate::ports` with concrete
//! infrastructure. Each sub-module groups adapters by concern.
//!
//! Adapter categories:
//! - `metrics`: Prometheus metrics export and health checks
//! - `persistence`: atomic state snapshots, JSONL journal, in-memory store
//! - `transport`: JSON-lines console stand-in for the chat platform

pub mod metrics;
pub mod persistence;
pub mod transport;
