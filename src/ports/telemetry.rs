//! Telemetry Port - Counters Reported by the Use Cases
//!
//! Keeps the use-case layer free of any metrics backend. The Prometheus
//! adapter implements it; `NoopTelemetry` is used when metrics are off.

use std::time::Duration;

use rust_decimal::Decimal;

use super::transport::EventKind;

/// Sink for operational counters. Implementations must not block.
pub trait Telemetry: Send + Sync + 'static {
  fn event_handled(&self, kind: EventKind, elapsed: Duration);
  fn rate_limited(&self);
  /// `event` is one of `created`, `joined`, `settled`, `cancelled`.
  fn deal_transition(&self, event: &'static str);
  /// `kind` is `EscrowError::kind()`.
  fn rejected(&self, kind: &'static str);
  fn credited(&self);
  fn custody_balance(&self, balance: Decimal);
}

/// Telemetry sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

impl Telemetry for NoopTelemetry {
  fn event_handled(&self, _kind: EventKind, _elapsed: Duration) {}
  fn rate_limited(&self) {}
  fn deal_transition(&self, _event: &'static str) {}
  fn rejected(&self, _kind: &'static str) {}
  fn credited(&self) {}
  fn custody_balance(&self, _balance: Decimal) {}
}
