//! Prometheus Metrics Registry - Escrow Observability
//!
//! Registers the desk's counters and gauges and renders them in the
//! Prometheus text format for the `/metrics` route of the health server.

use std::time::Duration;

use prometheus::{
    Encoder, Gauge, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::ports::telemetry::Telemetry;
use crate::ports::transport::EventKind;

/// Centralized Prometheus metrics for the escrow desk.
///
/// All metrics follow the naming convention `escrow_desk_*`.
pub struct MetricsRegistry {
    registry: Registry,
    /// Inbound events by kind (command, callback, text).
    pub events: IntCounterVec,
    /// Events dropped by the per-actor rate limiter.
    pub rate_limited: IntCounter,
    /// Deal lifecycle transitions by event (created, joined, settled, cancelled).
    pub deals: IntCounterVec,
    /// Rejected operations by error kind.
    pub rejected: IntCounterVec,
    /// Operator credits applied.
    pub credits: IntCounter,
    /// Current custody balance.
    pub custody_balance: Gauge,
    /// Event handling latency in microseconds.
    pub handle_latency_us: HistogramVec,
}

impl MetricsRegistry {
    /// Create and register all Prometheus metrics.
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let events = IntCounterVec::new(
            Opts::new("escrow_desk_events_total", "Inbound events handled"),
            &["kind"],
        )?;

        let rate_limited = IntCounter::new(
            "escrow_desk_rate_limited_total",
            "Inbound events dropped by the per-actor rate limiter",
        )?;

        let deals = IntCounterVec::new(
            Opts::new("escrow_desk_deals_total", "Deal lifecycle transitions"),
            &["event"],
        )?;

        let rejected = IntCounterVec::new(
            Opts::new(
                "escrow_desk_rejected_total",
                "Operations rejected, by error kind",
            ),
            &["kind"],
        )?;

        let credits = IntCounter::new(
            "escrow_desk_credits_total",
            "Operator balance credits applied",
        )?;

        let custody_balance = Gauge::new(
            "escrow_desk_custody_balance",
            "Funds currently held in custody for in-progress deals",
        )?;

        let handle_latency_us = HistogramVec::new(
            HistogramOpts::new(
                "escrow_desk_handle_latency_us",
                "Event handling latency in microseconds",
            )
            .buckets(vec![
                50.0, 100.0, 500.0, 1000.0, 5000.0, 10000.0, 50000.0, 250_000.0,
            ]),
            &["kind"],
        )?;

        registry.register(Box::new(events.clone()))?;
        registry.register(Box::new(rate_limited.clone()))?;
        registry.register(Box::new(deals.clone()))?;
        registry.register(Box::new(rejected.clone()))?;
        registry.register(Box::new(credits.clone()))?;
        registry.register(Box::new(custody_balance.clone()))?;
        registry.register(Box::new(handle_latency_us.clone()))?;

        Ok(Self {
            registry,
            events,
            rate_limited,
            deals,
            rejected,
            credits,
            custody_balance,
            handle_latency_us,
        })
    }

    /// Render every metric family in the text exposition format.
    pub fn render(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

fn kind_label(kind: EventKind) -> &'static str {
    match kind {
        EventKind::Command => "command",
        EventKind::Callback => "callback",
        EventKind::Text => "text",
    }
}

impl Telemetry for MetricsRegistry {
    fn event_handled(&self, kind: EventKind, elapsed: Duration) {
        let label = kind_label(kind);
        self.events.with_label_values(&[label]).inc();
        self.handle_latency_us
            .with_label_values(&[label])
            .observe(elapsed.as_secs_f64() * 1_000_000.0);
    }

    fn rate_limited(&self) {
        self.rate_limited.inc();
    }

    fn deal_transition(&self, event: &'static str) {
        self.deals.with_label_values(&[event]).inc();
    }

    fn rejected(&self, kind: &'static str) {
        self.rejected.with_label_values(&[kind]).inc();
    }

    fn credited(&self) {
        self.credits.inc();
    }

    fn custody_balance(&self, balance: Decimal) {
        self.custody_balance.set(balance.to_f64().unwrap_or(f64::NAN));
    }
}
