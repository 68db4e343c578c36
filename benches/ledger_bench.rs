//! Escrow Benchmarks - Hot-Path Performance
//!
//! Benchmarks the pure domain helpers that run on every inbound message
//! and the ledger transfer path behind every join, settle and refund.
//!
//! Run with: cargo bench --bench ledger_bench

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rust_decimal_macros::dec;
use tokio::runtime::Runtime;

use escrow_desk::adapters::persistence::InMemoryRepository;
use escrow_desk::domain::{parse_listing, ActorId, DealId, DealIdSequence};
use escrow_desk::usecases::Ledger;

/// Benchmark deal id generation including letter rollover.
fn bench_deal_id_sequence(c: &mut Criterion) {
    c.bench_function("deal_id_next", |b| {
        let mut seq = DealIdSequence::default();
        b.iter(|| black_box(seq.next_id()));
    });
}

/// Benchmark listing and deal id parsing of typical user input.
fn bench_parsing(c: &mut Criterion) {
    c.bench_function("parse_listing", |b| {
        b.iter(|| parse_listing(black_box("NFT; MoonArt #12; Hand-drawn moon; 35.50")));
    });

    c.bench_function("parse_deal_id", |b| {
        b.iter(|| DealId::parse(black_box("  #A7342 ")));
    });
}

/// Benchmark a committed two-account transfer against the in-memory store.
fn bench_ledger_transfer(c: &mut Criterion) {
    let rt = match Runtime::new() {
        Ok(rt) => rt,
        Err(e) => panic!("failed to build runtime: {e}"),
    };
    let ledger = Arc::new(Ledger::new(
        Arc::new(InMemoryRepository::new()),
        ActorId::from("escrow"),
    ));
    let alice = ActorId::from("alice");
    let bob = ActorId::from("bob");
    rt.block_on(async {
        ledger.credit(&alice, dec!(1000000)).await.ok();
        ledger.credit(&bob, dec!(1000000)).await.ok();
    });

    c.bench_function("ledger_transfer_roundtrip", |b| {
        b.to_async(&rt).iter(|| {
            let ledger = Arc::clone(&ledger);
            let (alice, bob) = (alice.clone(), bob.clone());
            async move {
                ledger.transfer(&alice, &bob, dec!(1)).await.ok();
                ledger.transfer(&bob, &alice, dec!(1)).await.ok();
            }
        });
    });
}

criterion_group!(
    benches,
    bench_deal_id_sequence,
    bench_parsing,
    bench_ledger_transfer,
);
criterion_main!(benches);
