//! Worker Lanes - Actor-Sharded Event Processing
//!
//! Events are hashed by actor onto a fixed set of lanes, each drained by
//! one task. Events from the same actor are therefore handled in arrival
//! order while different actors proceed concurrently. The first fatal
//! error reported by any lane is forwarded to the supervisor and every
//! lane stops.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument};

use crate::domain::ActorId;
use crate::ports::repository::EscrowRepository;
use crate::ports::transport::{InboundEvent, Notifier};

use super::dispatcher::Dispatcher;

/// Fixed pool of per-shard workers in front of a dispatcher.
pub struct WorkerLanes {
  senders: Vec<mpsc::Sender<InboundEvent>>,
  handles: Vec<JoinHandle<()>>,
}

impl WorkerLanes {
  /// Spawn `workers` lanes, each with a queue of `capacity` events.
  ///
  /// A fatal dispatcher error is sent on `fatal_tx` and stops the lane;
  /// all lanes stop on `shutdown_tx`.
  pub fn spawn<R, N>(
    dispatcher: Arc<Dispatcher<R, N>>,
    workers: usize,
    capacity: usize,
    fatal_tx: mpsc::Sender<anyhow::Error>,
    shutdown_tx: &broadcast::Sender<()>,
  ) -> Self
  where
    R: EscrowRepository,
    N: Notifier,
  {
    let workers = workers.max(1);
    let mut senders = Vec::with_capacity(workers);
    let mut handles = Vec::with_capacity(workers);

    for lane in 0..workers {
      let (tx, rx) = mpsc::channel(capacity.max(1));
      senders.push(tx);
      handles.push(tokio::spawn(run_lane(
        lane,
        Arc::clone(&dispatcher),
        rx,
        fatal_tx.clone(),
        shutdown_tx.subscribe(),
      )));
    }

    info!(workers, "Worker lanes started");
    Self { senders, handles }
  }

  pub fn lane_count(&self) -> usize {
    self.senders.len()
  }

  /// Lane index for an actor. Stable for the lifetime of the process.
  pub fn lane_for(&self, actor: &ActorId) -> usize {
    let mut hasher = DefaultHasher::new();
    actor.hash(&mut hasher);
    (hasher.finish() % self.senders.len() as u64) as usize
  }

  /// Queue an event on its actor's lane, waiting if the lane is full.
  pub async fn dispatch(&self, event: InboundEvent) -> Result<()> {
    let lane = self.lane_for(&event.actor_id);
    self.senders[lane]
      .send(event)
      .await
      .with_context(|| format!("Worker lane {lane} is closed"))
  }

  /// Drain `inbound` onto the lanes until it closes or shutdown fires.
  #[instrument(skip_all)]
  pub async fn forward(
    &self,
    mut inbound: mpsc::Receiver<InboundEvent>,
    mut shutdown_rx: broadcast::Receiver<()>,
  ) -> Result<()> {
    loop {
      tokio::select! {
        biased;
        _ = shutdown_rx.recv() => {
          debug!("Forwarder received shutdown signal");
          return Ok(());
        }
        event = inbound.recv() => match event {
          Some(event) => self.dispatch(event).await?,
          None => return Ok(()),
        },
      }
    }
  }

  /// Close the queues and wait for every lane to finish its backlog.
  pub async fn join(self) {
    drop(self.senders);
    for handle in self.handles {
      if let Err(e) = handle.await {
        error!(error = %e, "Worker lane panicked");
      }
    }
  }
}

async fn run_lane<R, N>(
  lane: usize,
  dispatcher: Arc<Dispatcher<R, N>>,
  mut rx: mpsc::Receiver<InboundEvent>,
  fatal_tx: mpsc::Sender<anyhow::Error>,
  mut shutdown_rx: broadcast::Receiver<()>,
) where
  R: EscrowRepository,
  N: Notifier,
{
  loop {
    let event = tokio::select! {
      biased;
      _ = shutdown_rx.recv() => break,
      event = rx.recv() => match event {
        Some(event) => event,
        None => break,
      },
    };

    if let Err(e) = dispatcher.handle(event).await {
      error!(lane, error = format!("{e:#}"), "Lane stopping after fatal error");
      let _ = fatal_tx.try_send(e);
      break;
    }
  }
  debug!(lane, "Worker lane stopped");
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::adapters::persistence::InMemoryRepository;
  use crate::domain::DealIdSequence;
  use crate::ports::telemetry::NoopTelemetry;
  use crate::ports::transport::EventKind;
  use crate::usecases::deal_registry::DealRegistry;
  use crate::usecases::dispatcher::DispatcherSettings;
  use crate::usecases::ledger::Ledger;
  use crate::usecases::session_router::SessionRouter;
  use async_trait::async_trait;
  use rust_decimal_macros::dec;
  use std::collections::HashSet;

  struct Silent;

  #[async_trait]
  impl Notifier for Silent {
    async fn notify(&self, _actor: &ActorId, _message: &str) -> anyhow::Result<()> {
      Ok(())
    }
  }

  fn build(repo: Arc<InMemoryRepository>) -> Arc<Dispatcher<InMemoryRepository, Silent>> {
    let ledger = Arc::new(Ledger::new(Arc::clone(&repo), ActorId::from("escrow")));
    let registry = Arc::new(DealRegistry::new(
      repo,
      ledger,
      DealIdSequence::default(),
      HashSet::from([ActorId::from("op")]),
    ));
    let router = Arc::new(SessionRouter::new(
      Arc::clone(&registry),
      chrono::Duration::minutes(15),
    ));
    Arc::new(Dispatcher::new(
      registry,
      router,
      Arc::new(Silent),
      Arc::new(NoopTelemetry),
      DispatcherSettings {
        currency: "USDT".into(),
        max_events_per_minute: 10_000,
      },
    ))
  }

  #[tokio::test]
  async fn test_lanes_process_every_event() {
    let dispatcher = build(Arc::new(InMemoryRepository::new()));
    let (fatal_tx, _fatal_rx) = mpsc::channel(1);
    let (shutdown_tx, _) = broadcast::channel(1);
    let lanes = WorkerLanes::spawn(Arc::clone(&dispatcher), 4, 64, fatal_tx, &shutdown_tx);

    for i in 0..20 {
      lanes
        .dispatch(InboundEvent::new("op", EventKind::Command, format!("/givebalance user{i} 5")))
        .await
        .unwrap();
    }
    lanes.join().await;

    assert_eq!(dispatcher.registry().ledger().total().await, dec!(100));
  }

  #[tokio::test]
  async fn test_same_actor_always_same_lane() {
    let dispatcher = build(Arc::new(InMemoryRepository::new()));
    let (fatal_tx, _fatal_rx) = mpsc::channel(1);
    let (shutdown_tx, _) = broadcast::channel(1);
    let lanes = WorkerLanes::spawn(dispatcher, 8, 4, fatal_tx, &shutdown_tx);

    let actor = ActorId::from("42");
    let lane = lanes.lane_for(&actor);
    assert!(lane < lanes.lane_count());
    assert!((0..10).all(|_| lanes.lane_for(&actor) == lane));
    lanes.join().await;
  }

  #[tokio::test]
  async fn test_fatal_error_is_reported() {
    let repo = Arc::new(InMemoryRepository::new());
    let dispatcher = build(Arc::clone(&repo));
    let (fatal_tx, mut fatal_rx) = mpsc::channel(1);
    let (shutdown_tx, _) = broadcast::channel(1);
    let lanes = WorkerLanes::spawn(dispatcher, 2, 8, fatal_tx, &shutdown_tx);

    repo.fail_commits(true);
    lanes
      .dispatch(InboundEvent::new("op", EventKind::Command, "/givebalance 42 10"))
      .await
      .unwrap();

    let err = fatal_rx.recv().await.unwrap();
    assert!(format!("{err:#}").contains("persisted"));
    lanes.join().await;
  }
}
