//! Escrow Desk - Entry Point
//!
//! Initializes configuration and logging, restores escrow state, and
//! runs the event pipeline until SIGINT or a fatal persistence failure.
//!
//! Wiring sequence:
//! 1. Load config.toml + validate (ESCROW_OPERATOR_ID appends an operator)
//! 2. Init tracing (JSON structured logging)
//! 3. Open the repository (file-backed, or in-memory dry run)
//! 4. Restore ledger + registry, verify custody covers in-progress deals
//! 5. Build session router, dispatcher and actor-sharded worker lanes
//! 6. Spawn health/metrics server, pending-input sweeper, repository probe
//! 7. Pump console events into the lanes
//! 8. Wait for SIGINT, fatal error, or end of input → graceful shutdown

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::BufReader;
use tokio::signal;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

use escrow_desk::adapters::metrics::{HealthServer, HealthState, MetricsRegistry};
use escrow_desk::adapters::persistence::{FileRepository, InMemoryRepository};
use escrow_desk::adapters::transport::{read_events, ConsoleNotifier};
use escrow_desk::config::{self, AppConfig};
use escrow_desk::domain::{ActorId, DealIdSequence};
use escrow_desk::ports::repository::EscrowRepository;
use escrow_desk::ports::telemetry::{NoopTelemetry, Telemetry};
use escrow_desk::usecases::{
  restore_desk, Dispatcher, DispatcherSettings, SessionRouter, WorkerLanes,
};

/// Inbound queue depth between the console reader and the lanes.
const INBOUND_CAPACITY: usize = 1024;
/// Per-lane queue depth.
const LANE_CAPACITY: usize = 256;
/// Interval between repository health probes.
const PROBE_INTERVAL: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() -> Result<()> {
  // ── 1. Load configuration from config.toml ──────────────
  let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.toml".to_string());
  let config = config::loader::load_config(&config_path).context("Failed to load configuration")?;

  // ── 2. Initialize structured JSON logging ───────────────
  tracing_subscriber::fmt()
    .with_env_filter(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.service.log_level)),
    )
    .json()
    .with_writer(std::io::stderr)
    .init();

  info!(
    name = %config.service.name,
    version = env!("CARGO_PKG_VERSION"),
    in_memory = config.persistence.in_memory,
    operators = config.operators.ids.len(),
    "Starting escrow desk"
  );

  // ── 3. Open repository ──────────────────────────────────
  let seed = DealIdSequence::parse_seed(&config.deals.id_seed)
    .context("deals.id_seed is not a valid deal id")?;

  if config.persistence.in_memory {
    warn!("In-memory mode: nothing survives a restart");
    run(config, Arc::new(InMemoryRepository::new()), seed).await
  } else {
    let repo = FileRepository::open(&config.persistence.data_dir, seed)
      .await
      .with_context(|| format!("Failed to open data dir {}", config.persistence.data_dir))?;
    run(config, Arc::new(repo), seed).await
  }
}

/// Wire every component over `repo` and run until shutdown.
async fn run<R: EscrowRepository>(config: AppConfig, repo: Arc<R>, seed: DealIdSequence) -> Result<()> {
  // ── 4. Restore ledger + registry ────────────────────────
  let operators: HashSet<ActorId> = config
    .operators
    .ids
    .iter()
    .map(|id| ActorId::new(id.trim()))
    .collect();
  let desk = restore_desk(
    Arc::clone(&repo),
    ActorId::new(config.ledger.custody_account.trim()),
    seed,
    operators,
  )
  .await?;

  // ── 5. Router, dispatcher, lanes ────────────────────────
  let ttl_secs = i64::try_from(config.session.pending_ttl_secs).context("pending_ttl_secs too large")?;
  let router = Arc::new(SessionRouter::new(
    Arc::clone(&desk.registry),
    chrono::Duration::seconds(ttl_secs),
  ));

  let metrics = if config.metrics.enabled {
    Some(Arc::new(MetricsRegistry::new().context("Failed to register metrics")?))
  } else {
    None
  };
  let telemetry: Arc<dyn Telemetry> = match &metrics {
    Some(metrics) => Arc::clone(metrics) as Arc<dyn Telemetry>,
    None => Arc::new(NoopTelemetry),
  };
  telemetry.custody_balance(desk.ledger.balance(desk.ledger.custody()).await);

  let dispatcher = Arc::new(Dispatcher::new(
    Arc::clone(&desk.registry),
    Arc::clone(&router),
    Arc::new(ConsoleNotifier::stdout()),
    telemetry,
    DispatcherSettings {
      currency: config.ledger.currency.clone(),
      max_events_per_minute: config.rate_limits.max_events_per_minute,
    },
  ));

  let (shutdown_tx, _shutdown_rx) = broadcast::channel::<()>(1);
  let (fatal_tx, mut fatal_rx) = mpsc::channel::<anyhow::Error>(1);
  let lanes = Arc::new(WorkerLanes::spawn(
    Arc::clone(&dispatcher),
    config.session.workers,
    LANE_CAPACITY,
    fatal_tx,
    &shutdown_tx,
  ));

  // ── 6. Health server, sweeper, repository probe ─────────
  let health = Arc::new(HealthState::new());
  let health_server = HealthServer::new(Arc::clone(&health), metrics, config.metrics.health_port);
  let health_handle = tokio::spawn({
    let shutdown_rx = shutdown_tx.subscribe();
    async move {
      if let Err(e) = health_server.run(shutdown_rx).await {
        error!(error = %e, "Health server failed");
      }
    }
  });

  let sweep_every = Duration::from_secs(config.session.sweep_interval_secs);
  let sweeper_handle = tokio::spawn({
    let dispatcher = Arc::clone(&dispatcher);
    let mut shutdown_rx = shutdown_tx.subscribe();
    async move {
      let mut ticker = tokio::time::interval(sweep_every);
      loop {
        tokio::select! {
          biased;
          _ = shutdown_rx.recv() => break,
          _ = ticker.tick() => {
            dispatcher.housekeeping().await;
          }
        }
      }
    }
  });

  let probe_handle = tokio::spawn({
    let repo = Arc::clone(&repo);
    let health = Arc::clone(&health);
    let mut shutdown_rx = shutdown_tx.subscribe();
    async move {
      let mut ticker = tokio::time::interval(PROBE_INTERVAL);
      loop {
        tokio::select! {
          biased;
          _ = shutdown_rx.recv() => break,
          _ = ticker.tick() => {
            let healthy = repo.is_healthy().await;
            if !healthy {
              warn!("Repository health probe failed");
            }
            health.repository_healthy.store(healthy, Ordering::Relaxed);
          }
        }
      }
    }
  });

  // ── 7. Console input → lanes ────────────────────────────
  let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
  let mut reader_handle = tokio::spawn(read_events(
    BufReader::new(tokio::io::stdin()),
    inbound_tx,
    shutdown_tx.subscribe(),
  ));
  let mut forward_handle = tokio::spawn({
    let lanes = Arc::clone(&lanes);
    let shutdown_rx = shutdown_tx.subscribe();
    async move { lanes.forward(inbound_rx, shutdown_rx).await }
  });

  info!(workers = lanes.lane_count(), "Escrow desk is running");

  // ── 8. Wait for SIGINT, fatal error, or end of input ────
  let mut outcome = Ok(());
  let mut drain = false;
  tokio::select! {
    _ = signal::ctrl_c() => {
      info!("SIGINT received, initiating graceful shutdown");
    }
    Some(fatal) = fatal_rx.recv() => {
      error!(error = format!("{fatal:#}"), "Fatal error, shutting down");
      outcome = Err(fatal);
    }
    read = &mut reader_handle => {
      match read {
        Ok(Ok(forwarded)) => info!(forwarded, "Input exhausted, draining lanes"),
        Ok(Err(e)) => warn!(error = %e, "Console reader failed"),
        Err(e) => warn!(error = %e, "Console reader panicked"),
      }
      drain = true;
    }
  }

  // ── Graceful shutdown ───────────────────────────────────
  health.accepting.store(false, Ordering::Relaxed);

  if drain {
    // Queued events finish before the lanes are told to stop.
    let _ = tokio::time::timeout(Duration::from_secs(10), &mut forward_handle).await;
    if let Ok(lanes) = Arc::try_unwrap(lanes) {
      let _ = tokio::time::timeout(Duration::from_secs(30), lanes.join()).await;
    }
    let _ = shutdown_tx.send(());
  } else {
    let _ = shutdown_tx.send(());
    let _ = tokio::time::timeout(Duration::from_secs(5), &mut forward_handle).await;
    if let Ok(lanes) = Arc::try_unwrap(lanes) {
      let _ = tokio::time::timeout(Duration::from_secs(30), lanes.join()).await;
    }
  }
  info!("Shutdown signal broadcast to all tasks");

  if outcome.is_ok() {
    if let Ok(fatal) = fatal_rx.try_recv() {
      outcome = Err(fatal);
    }
  }

  forward_handle.abort();
  reader_handle.abort();
  sweeper_handle.abort();
  probe_handle.abort();
  let _ = tokio::time::timeout(Duration::from_secs(5), health_handle).await;

  info!("Shutdown complete");
  outcome
}
