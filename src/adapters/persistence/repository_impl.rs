//! File Repository - Concrete Adapter for the Repository Port
//!
//! Wraps `StateStore` (atomic JSON snapshots) and `JournalLogger` (JSONL
//! append-only audit) into a single struct that implements the
//! `EscrowRepository` trait from `crate::ports::repository`.
//!
//! Commits are serialized: the in-memory mirror of the last durable
//! snapshot is locked, the changeset is applied to a copy, the copy is
//! written atomically, and only then does the mirror advance.

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{instrument, warn};

use super::journal::JournalLogger;
use super::state::StateStore;
use crate::domain::DealIdSequence;
use crate::ports::repository::{Changeset, EscrowRepository, EscrowSnapshot, JournalEntry};

/// Durable repository combining snapshot and journal persistence.
pub struct FileRepository {
    /// Atomic JSON state store.
    state_store: StateStore,
    /// JSONL audit journal.
    journal: JournalLogger,
    /// Last snapshot known to be on disk, `None` before the first commit.
    mirror: Mutex<Option<EscrowSnapshot>>,
    /// Id sequence for a store that has never been written.
    seed: DealIdSequence,
}

impl FileRepository {
    /// Open (or initialise) a repository in `data_dir`.
    ///
    /// `seed` is the id sequence used when no snapshot exists yet.
    pub async fn open(data_dir: impl AsRef<Path>, seed: DealIdSequence) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        let state_store = StateStore::new(data_dir).await?;
        let journal = JournalLogger::new(data_dir).await?;

        let loaded = state_store.load().await?;

        Ok(Self {
            state_store,
            journal,
            mirror: Mutex::new(loaded),
            seed,
        })
    }
}

#[async_trait]
impl EscrowRepository for FileRepository {
    async fn load(&self) -> Result<Option<EscrowSnapshot>> {
        Ok(self.mirror.lock().await.clone())
    }

    #[instrument(skip_all, fields(accounts = changes.accounts.len(), deals = changes.deals.len()))]
    async fn commit(&self, changes: &Changeset) -> Result<()> {
        let mut mirror = self.mirror.lock().await;
        let mut next = mirror
            .clone()
            .unwrap_or_else(|| EscrowSnapshot::empty(self.seed));
        next.apply(changes);

        self.state_store.save(&next).await?;
        *mirror = Some(next);
        drop(mirror);

        if let Err(e) = self.journal.append(&changes.journal).await {
            warn!(error = %e, "Journal append failed; snapshot already committed");
        }
        Ok(())
    }

    async fn load_journal(&self) -> Result<Vec<JournalEntry>> {
        self.journal.load_all().await
    }

    async fn is_healthy(&self) -> bool {
        self.state_store.is_healthy().await && self.journal.is_healthy().await
    }
}
