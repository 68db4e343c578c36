//! In-Memory Repository - Volatile Escrow Storage
//!
//! Implements the `EscrowRepository` port without touching disk. Used by
//! tests and by `persistence.in_memory = true` dry runs. Commits can be
//! made to fail on demand to exercise the fatal persistence path.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::DealIdSequence;
use crate::ports::repository::{Changeset, EscrowRepository, EscrowSnapshot, JournalEntry};

/// Volatile repository holding one snapshot and the journal in memory.
pub struct InMemoryRepository {
    state: Mutex<Option<EscrowSnapshot>>,
    journal: Mutex<Vec<JournalEntry>>,
    commits: AtomicUsize,
    failing: AtomicBool,
}

impl InMemoryRepository {
    /// Empty repository; `load` returns `None` until the first commit.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(None),
            journal: Mutex::new(Vec::new()),
            commits: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        }
    }

    /// Repository pre-seeded with an existing snapshot.
    pub fn with_snapshot(snapshot: EscrowSnapshot) -> Self {
        Self {
            state: Mutex::new(Some(snapshot)),
            ..Self::new()
        }
    }

    /// Make every following commit fail (or succeed again).
    pub fn fail_commits(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of successful commits so far.
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Copy of the committed state (empty state if nothing was committed).
    pub async fn snapshot(&self) -> EscrowSnapshot {
        self.state
            .lock()
            .await
            .clone()
            .unwrap_or_else(|| EscrowSnapshot::empty(DealIdSequence::default()))
    }

    /// Copy of the journal.
    pub async fn journal(&self) -> Vec<JournalEntry> {
        self.journal.lock().await.clone()
    }
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EscrowRepository for InMemoryRepository {
    async fn load(&self) -> Result<Option<EscrowSnapshot>> {
        Ok(self.state.lock().await.clone())
    }

    async fn commit(&self, changes: &Changeset) -> Result<()> {
        anyhow::ensure!(
            !self.failing.load(Ordering::SeqCst),
            "in-memory repository configured to fail"
        );

        {
            let mut state = self.state.lock().await;
            state
                .get_or_insert_with(|| EscrowSnapshot::empty(DealIdSequence::default()))
                .apply(changes);
        }
        self.journal
            .lock()
            .await
            .extend(changes.journal.iter().cloned());
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn load_journal(&self) -> Result<Vec<JournalEntry>> {
        Ok(self.journal().await)
    }

    async fn is_healthy(&self) -> bool {
        !self.failing.load(Ordering::SeqCst)
    }
}
