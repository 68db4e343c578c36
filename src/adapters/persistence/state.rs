//! State Store - Atomic JSON Escrow Snapshots
//!
//! Saves the full escrow state to `state.json` using atomic writes
//! (write tmp file, fsync, rename, fsync directory). The file on disk is
//! always either the previous or the new snapshot, never a partial write.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument};

use crate::ports::repository::EscrowSnapshot;

/// Atomic JSON snapshot file.
pub struct StateStore {
    /// Directory holding the snapshot; synced after each rename.
    data_dir: PathBuf,
    /// Path to state.json.
    state_path: PathBuf,
    /// Temporary path for atomic writes.
    tmp_path: PathBuf,
}

impl StateStore {
    /// Create a new state store in the given data directory.
    ///
    /// Creates the directory if it doesn't exist.
    pub async fn new(data_dir: &Path) -> Result<Self> {
        fs::create_dir_all(data_dir)
            .await
            .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;

        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            state_path: data_dir.join("state.json"),
            tmp_path: data_dir.join("state.json.tmp"),
        })
    }

    /// Save a snapshot atomically (tmp → fsync → rename → fsync dir).
    ///
    /// Returns only once the new directory entry is durable.
    #[instrument(skip_all, fields(accounts = state.accounts.len(), deals = state.deals.len()))]
    pub async fn save(&self, state: &EscrowSnapshot) -> Result<()> {
        let json = serde_json::to_vec_pretty(state).context("Failed to serialize state")?;

        let mut file = fs::File::create(&self.tmp_path)
            .await
            .context("Failed to create tmp state file")?;
        file.write_all(&json)
            .await
            .context("Failed to write tmp state file")?;
        file.sync_all()
            .await
            .context("Failed to fsync tmp state file")?;
        drop(file);

        fs::rename(&self.tmp_path, &self.state_path)
            .await
            .context("Failed to rename state file")?;
        self.sync_dir().await?;

        debug!(path = %self.state_path.display(), "State snapshot saved");
        Ok(())
    }

    /// Flush the rename itself to disk.
    #[cfg(unix)]
    async fn sync_dir(&self) -> Result<()> {
        let dir = fs::File::open(&self.data_dir)
            .await
            .with_context(|| format!("Failed to open data directory {}", self.data_dir.display()))?;
        dir.sync_all()
            .await
            .context("Failed to fsync data directory")
    }

    #[cfg(not(unix))]
    async fn sync_dir(&self) -> Result<()> {
        Ok(())
    }

    /// Load the most recent snapshot.
    ///
    /// Returns `None` only if no state file exists (first startup). A
    /// path that cannot be inspected is an error, not a fresh start.
    #[instrument(skip(self))]
    pub async fn load(&self) -> Result<Option<EscrowSnapshot>> {
        let exists = fs::try_exists(&self.state_path)
            .await
            .with_context(|| format!("Failed to stat state file {}", self.state_path.display()))?;
        if !exists {
            info!("No state file found, starting fresh");
            return Ok(None);
        }

        let json = fs::read_to_string(&self.state_path)
            .await
            .context("Failed to read state file")?;

        let state: EscrowSnapshot =
            serde_json::from_str(&json).context("Failed to parse state JSON")?;

        info!(
            version = %state.version,
            accounts = state.accounts.len(),
            deals = state.deals.len(),
            next_deal_id = %state.sequence.peek(),
            "State snapshot loaded"
        );

        Ok(Some(state))
    }

    /// Check if the data directory is writable.
    pub async fn is_healthy(&self) -> bool {
        let probe = self.tmp_path.with_extension("health");
        let result = fs::write(&probe, b"ok").await;
        let _ = fs::remove_file(&probe).await;
        result.is_ok()
    }
}
