//! Journal Logger - Append-only JSONL Audit Trail
//!
//! Persists ledger and deal events to daily JSONL files in the format
//! `journal/YYYY-MM-DD.jsonl`. Each line is a self-contained JSON record.
//! The snapshot is authoritative; the journal exists for audit.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{info, instrument, warn};

use crate::ports::repository::JournalEntry;

/// Append-only JSONL journal with daily file rotation.
pub struct JournalLogger {
    /// Directory holding the daily files.
    journal_dir: PathBuf,
}

impl JournalLogger {
    /// Create a new journal logger in the given data directory.
    pub async fn new(data_dir: &Path) -> Result<Self> {
        let journal_dir = data_dir.join("journal");
        fs::create_dir_all(&journal_dir)
            .await
            .context("Failed to create journal directory")?;

        Ok(Self { journal_dir })
    }

    /// Append entries to today's JSONL file in one write.
    #[instrument(skip_all, fields(entries = entries.len()))]
    pub async fn append(&self, entries: &[JournalEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let date = Utc::now().format("%Y-%m-%d").to_string();
        let path = self.journal_dir.join(format!("{date}.jsonl"));

        let mut buffer = String::new();
        for entry in entries {
            buffer.push_str(
                &serde_json::to_string(entry).context("Failed to serialize journal entry")?,
            );
            buffer.push('\n');
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .context("Failed to open journal file")?;

        file.write_all(buffer.as_bytes())
            .await
            .context("Failed to write journal entries")?;

        file.flush().await.context("Failed to flush journal")?;

        Ok(())
    }

    /// Load every journal entry, oldest first.
    #[instrument(skip(self))]
    pub async fn load_all(&self) -> Result<Vec<JournalEntry>> {
        let mut entries = Vec::new();
        let mut dir = fs::read_dir(&self.journal_dir).await?;

        while let Some(file) = dir.next_entry().await? {
            let path = file.path();
            if path.extension().is_some_and(|ext| ext == "jsonl") {
                let content = fs::read_to_string(&path).await?;
                for line in content.lines() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<JournalEntry>(line) {
                        Ok(entry) => entries.push(entry),
                        Err(e) => {
                            warn!(
                                file = %path.display(),
                                error = %e,
                                "Skipping malformed journal line"
                            );
                        }
                    }
                }
            }
        }

        entries.sort_by_key(|e| e.timestamp);
        info!(count = entries.len(), "Loaded journal entries");
        Ok(entries)
    }

    /// Check if the journal directory is writable.
    pub async fn is_healthy(&self) -> bool {
        let test_path = self.journal_dir.join(".health_check");
        let result = fs::write(&test_path, b"ok").await;
        let _ = fs::remove_file(&test_path).await;
        result.is_ok()
    }
}
