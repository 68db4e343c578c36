//! Console Transport - JSON Lines over stdin/stdout
//!
//! Stands in for the chat platform. Each stdin line is one
//! `InboundEvent`; each notification is written as one JSON line
//! `{"to": "...", "message": "..."}`. Malformed lines are logged and
//! skipped.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, info, instrument, warn};

use crate::domain::ActorId;
use crate::ports::transport::{InboundEvent, Notifier};

#[derive(Serialize)]
struct OutboundLine<'a> {
    to: &'a ActorId,
    message: &'a str,
}

/// Read events line by line until EOF, shutdown, or the receiver is gone.
///
/// Returns the number of events forwarded.
#[instrument(skip_all)]
pub async fn read_events<I>(
    input: I,
    events: mpsc::Sender<InboundEvent>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<usize>
where
    I: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut forwarded = 0usize;

    loop {
        let line = tokio::select! {
            biased;
            _ = shutdown_rx.recv() => {
                debug!("Console reader received shutdown signal");
                break;
            }
            line = lines.next_line() => line.context("Failed to read inbound line")?,
        };

        let Some(line) = line else {
            info!(forwarded, "Console input closed");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<InboundEvent>(&line) {
            Ok(event) => {
                if events.send(event).await.is_err() {
                    debug!("Event receiver dropped, stopping console reader");
                    break;
                }
                forwarded += 1;
            }
            Err(e) => warn!(error = %e, "Skipping malformed inbound line"),
        }
    }

    Ok(forwarded)
}

/// Notifier writing JSON lines to any async writer (stdout in production).
pub struct ConsoleNotifier<W> {
    out: Mutex<W>,
}

impl ConsoleNotifier<tokio::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

impl<W> ConsoleNotifier<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    /// Give back the underlying writer.
    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

#[async_trait]
impl<W> Notifier for ConsoleNotifier<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn notify(&self, actor: &ActorId, message: &str) -> Result<()> {
        let mut line = serde_json::to_vec(&OutboundLine { to: actor, message })?;
        line.push(b'\n');

        let mut out = self.out.lock().await;
        out.write_all(&line)
            .await
            .context("Failed to write notification")?;
        out.flush().await.context("Failed to flush notification")?;
        Ok(())
    }
}
