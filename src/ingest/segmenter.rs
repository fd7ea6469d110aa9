//! Debounced chunk segmenter.
//!
//! Consumes a monotonically growing finalized transcript and commits a
//! chunk once a quiet window elapses with no new finalized text. A new
//! update re-arms the debounce deadline, so only the latest pending commit
//! fires. Interim (uncommitted) text is accepted but never persisted.
//!
//! The segmenter runs as a spawned task owning all of its state; commits
//! are serialized by construction, which is the per-transcript reentrancy
//! guard. `flush()` and `stop()` commit any pending tail before acking.

use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::domain::Chunk;

use super::diff::next_chunk;

/// Segmenter tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmenterConfig {
    /// Quiet window after the last new finalized text before committing
    pub debounce_secs: u64,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self { debounce_secs: 2 }
    }
}

impl SegmenterConfig {
    fn debounce(&self) -> Duration {
        Duration::from_secs(self.debounce_secs)
    }
}

enum Command {
    Update { final_text: String },
    Flush { ack: oneshot::Sender<()> },
    Stop { ack: oneshot::Sender<()> },
}

/// Handle for feeding and controlling a running segmenter task.
pub struct SegmenterHandle {
    cmd_tx: mpsc::Sender<Command>,
    task: tokio::task::JoinHandle<()>,
}

impl SegmenterHandle {
    /// Feed the current (finalText, interimText) pair from the source.
    ///
    /// Interim text is display-only and intentionally discarded here.
    pub async fn push(&self, final_text: &str, _interim_text: &str) {
        let _ = self
            .cmd_tx
            .send(Command::Update {
                final_text: final_text.to_string(),
            })
            .await;
    }

    /// Commit any pending un-timed-out content immediately
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.cmd_tx.send(Command::Flush { ack }).await.is_ok() {
            let _ = done.await;
        }
    }

    /// Flush pending content and shut the segmenter down
    pub async fn stop(self) {
        let (ack, done) = oneshot::channel();
        if self.cmd_tx.send(Command::Stop { ack }).await.is_ok() {
            let _ = done.await;
        }
        if let Err(e) = self.task.await {
            warn!("segmenter task join failed: {}", e);
        }
    }
}

/// Debounced chunk segmenter.
pub struct Segmenter;

impl Segmenter {
    /// Spawn a segmenter task. Committed chunks arrive on the returned
    /// receiver in commit order.
    pub fn spawn(config: SegmenterConfig) -> (SegmenterHandle, mpsc::Receiver<Chunk>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (chunk_tx, chunk_rx) = mpsc::channel(32);

        let task = tokio::spawn(run_segmenter(config, cmd_rx, chunk_tx));

        (SegmenterHandle { cmd_tx, task }, chunk_rx)
    }
}

struct SegmenterState {
    /// Full finalized text at the last commit
    committed: String,
    /// Latest finalized text from the source
    current: String,
    /// Text of the last emitted chunk (adjacent-duplicate suppression)
    last_emitted: String,
    /// Monotonic chunk id floor
    last_id: i64,
}

impl SegmenterState {
    fn new() -> Self {
        Self {
            committed: String::new(),
            current: String::new(),
            last_emitted: String::new(),
            last_id: 0,
        }
    }

    /// Commit whatever is pending. Returns the chunk to emit, if any.
    /// Never fails; worst case the fallback over-commits the full text.
    fn commit_pending(&mut self) -> Option<Chunk> {
        let text = next_chunk(&self.committed, &self.current)?;
        self.committed = self.current.trim().to_string();

        // Adjacent chunks must not repeat the same text
        if text == self.last_emitted {
            debug!("suppressing adjacent duplicate chunk");
            return None;
        }

        let id = Utc::now().timestamp_millis().max(self.last_id + 1);
        self.last_id = id;
        self.last_emitted = text.clone();
        Some(Chunk::new(id, text))
    }
}

async fn run_segmenter(
    config: SegmenterConfig,
    mut cmd_rx: mpsc::Receiver<Command>,
    chunk_tx: mpsc::Sender<Chunk>,
) {
    let mut state = SegmenterState::new();
    let mut deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(Command::Update { final_text }) => {
                        let trimmed = final_text.trim();
                        if trimmed != state.current {
                            state.current = trimmed.to_string();
                            deadline = if trimmed == state.committed {
                                None
                            } else {
                                Some(Instant::now() + config.debounce())
                            };
                        }
                    }
                    Some(Command::Flush { ack }) => {
                        deadline = None;
                        if let Some(chunk) = state.commit_pending() {
                            if chunk_tx.send(chunk).await.is_err() {
                                break;
                            }
                        }
                        let _ = ack.send(());
                    }
                    Some(Command::Stop { ack }) => {
                        if let Some(chunk) = state.commit_pending() {
                            let _ = chunk_tx.send(chunk).await;
                        }
                        let _ = ack.send(());
                        break;
                    }
                    None => {
                        // Handle dropped: flush the tail and shut down
                        if let Some(chunk) = state.commit_pending() {
                            let _ = chunk_tx.send(chunk).await;
                        }
                        break;
                    }
                }
            }
            _ = sleep_until_opt(deadline), if deadline.is_some() => {
                deadline = None;
                if let Some(chunk) = state.commit_pending() {
                    debug!(chunk_id = chunk.id, len = chunk.text.len(), "chunk committed");
                    if chunk_tx.send(chunk).await.is_err() {
                        break;
                    }
                }
            }
        }
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_pending_monotonic_ids() {
        let mut state = SegmenterState::new();
        state.current = "one".to_string();
        let c1 = state.commit_pending().unwrap();

        state.current = "one two".to_string();
        let c2 = state.commit_pending().unwrap();

        assert!(c2.id > c1.id);
        assert_eq!(c2.text, "two");
    }

    #[test]
    fn test_commit_pending_suppresses_adjacent_duplicate() {
        let mut state = SegmenterState::new();
        state.current = "hello".to_string();
        assert!(state.commit_pending().is_some());

        // Recognizer restart replays the same text as brand-new content
        state.committed.clear();
        state.current = "hello".to_string();
        assert!(state.commit_pending().is_none());
    }

    #[test]
    fn test_commit_pending_empty_yields_none() {
        let mut state = SegmenterState::new();
        assert!(state.commit_pending().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_rearms_on_new_text() {
        let (handle, mut chunks) = Segmenter::spawn(SegmenterConfig { debounce_secs: 2 });

        handle.push("Hello", "").await;
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_secs(1)).await;
        // New finalized text before the window elapses: timer re-arms
        handle.push("Hello world", "").await;
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_millis(1500)).await;
        assert!(chunks.try_recv().is_err());

        tokio::time::advance(Duration::from_millis(600)).await;
        let chunk = chunks.recv().await.unwrap();
        assert_eq!(chunk.text, "Hello world");

        handle.stop().await;
    }
}
