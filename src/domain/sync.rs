//! Sync queue and reconciliation lifecycle types.
//!
//! Queue operations are a closed tagged union so dispatch is exhaustive at
//! compile time. Each entry moves through an explicit state machine:
//! Pending → InFlight → {Synced | Pending (retry) | Dropped}.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::lecture::Lecture;
use super::transcript::Transcript;

/// A pending remote operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncOp {
    /// Create a lecture that was authored offline
    LectureCreate { lecture: Lecture },

    /// Merge-write a transcript keyed by lecture id
    TranscriptionUpdate {
        lecture_id: String,
        transcript: Transcript,
    },
}

impl SyncOp {
    /// The entity key this operation targets
    pub fn entity_key(&self) -> &str {
        match self {
            SyncOp::LectureCreate { lecture } => &lecture.id,
            SyncOp::TranscriptionUpdate { lecture_id, .. } => lecture_id,
        }
    }
}

/// Lifecycle state of a queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueState {
    /// Waiting for replay
    Pending,

    /// Replay in progress
    InFlight,

    /// Replayed successfully (entry is deleted)
    Synced,

    /// Retry cap exceeded (entry is deleted and logged)
    Dropped,
}

impl Default for QueueState {
    fn default() -> Self {
        Self::Pending
    }
}

/// A durable sync queue entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Auto-incrementing local sequence number
    pub id: i64,

    /// The operation to replay
    pub op: SyncOp,

    /// When the entry was enqueued
    pub timestamp: DateTime<Utc>,

    /// Failed replay attempts so far
    pub retries: u32,

    /// Current lifecycle state
    #[serde(default)]
    pub state: QueueState,
}

/// Counts reported at the end of a reconciliation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Entities replayed successfully
    pub synced: usize,

    /// Entities that failed this run
    pub errors: usize,

    /// Entities examined (lectures + transcriptions + queue entries)
    pub total: usize,
}

/// Lifecycle events emitted to registered sync listeners.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// A reconciliation run started
    Started,

    /// A reconciliation run finished
    Completed(SyncReport),

    /// A reconciliation run aborted with an error
    Error(String),

    /// A queue entry exceeded the retry cap and was dropped.
    /// The underlying records remain in the local store, unsynced, and are
    /// picked up again by later runs.
    RetryExhausted { entry_id: i64, entity_key: String },
}
