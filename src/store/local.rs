//! SQLite-backed durable store for offline records and the sync queue.
//!
//! Three record families: `transcriptions` (keyed by lecture id),
//! `lectures` (keyed by id), and `sync_queue` (auto-incrementing ids).
//! Every public call runs as a single transaction and survives process
//! restart. Records are kept after sync (`synced = 1`, `synced_at` set)
//! and only removed by `purge_synced` once the retention window passes.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::domain::{Lecture, QueueEntry, QueueState, SyncOp, Transcript};

/// Errors from the local store.
///
/// `Unavailable` means the write (or read) was lost; callers must surface
/// it, never swallow it.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(#[from] rusqlite::Error),

    #[error("storage unavailable: connection lock poisoned")]
    Poisoned,

    #[error("corrupt record in {family}: {source}")]
    Corrupt {
        family: &'static str,
        source: serde_json::Error,
    },
}

/// Per-family counts used by the connectivity gate and the CLI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub transcriptions_total: usize,
    pub transcriptions_unsynced: usize,
    pub lectures_total: usize,
    pub lectures_unsynced: usize,
    pub queue_depth: usize,
}

impl StoreStats {
    /// Entities waiting for reconciliation
    pub fn pending(&self) -> usize {
        self.transcriptions_unsynced + self.lectures_unsynced + self.queue_depth
    }
}

/// Durable local store.
pub struct LocalStore {
    conn: Mutex<Connection>,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS transcriptions (
    lecture_id  TEXT PRIMARY KEY,
    payload     TEXT NOT NULL,
    timestamp   INTEGER NOT NULL,
    synced      INTEGER NOT NULL DEFAULT 0,
    synced_at   INTEGER
);
CREATE TABLE IF NOT EXISTS lectures (
    id          TEXT PRIMARY KEY,
    payload     TEXT NOT NULL,
    timestamp   INTEGER NOT NULL,
    synced      INTEGER NOT NULL DEFAULT 0,
    synced_at   INTEGER
);
CREATE TABLE IF NOT EXISTS sync_queue (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    op          TEXT NOT NULL,
    timestamp   INTEGER NOT NULL,
    retries     INTEGER NOT NULL DEFAULT 0,
    state       TEXT NOT NULL DEFAULT 'pending'
);
";

impl LocalStore {
    /// Open (or create) the store at the given path.
    ///
    /// Queue entries left in flight by a previous process are reset to
    /// pending.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if std::fs::create_dir_all(parent).is_err() {
                warn!("failed to create store directory {}", parent.display());
            }
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Open an in-memory store (tests, throwaway sessions)
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        let reset = conn.execute(
            "UPDATE sync_queue SET state = 'pending' WHERE state = 'in_flight'",
            [],
        )?;
        if reset > 0 {
            info!(reset, "reset in-flight queue entries to pending");
        }
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Close the store, releasing the underlying connection
    pub fn close(self) -> Result<(), StoreError> {
        let conn = self.conn.into_inner().map_err(|_| StoreError::Poisoned)?;
        conn.close().map_err(|(_, e)| StoreError::Unavailable(e))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    // ------------------------------------------------------------------
    // Transcriptions
    // ------------------------------------------------------------------

    /// Store a transcript offline, merging with any existing record.
    ///
    /// Scalar fields are last-write-wins; the chunk list accumulates
    /// (deduplicated by chunk id). The record is marked unsynced.
    pub fn put_transcription(&self, transcript: &Transcript) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let existing: Option<String> = tx
            .query_row(
                "SELECT payload FROM transcriptions WHERE lecture_id = ?1",
                params![transcript.lecture_id],
                |row| row.get(0),
            )
            .optional()?;

        let merged = match existing {
            Some(json) => {
                let mut base: Transcript =
                    serde_json::from_str(&json).map_err(|source| StoreError::Corrupt {
                        family: "transcriptions",
                        source,
                    })?;
                base.merge_from(transcript);
                base
            }
            None => transcript.clone(),
        };

        let payload = serde_json::to_string(&merged).map_err(|source| StoreError::Corrupt {
            family: "transcriptions",
            source,
        })?;
        tx.execute(
            "INSERT INTO transcriptions (lecture_id, payload, timestamp, synced, synced_at)
             VALUES (?1, ?2, ?3, 0, NULL)
             ON CONFLICT(lecture_id) DO UPDATE
             SET payload = ?2, timestamp = ?3, synced = 0, synced_at = NULL",
            params![
                transcript.lecture_id,
                payload,
                Utc::now().timestamp_millis()
            ],
        )?;
        tx.commit()?;

        debug!(lecture_id = %transcript.lecture_id, "transcription stored offline");
        Ok(())
    }

    /// Fetch the offline transcript for a lecture, if any
    pub fn get_transcription(&self, lecture_id: &str) -> Result<Option<Transcript>, StoreError> {
        let conn = self.lock()?;
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload FROM transcriptions WHERE lecture_id = ?1",
                params![lecture_id],
                |row| row.get(0),
            )
            .optional()?;

        payload
            .map(|json| {
                serde_json::from_str(&json).map_err(|source| StoreError::Corrupt {
                    family: "transcriptions",
                    source,
                })
            })
            .transpose()
    }

    /// All transcriptions not yet reconciled, oldest first
    pub fn unsynced_transcriptions(&self) -> Result<Vec<Transcript>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT payload FROM transcriptions WHERE synced = 0 ORDER BY timestamp ASC",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut out = Vec::new();
        for row in rows {
            let json = row?;
            out.push(
                serde_json::from_str(&json).map_err(|source| StoreError::Corrupt {
                    family: "transcriptions",
                    source,
                })?,
            );
        }
        Ok(out)
    }

    /// Flag a transcription as reconciled (kept until retention GC)
    pub fn mark_transcription_synced(&self, lecture_id: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE transcriptions SET synced = 1, synced_at = ?2 WHERE lecture_id = ?1",
            params![lecture_id, Utc::now().timestamp_millis()],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Lectures
    // ------------------------------------------------------------------

    /// Store a lecture offline (last write wins), marked unsynced
    pub fn put_lecture(&self, lecture: &Lecture) -> Result<(), StoreError> {
        let payload = serde_json::to_string(lecture).map_err(|source| StoreError::Corrupt {
            family: "lectures",
            source,
        })?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO lectures (id, payload, timestamp, synced, synced_at)
             VALUES (?1, ?2, ?3, 0, NULL)
             ON CONFLICT(id) DO UPDATE
             SET payload = ?2, timestamp = ?3, synced = 0, synced_at = NULL",
            params![lecture.id, payload, Utc::now().timestamp_millis()],
        )?;
        debug!(lecture_id = %lecture.id, "lecture stored offline");
        Ok(())
    }

    /// Fetch an offline lecture by id
    pub fn get_lecture(&self, id: &str) -> Result<Option<Lecture>, StoreError> {
        let conn = self.lock()?;
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload FROM lectures WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;

        payload
            .map(|json| {
                serde_json::from_str(&json).map_err(|source| StoreError::Corrupt {
                    family: "lectures",
                    source,
                })
            })
            .transpose()
    }

    /// All lectures not yet reconciled, oldest first
    pub fn unsynced_lectures(&self) -> Result<Vec<Lecture>, StoreError> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT payload FROM lectures WHERE synced = 0 ORDER BY timestamp ASC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut out = Vec::new();
        for row in rows {
            let json = row?;
            out.push(
                serde_json::from_str(&json).map_err(|source| StoreError::Corrupt {
                    family: "lectures",
                    source,
                })?,
            );
        }
        Ok(out)
    }

    /// Flag a lecture as reconciled
    pub fn mark_lecture_synced(&self, id: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE lectures SET synced = 1, synced_at = ?2 WHERE id = ?1",
            params![id, Utc::now().timestamp_millis()],
        )?;
        Ok(())
    }

    /// Rewrite everything keyed by an offline lecture id to the remote id:
    /// the transcription row (and its payload), and any pending queue
    /// entries that still reference the old id. Runs in one transaction.
    pub fn rekey_lecture(&self, old_id: &str, new_id: &str) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let payload: Option<String> = tx
            .query_row(
                "SELECT payload FROM transcriptions WHERE lecture_id = ?1",
                params![old_id],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(json) = payload {
            let mut transcript: Transcript =
                serde_json::from_str(&json).map_err(|source| StoreError::Corrupt {
                    family: "transcriptions",
                    source,
                })?;
            transcript.lecture_id = new_id.to_string();
            let updated =
                serde_json::to_string(&transcript).map_err(|source| StoreError::Corrupt {
                    family: "transcriptions",
                    source,
                })?;
            tx.execute(
                "UPDATE transcriptions SET lecture_id = ?2, payload = ?3 WHERE lecture_id = ?1",
                params![old_id, new_id, updated],
            )?;
        }

        let mut stmt = tx.prepare("SELECT id, op FROM sync_queue WHERE state = 'pending'")?;
        let rows: Vec<(i64, String)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<_, _>>()?;
        drop(stmt);

        for (entry_id, op_json) in rows {
            let mut op: SyncOp =
                serde_json::from_str(&op_json).map_err(|source| StoreError::Corrupt {
                    family: "sync_queue",
                    source,
                })?;
            if op.entity_key() != old_id {
                continue;
            }
            match &mut op {
                SyncOp::TranscriptionUpdate {
                    lecture_id,
                    transcript,
                } => {
                    *lecture_id = new_id.to_string();
                    transcript.lecture_id = new_id.to_string();
                }
                SyncOp::LectureCreate { lecture } => {
                    lecture.id = new_id.to_string();
                }
            }
            let updated = serde_json::to_string(&op).map_err(|source| StoreError::Corrupt {
                family: "sync_queue",
                source,
            })?;
            tx.execute(
                "UPDATE sync_queue SET op = ?2 WHERE id = ?1",
                params![entry_id, updated],
            )?;
        }

        tx.commit()?;
        info!(%old_id, %new_id, "rekeyed offline lecture");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Sync queue
    // ------------------------------------------------------------------

    /// Append an operation to the sync queue, returning its sequence number
    pub fn enqueue(&self, op: &SyncOp) -> Result<i64, StoreError> {
        let op_json = serde_json::to_string(op).map_err(|source| StoreError::Corrupt {
            family: "sync_queue",
            source,
        })?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO sync_queue (op, timestamp, retries, state) VALUES (?1, ?2, 0, 'pending')",
            params![op_json, Utc::now().timestamp_millis()],
        )?;
        let id = conn.last_insert_rowid();
        debug!(entry_id = id, entity = %op.entity_key(), "queued for sync");
        Ok(id)
    }

    /// All pending queue entries in FIFO order
    pub fn pending_entries(&self) -> Result<Vec<QueueEntry>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, op, timestamp, retries FROM sync_queue
             WHERE state = 'pending' ORDER BY id ASC",
        )?;
        let rows: Vec<(i64, String, i64, u32)> = stmt
            .query_map([], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?
            .collect::<Result<_, _>>()?;

        let mut out = Vec::new();
        for (id, op_json, ts, retries) in rows {
            let op = serde_json::from_str(&op_json).map_err(|source| StoreError::Corrupt {
                family: "sync_queue",
                source,
            })?;
            out.push(QueueEntry {
                id,
                op,
                timestamp: DateTime::from_timestamp_millis(ts).unwrap_or_else(Utc::now),
                retries,
                state: QueueState::Pending,
            });
        }
        Ok(out)
    }

    /// Fetch a single queue entry by sequence number.
    ///
    /// Used by the reconciler to re-read entries mid-run: a lecture rekey
    /// may have rewritten an entry's payload after the initial listing.
    pub fn get_entry(&self, id: i64) -> Result<Option<QueueEntry>, StoreError> {
        let conn = self.lock()?;
        let row: Option<(String, i64, u32)> = conn
            .query_row(
                "SELECT op, timestamp, retries FROM sync_queue WHERE id = ?1 AND state = 'pending'",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        row.map(|(op_json, ts, retries)| {
            let op = serde_json::from_str(&op_json).map_err(|source| StoreError::Corrupt {
                family: "sync_queue",
                source,
            })?;
            Ok(QueueEntry {
                id,
                op,
                timestamp: DateTime::from_timestamp_millis(ts).unwrap_or_else(Utc::now),
                retries,
                state: QueueState::Pending,
            })
        })
        .transpose()
    }

    /// Record a queue entry's state transition
    pub fn set_entry_state(&self, id: i64, state: QueueState) -> Result<(), StoreError> {
        let label = match state {
            QueueState::Pending => "pending",
            QueueState::InFlight => "in_flight",
            QueueState::Synced => "synced",
            QueueState::Dropped => "dropped",
        };
        let conn = self.lock()?;
        conn.execute(
            "UPDATE sync_queue SET state = ?2 WHERE id = ?1",
            params![id, label],
        )?;
        Ok(())
    }

    /// Remove a queue entry (after successful replay or drop)
    pub fn delete_entry(&self, id: i64) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM sync_queue WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// Increment an entry's retry count, returning the new value
    pub fn bump_retries(&self, id: i64) -> Result<u32, StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE sync_queue SET retries = retries + 1, state = 'pending' WHERE id = ?1",
            params![id],
        )?;
        let retries = conn.query_row(
            "SELECT retries FROM sync_queue WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        Ok(retries)
    }

    // ------------------------------------------------------------------
    // Stats & maintenance
    // ------------------------------------------------------------------

    /// Per-family counts
    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        let conn = self.lock()?;
        let count = |sql: &str| -> Result<usize, rusqlite::Error> {
            conn.query_row(sql, [], |row| row.get::<_, i64>(0))
                .map(|n| n as usize)
        };

        Ok(StoreStats {
            transcriptions_total: count("SELECT COUNT(*) FROM transcriptions")?,
            transcriptions_unsynced: count(
                "SELECT COUNT(*) FROM transcriptions WHERE synced = 0",
            )?,
            lectures_total: count("SELECT COUNT(*) FROM lectures")?,
            lectures_unsynced: count("SELECT COUNT(*) FROM lectures WHERE synced = 0")?,
            queue_depth: count("SELECT COUNT(*) FROM sync_queue WHERE state != 'synced'")?,
        })
    }

    /// Entities waiting for reconciliation (the user-visible counter)
    pub fn pending_sync_count(&self) -> Result<usize, StoreError> {
        Ok(self.stats()?.pending())
    }

    /// Delete records that synced longer than `retention` ago.
    /// Returns the number of records removed.
    pub fn purge_synced(&self, retention: Duration) -> Result<usize, StoreError> {
        let cutoff = (Utc::now() - retention).timestamp_millis();
        let conn = self.lock()?;
        let mut removed = conn.execute(
            "DELETE FROM transcriptions WHERE synced = 1 AND synced_at < ?1",
            params![cutoff],
        )?;
        removed += conn.execute(
            "DELETE FROM lectures WHERE synced = 1 AND synced_at < ?1",
            params![cutoff],
        )?;
        if removed > 0 {
            info!(removed, "purged synced records past retention");
        }
        Ok(removed)
    }
}
