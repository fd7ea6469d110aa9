//! Sync queue reconciler.
//!
//! Replays locally buffered writes against the remote store and marks them
//! synced. A run drains three record families in order: lectures first
//! (transcriptions may reference a lecture id that only becomes valid once
//! the lecture exists remotely), then transcriptions, then the generic
//! queue. `reconcile()` is non-reentrant: a call while a run is already in
//! flight is a no-op.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::adapters::RemoteStore;
use crate::domain::{Lecture, QueueState, SyncEvent, SyncOp, SyncReport, Transcript};
use crate::store::LocalStore;

type Listener = Box<dyn Fn(&SyncEvent) + Send + Sync>;

/// Snapshot of the sync engine for status displays.
#[derive(Debug, Clone, Copy)]
pub struct SyncStatus {
    /// Whether a reconciliation run is currently in flight
    pub in_progress: bool,

    /// Entities waiting for reconciliation
    pub pending: usize,
}

/// Replays offline state against the remote store.
pub struct SyncService {
    store: Arc<LocalStore>,
    remote: Arc<dyn RemoteStore>,
    listeners: Mutex<Vec<Listener>>,
    in_progress: AtomicBool,
    max_retries: u32,
}

/// Releases the in-progress flag even when a run errors out
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl SyncService {
    pub fn new(store: Arc<LocalStore>, remote: Arc<dyn RemoteStore>, max_retries: u32) -> Self {
        Self {
            store,
            remote,
            listeners: Mutex::new(Vec::new()),
            in_progress: AtomicBool::new(false),
            max_retries,
        }
    }

    /// Register a lifecycle listener. Multiple may be registered; a
    /// panicking listener is isolated and never aborts reconciliation.
    pub fn add_listener(&self, listener: impl Fn(&SyncEvent) + Send + Sync + 'static) {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.push(Box::new(listener));
        }
    }

    fn notify(&self, event: &SyncEvent) {
        let Ok(listeners) = self.listeners.lock() else {
            return;
        };
        for listener in listeners.iter() {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                warn!("sync listener panicked; continuing");
            }
        }
    }

    /// Current status: in-progress flag plus true local queue depth
    pub fn status(&self) -> Result<SyncStatus> {
        Ok(SyncStatus {
            in_progress: self.in_progress.load(Ordering::Acquire),
            pending: self.store.pending_sync_count()?,
        })
    }

    /// Replay all unsynced local state against the remote store.
    ///
    /// Returns `Ok(None)` without doing anything when a run is already in
    /// flight. On success returns the run's report; a storage failure
    /// aborts the run and is surfaced (after a `sync_error` event).
    #[instrument(skip(self))]
    pub async fn reconcile(&self) -> Result<Option<SyncReport>> {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("reconcile already in progress, skipping");
            return Ok(None);
        }
        let _guard = RunGuard(&self.in_progress);

        self.notify(&SyncEvent::Started);

        match self.run().await {
            Ok(report) => {
                info!(
                    synced = report.synced,
                    errors = report.errors,
                    total = report.total,
                    "reconciliation complete"
                );
                self.notify(&SyncEvent::Completed(report));
                Ok(Some(report))
            }
            Err(e) => {
                self.notify(&SyncEvent::Error(e.to_string()));
                Err(e)
            }
        }
    }

    async fn run(&self) -> Result<SyncReport> {
        let mut report = SyncReport::default();

        // Entities covered by a pending queue entry are replayed in the
        // queue phase only; syncing their record here as well would both
        // double the remote writes and double-count them in the report.
        // Coverage is per record family: a queued transcription update must
        // not block its lecture from syncing, and vice versa.
        let initial_entries = self
            .store
            .pending_entries()
            .context("failed to read sync queue")?;
        let mut covered_lectures = std::collections::HashSet::new();
        let mut covered_transcriptions = std::collections::HashSet::new();
        for entry in &initial_entries {
            match &entry.op {
                SyncOp::LectureCreate { lecture } => {
                    covered_lectures.insert(lecture.id.clone());
                }
                SyncOp::TranscriptionUpdate { lecture_id, .. } => {
                    covered_transcriptions.insert(lecture_id.clone());
                }
            }
        }

        // Lectures first: creating them remotely yields the ids the
        // transcription phase depends on.
        let lectures = self
            .store
            .unsynced_lectures()
            .context("failed to read unsynced lectures")?;
        let lectures: Vec<Lecture> = lectures
            .into_iter()
            .filter(|l| !covered_lectures.contains(&l.id))
            .collect();
        report.total += lectures.len();
        for lecture in lectures {
            match self.sync_lecture(&lecture).await {
                Ok(rekeyed) => {
                    self.store.mark_lecture_synced(&lecture.id)?;
                    // A rekey rewrote pending queue payloads to the remote
                    // id; the coverage set has to follow or the rekeyed
                    // transcription gets counted in both phases.
                    if let Some(new_id) = rekeyed {
                        if covered_transcriptions.remove(&lecture.id) {
                            covered_transcriptions.insert(new_id);
                        }
                    }
                    report.synced += 1;
                }
                Err(e) => {
                    warn!(lecture_id = %lecture.id, error = %e, "lecture sync failed");
                    report.errors += 1;
                }
            }
        }

        // Transcriptions are re-read after the lecture phase: a rekey may
        // have moved them under their remote lecture id.
        let transcriptions = self
            .store
            .unsynced_transcriptions()
            .context("failed to read unsynced transcriptions")?;
        let transcriptions: Vec<Transcript> = transcriptions
            .into_iter()
            .filter(|t| !covered_transcriptions.contains(&t.lecture_id))
            .collect();
        report.total += transcriptions.len();
        for transcript in transcriptions {
            match self.push_transcript(&transcript).await {
                Ok(()) => {
                    self.store.mark_transcription_synced(&transcript.lecture_id)?;
                    report.synced += 1;
                }
                Err(e) => {
                    warn!(
                        lecture_id = %transcript.lecture_id,
                        error = %e,
                        "transcription sync failed"
                    );
                    report.errors += 1;
                }
            }
        }

        // Generic queue last, in FIFO order. Entries are re-read by id
        // right before replay: an earlier lecture rekey may have rewritten
        // their payloads since the initial listing.
        report.total += initial_entries.len();
        for listed in initial_entries {
            let Some(entry) = self.store.get_entry(listed.id)? else {
                continue;
            };
            self.store.set_entry_state(entry.id, QueueState::InFlight)?;

            let result = match &entry.op {
                SyncOp::LectureCreate { lecture } => {
                    self.sync_lecture(lecture).await.map(|_| ())
                }
                SyncOp::TranscriptionUpdate { transcript, .. } => {
                    self.push_transcript(transcript).await
                }
            };

            match result {
                Ok(()) => {
                    match &entry.op {
                        SyncOp::LectureCreate { lecture } => {
                            self.store.mark_lecture_synced(&lecture.id)?;
                        }
                        SyncOp::TranscriptionUpdate { lecture_id, .. } => {
                            self.store.mark_transcription_synced(lecture_id)?;
                        }
                    }
                    self.store.delete_entry(entry.id)?;
                    report.synced += 1;
                }
                Err(e) => {
                    report.errors += 1;
                    let retries = self.store.bump_retries(entry.id)?;
                    if retries >= self.max_retries {
                        // Dropped: the entry leaves the queue for good. The
                        // offline records stay behind unsynced and re-enter
                        // the record phases on later runs.
                        self.store.set_entry_state(entry.id, QueueState::Dropped)?;
                        self.store.delete_entry(entry.id)?;
                        warn!(
                            entry_id = entry.id,
                            entity = %entry.op.entity_key(),
                            retries,
                            error = %e,
                            "retry cap exceeded, dropping queue entry"
                        );
                        self.notify(&SyncEvent::RetryExhausted {
                            entry_id: entry.id,
                            entity_key: entry.op.entity_key().to_string(),
                        });
                    } else {
                        warn!(
                            entry_id = entry.id,
                            retries,
                            error = %e,
                            "queue entry replay failed, will retry"
                        );
                    }
                }
            }
        }

        Ok(report)
    }

    /// Sync one lecture: create remotely when it carries an offline id
    /// (rekeying dependent local state to the generated id), update the
    /// existing document otherwise. Returns the remote id when a create
    /// rekeyed local state.
    async fn sync_lecture(&self, lecture: &Lecture) -> Result<Option<String>> {
        if lecture.is_offline() {
            let doc = json!({
                "name": lecture.name,
                "topic": lecture.topic,
                "createdBy": lecture.created_by,
                "isPublic": lecture.is_public,
                "createdAt": lecture.created_at,
            });
            let remote_id = self
                .remote
                .create("lectures", doc)
                .await
                .with_context(|| format!("creating lecture {}", lecture.id))?;
            self.store.rekey_lecture(&lecture.id, &remote_id)?;
            Ok(Some(remote_id))
        } else {
            self.remote
                .update_fields(
                    "lectures",
                    &lecture.id,
                    json!({
                        "name": lecture.name,
                        "topic": lecture.topic,
                        "lastUpdated": chrono::Utc::now(),
                    }),
                )
                .await
                .with_context(|| format!("updating lecture {}", lecture.id))?;
            Ok(None)
        }
    }

    /// Merge-write a transcript to the remote store.
    ///
    /// Scalar fields go through an upsert; the chunk list goes through the
    /// deduplicating array append so replaying an already-present chunk
    /// never duplicates it.
    async fn push_transcript(&self, transcript: &Transcript) -> Result<()> {
        let mut fields = json!({
            "rawText": transcript.raw_text,
            "lastUpdated": transcript.last_updated,
        });

        if let Some(corrected) = &transcript.corrected_text {
            fields["correctedText"] = json!(corrected);
            fields["correctedBy"] = json!(transcript.corrected_by);
            fields["correctedAt"] = json!(transcript.corrected_at);
        }
        if let Some(created_by) = &transcript.created_by {
            fields["createdBy"] = json!(created_by);
        }

        self.remote
            .set_merge("transcriptions", &transcript.lecture_id, fields)
            .await
            .with_context(|| format!("merging transcription {}", transcript.lecture_id))?;

        for chunk in &transcript.chunks {
            let item = serde_json::to_value(chunk)
                .context("failed to serialize chunk")?;
            self.remote
                .append_to_array("transcriptions", &transcript.lecture_id, "chunks", item)
                .await
                .with_context(|| {
                    format!("appending chunk {} to {}", chunk.id, transcript.lecture_id)
                })?;
        }

        Ok(())
    }
}
