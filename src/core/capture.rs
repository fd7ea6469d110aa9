//! Capture session: speech source → segmenter → remote write with
//! offline fallback.
//!
//! The hot capture path never propagates sync failures: a failed remote
//! write (or being offline) turns into a durable local write plus a sync
//! queue entry, and capture continues. Storage failures do not stop
//! capture either; they are logged and counted so the operator knows a
//! write was lost.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::adapters::{RemoteError, RemoteStore};
use crate::domain::{Chunk, SyncEvent, SyncOp, Transcript};
use crate::ingest::{Segmenter, SegmenterConfig, SegmenterHandle, SpeechSource};
use crate::store::LocalStore;

use super::connectivity::ConnectivityGate;
use super::reconciler::SyncService;

/// Capture session settings.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Lecture the transcript belongs to
    pub lecture_id: String,

    /// User running the capture
    pub user_id: String,

    /// Segmenter tuning
    pub segmenter: SegmenterConfig,

    /// Automatic restarts allowed after transient recognition errors
    pub max_restarts: u32,
}

impl CaptureConfig {
    pub fn new(lecture_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            lecture_id: lecture_id.into(),
            user_id: user_id.into(),
            segmenter: SegmenterConfig::default(),
            max_restarts: 10,
        }
    }
}

/// A live capture session for one lecture.
pub struct CaptureSession {
    config: CaptureConfig,
    store: Arc<LocalStore>,
    remote: Arc<dyn RemoteStore>,
    gate: Arc<ConnectivityGate>,
    sync: Arc<SyncService>,
    segmenter: Option<SegmenterHandle>,
    consumer: Option<JoinHandle<()>>,
    storage_errors: Arc<AtomicUsize>,
}

impl CaptureSession {
    pub fn new(
        config: CaptureConfig,
        store: Arc<LocalStore>,
        remote: Arc<dyn RemoteStore>,
        gate: Arc<ConnectivityGate>,
        sync: Arc<SyncService>,
    ) -> Self {
        Self {
            config,
            store,
            remote,
            gate,
            sync,
            segmenter: None,
            consumer: None,
            storage_errors: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Begin capturing: initialize the remote transcription document
    /// (falling back offline) and spawn the segmenter + chunk consumer.
    pub async fn start(&mut self) -> Result<()> {
        if self.segmenter.is_some() {
            return Ok(());
        }

        // Resume from any offline record so raw_text accumulates across
        // sessions; start fresh otherwise.
        let transcript = match self.store.get_transcription(&self.config.lecture_id) {
            Ok(Some(existing)) => existing,
            Ok(None) => {
                Transcript::new(&self.config.lecture_id, Some(self.config.user_id.clone()))
            }
            Err(e) => {
                error!(error = %e, "could not read offline transcript, starting fresh");
                self.storage_errors.fetch_add(1, Ordering::SeqCst);
                Transcript::new(&self.config.lecture_id, Some(self.config.user_id.clone()))
            }
        };

        self.init_remote_doc(&transcript).await;

        let (handle, mut chunk_rx) = Segmenter::spawn(self.config.segmenter.clone());
        self.segmenter = Some(handle);

        let store = self.store.clone();
        let remote = self.remote.clone();
        let gate = self.gate.clone();
        let storage_errors = self.storage_errors.clone();
        let mut transcript = transcript;

        self.consumer = Some(tokio::spawn(async move {
            while let Some(chunk) = chunk_rx.recv().await {
                if !transcript.append_chunk(chunk.clone()) {
                    continue;
                }

                if gate.is_online() {
                    match write_chunk_remote(remote.as_ref(), &transcript, &chunk).await {
                        Ok(()) => {
                            debug!(chunk_id = chunk.id, "chunk written remotely");
                            continue;
                        }
                        Err(e) => {
                            info!(error = %e, "remote write failed, storing offline");
                        }
                    }
                }

                store_offline(&store, &transcript, &storage_errors);
            }
        }));

        info!(lecture_id = %self.config.lecture_id, "capture started");
        Ok(())
    }

    /// Feed a (finalText, interimText) result set into the segmenter
    pub async fn push_update(&self, final_text: &str, interim_text: &str) {
        if let Some(segmenter) = &self.segmenter {
            segmenter.push(final_text, interim_text).await;
        }
    }

    /// Drive the session from a speech source until it is exhausted or
    /// fails fatally. Transient errors restart the source (bounded) and
    /// are never surfaced.
    pub async fn run<S: SpeechSource>(&mut self, mut source: S) -> Result<()> {
        self.start().await?;

        let mut restarts = 0u32;
        while let Some(result) = source.next().await {
            match result {
                Ok(update) => {
                    self.push_update(&update.final_text, &update.interim_text)
                        .await;
                }
                Err(e) if e.is_transient() && restarts < self.config.max_restarts => {
                    restarts += 1;
                    debug!(restarts, error = %e, "transient recognition error, restarting");
                    source.restart().await?;
                }
                Err(e) => {
                    self.stop().await?;
                    return Err(e.into());
                }
            }
        }

        self.stop().await
    }

    /// Stop capturing: flush the pending debounce chunk, drain the
    /// consumer, and tear down.
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(segmenter) = self.segmenter.take() {
            // Commits any un-timed-out tail before the channel closes
            segmenter.stop().await;
        }
        if let Some(consumer) = self.consumer.take() {
            if let Err(e) = consumer.await {
                warn!("chunk consumer join failed: {}", e);
            }
        }
        info!(lecture_id = %self.config.lecture_id, "capture stopped");
        Ok(())
    }

    /// True local queue depth (the user-visible pending counter)
    pub fn pending_sync_count(&self) -> Result<usize> {
        Ok(self.store.pending_sync_count()?)
    }

    /// Subscribe to sync lifecycle events
    pub fn on_sync_event(&self, listener: impl Fn(&SyncEvent) + Send + Sync + 'static) {
        self.sync.add_listener(listener);
    }

    /// Writes lost to storage failures so far (surfaced, never silent)
    pub fn storage_error_count(&self) -> usize {
        self.storage_errors.load(Ordering::SeqCst)
    }

    /// Upsert the initial transcription document, falling back offline
    async fn init_remote_doc(&self, transcript: &Transcript) {
        let fields = json!({
            "rawText": transcript.raw_text,
            "createdBy": self.config.user_id,
            "lastUpdated": transcript.last_updated,
        });

        if self.gate.is_online() {
            match self
                .remote
                .set_merge("transcriptions", &self.config.lecture_id, fields)
                .await
            {
                Ok(()) => return,
                Err(e) => {
                    info!(error = %e, "remote init failed, storing offline");
                }
            }
        }

        store_offline(&self.store, transcript, &self.storage_errors);
    }
}

/// Upsert scalar fields, then append the new chunk (deduplicated remotely)
async fn write_chunk_remote(
    remote: &dyn RemoteStore,
    transcript: &Transcript,
    chunk: &Chunk,
) -> Result<(), RemoteError> {
    remote
        .set_merge(
            "transcriptions",
            &transcript.lecture_id,
            json!({
                "rawText": transcript.raw_text,
                "lastUpdated": transcript.last_updated,
            }),
        )
        .await?;

    let item = serde_json::to_value(chunk)
        .map_err(|e| RemoteError::Network(format!("chunk serialization: {}", e)))?;
    remote
        .append_to_array("transcriptions", &transcript.lecture_id, "chunks", item)
        .await
}

/// Durably buffer the transcript and queue it for replay. Storage errors
/// are counted and logged; the capture loop keeps going.
fn store_offline(store: &LocalStore, transcript: &Transcript, storage_errors: &AtomicUsize) {
    if let Err(e) = store.put_transcription(transcript) {
        error!(error = %e, "offline write lost");
        storage_errors.fetch_add(1, Ordering::SeqCst);
        return;
    }

    // Queue the merged record so the entry carries everything accumulated
    // so far, not just this session's view.
    let merged = match store.get_transcription(&transcript.lecture_id) {
        Ok(Some(t)) => t,
        _ => transcript.clone(),
    };
    if let Err(e) = store.enqueue(&SyncOp::TranscriptionUpdate {
        lecture_id: merged.lecture_id.clone(),
        transcript: merged,
    }) {
        error!(error = %e, "failed to queue offline write");
        storage_errors.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryRemoteStore;
    use crate::ingest::{RecognitionError, RecognitionUpdate, ScriptedSource};

    fn session(online: bool) -> (CaptureSession, Arc<LocalStore>, Arc<MemoryRemoteStore>) {
        let store = Arc::new(LocalStore::open_in_memory().unwrap());
        let remote = Arc::new(MemoryRemoteStore::new());
        let gate = Arc::new(ConnectivityGate::new(online));
        let sync = Arc::new(SyncService::new(store.clone(), remote.clone(), 3));
        let session = CaptureSession::new(
            CaptureConfig::new("lec-1", "user-1"),
            store.clone(),
            remote.clone(),
            gate,
            sync,
        );
        (session, store, remote)
    }

    #[tokio::test]
    async fn test_online_start_initializes_remote_doc() {
        let (mut session, store, remote) = session(true);
        session.start().await.unwrap();
        session.stop().await.unwrap();

        assert!(remote.get("transcriptions", "lec-1").await.is_some());
        assert_eq!(store.pending_sync_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_offline_start_buffers_locally() {
        let (mut session, store, remote) = session(false);
        session.start().await.unwrap();
        session.stop().await.unwrap();

        assert!(remote.get("transcriptions", "lec-1").await.is_none());
        assert!(store.get_transcription("lec-1").unwrap().is_some());
        assert!(session.pending_sync_count().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_run_restarts_after_transient_errors() {
        let (mut session, store, _remote) = session(false);

        let source = ScriptedSource::from_script(vec![
            Ok(RecognitionUpdate {
                final_text: "hello class".into(),
                ..Default::default()
            }),
            Err(RecognitionError::NoSpeech),
            Ok(RecognitionUpdate {
                final_text: "hello class welcome".into(),
                ..Default::default()
            }),
        ]);

        session.run(source).await.unwrap();

        let transcript = store.get_transcription("lec-1").unwrap().unwrap();
        assert_eq!(transcript.raw_text, "hello class welcome");
    }

    #[tokio::test]
    async fn test_run_surfaces_fatal_error() {
        let (mut session, _store, _remote) = session(false);

        let source = ScriptedSource::from_script(vec![Err(RecognitionError::Fatal(
            "microphone permission denied".into(),
        ))]);

        assert!(session.run(source).await.is_err());
    }

    #[tokio::test]
    async fn test_remote_failure_falls_back_offline() {
        let (mut session, store, remote) = session(true);
        remote.fail_next(10);

        session.start().await.unwrap();
        session.stop().await.unwrap();

        // Capture survived and the write landed locally
        assert!(store.get_transcription("lec-1").unwrap().is_some());
        assert_eq!(session.storage_error_count(), 0);
    }
}
