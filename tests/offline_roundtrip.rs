//! Offline Roundtrip Integration Tests
//!
//! Buffers a lecture and a growing transcript while offline, then
//! reconciles and verifies the remote state, the queue drain, and the
//! offline-id rewrite.

use std::sync::Arc;
use std::sync::Mutex;

use lectern::{
    Chunk, Lecture, LocalStore, MemoryRemoteStore, SyncEvent, SyncOp, SyncReport, SyncService,
    Transcript,
};

#[tokio::test]
async fn test_offline_session_replays_in_full() {
    let store = Arc::new(LocalStore::open_in_memory().unwrap());
    let remote = Arc::new(MemoryRemoteStore::new());
    let sync = SyncService::new(store.clone(), remote.clone(), 3);

    // 1. A lecture authored offline
    let lecture = Lecture::new_offline("Databases", Some("b-trees".into()), "alice");
    let offline_id = lecture.id.clone();
    assert!(lecture.is_offline());
    store.put_lecture(&lecture).unwrap();
    store
        .enqueue(&SyncOp::LectureCreate {
            lecture: lecture.clone(),
        })
        .unwrap();

    // 2. Two offline transcript writes against that lecture
    let mut transcript = Transcript::new(offline_id.clone(), Some("alice".into()));
    transcript.append_chunk(Chunk::new(1, "Welcome to databases"));
    store.put_transcription(&transcript).unwrap();
    store
        .enqueue(&SyncOp::TranscriptionUpdate {
            lecture_id: offline_id.clone(),
            transcript: transcript.clone(),
        })
        .unwrap();

    transcript.append_chunk(Chunk::new(2, "a b-tree is balanced"));
    store.put_transcription(&transcript).unwrap();
    store
        .enqueue(&SyncOp::TranscriptionUpdate {
            lecture_id: offline_id.clone(),
            transcript: transcript.clone(),
        })
        .unwrap();

    assert_eq!(store.pending_entries().unwrap().len(), 3);

    // 3. Back online: one run replays everything
    let reports = Arc::new(Mutex::new(Vec::new()));
    let sink = reports.clone();
    sync.add_listener(move |event| {
        if let SyncEvent::Completed(report) = event {
            sink.lock().unwrap().push(*report);
        }
    });

    let report = sync.reconcile().await.unwrap().unwrap();
    assert_eq!(
        report,
        SyncReport {
            synced: 3,
            errors: 0,
            total: 3,
        }
    );
    assert_eq!(reports.lock().unwrap().as_slice(), &[report]);

    // 4. The lecture exists remotely under a generated id
    assert_eq!(remote.len("lectures").await, 1);
    let lecture_doc = remote.get("lectures", "remote-1").await.unwrap();
    assert_eq!(lecture_doc["name"], "Databases");

    // 5. The transcription followed the rekey and carries everything
    let doc = remote.get("transcriptions", "remote-1").await.unwrap();
    assert_eq!(doc["rawText"], "Welcome to databases a b-tree is balanced");
    assert_eq!(doc["chunks"].as_array().unwrap().len(), 2);

    // 6. Local state: queue drained, transcript rekeyed, nothing pending
    assert_eq!(store.pending_entries().unwrap().len(), 0);
    assert!(store.get_transcription(&offline_id).unwrap().is_none());
    let moved = store.get_transcription("remote-1").unwrap().unwrap();
    assert_eq!(moved.chunks.len(), 2);
    assert_eq!(store.pending_sync_count().unwrap(), 0);
}

#[tokio::test]
async fn test_partial_failure_leaves_failed_entry_queued() {
    let store = Arc::new(LocalStore::open_in_memory().unwrap());
    let remote = Arc::new(MemoryRemoteStore::new());
    let sync = SyncService::new(store.clone(), remote.clone(), 3);

    let mut first = Transcript::new("lec-1", None);
    first.append_chunk(Chunk::new(1, "one"));
    store.put_transcription(&first).unwrap();
    store
        .enqueue(&SyncOp::TranscriptionUpdate {
            lecture_id: "lec-1".into(),
            transcript: first,
        })
        .unwrap();

    let mut second = Transcript::new("lec-2", None);
    second.append_chunk(Chunk::new(2, "two"));
    store.put_transcription(&second).unwrap();
    store
        .enqueue(&SyncOp::TranscriptionUpdate {
            lecture_id: "lec-2".into(),
            transcript: second,
        })
        .unwrap();

    // First entry's merge write fails; the second replays fine
    remote.fail_next(1);
    let report = sync.reconcile().await.unwrap().unwrap();
    assert_eq!(report.synced, 1);
    assert_eq!(report.errors, 1);

    let remaining = store.pending_entries().unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].op.entity_key(), "lec-1");
    assert_eq!(remaining[0].retries, 1);

    // The next run picks the failed entry back up
    let report = sync.reconcile().await.unwrap().unwrap();
    assert_eq!(report.synced, 1);
    assert_eq!(report.errors, 0);
    assert_eq!(store.pending_entries().unwrap().len(), 0);
    assert!(remote.get("transcriptions", "lec-1").await.is_some());
}

#[tokio::test]
async fn test_queue_survives_reopen() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("lectern.db");

    {
        let store = LocalStore::open(&path).unwrap();
        let mut transcript = Transcript::new("lec-1", None);
        transcript.append_chunk(Chunk::new(1, "persisted"));
        store.put_transcription(&transcript).unwrap();
        store
            .enqueue(&SyncOp::TranscriptionUpdate {
                lecture_id: "lec-1".into(),
                transcript,
            })
            .unwrap();
        store.close().unwrap();
    }

    // A fresh process sees the buffered work and replays it
    let store = Arc::new(LocalStore::open(&path).unwrap());
    assert_eq!(store.pending_entries().unwrap().len(), 1);

    let remote = Arc::new(MemoryRemoteStore::new());
    let sync = SyncService::new(store.clone(), remote.clone(), 3);
    let report = sync.reconcile().await.unwrap().unwrap();
    assert_eq!(report.synced, 1);

    let doc = remote.get("transcriptions", "lec-1").await.unwrap();
    assert_eq!(doc["rawText"], "persisted");
}
