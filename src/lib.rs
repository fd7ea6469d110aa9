//! lectern - Offline-first lecture transcription capture and sync
//!
//! A capture engine for live speech transcripts that works with or
//! without a network connection.
//!
//! # Architecture
//!
//! The system is built around a durable local buffer:
//! - Recognition results are segmented into timestamped chunks
//! - Chunks are written remotely when online, buffered locally when not
//! - A sync queue records every offline write for later replay
//! - Coming back online triggers reconciliation automatically
//!
//! # Modules
//!
//! - `adapters`: Remote document store integrations (REST, in-memory)
//! - `core`: Capture session, reconciler, connectivity gate
//! - `domain`: Data structures (Transcript, Chunk, Lecture, SyncOp)
//! - `ingest`: Speech sources and the debounced chunk segmenter
//! - `store`: Durable local store (SQLite)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Capture a session, feeding recognition text from stdin
//! lectern capture --lecture lec-42 --user alice
//!
//! # Replay everything buffered offline
//! lectern sync
//!
//! # Inspect the local buffer
//! lectern status
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod ingest;
pub mod store;

// Re-export main types at crate root for convenience
pub use crate::core::{CaptureConfig, CaptureSession, ConnectivityGate, SyncService, SyncStatus};
pub use crate::domain::{Chunk, Lecture, QueueEntry, QueueState, SyncEvent, SyncOp, SyncReport, Transcript};
pub use crate::ingest::{next_chunk, ScriptedSource, Segmenter, SegmenterConfig, SpeechSource};
pub use crate::store::{LocalStore, StoreError, StoreStats};

pub use crate::adapters::{MemoryRemoteStore, RemoteError, RemoteStore};
