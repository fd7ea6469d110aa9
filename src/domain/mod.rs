//! Data structures for transcripts, lectures, and the sync queue.

pub mod lecture;
pub mod sync;
pub mod transcript;

pub use lecture::Lecture;
pub use sync::{QueueEntry, QueueState, SyncEvent, SyncOp, SyncReport};
pub use transcript::{Chunk, Transcript};
