//! Transcript ingestion: speech-source contract and chunk segmentation.

pub mod diff;
pub mod segmenter;
pub mod speech;

pub use diff::next_chunk;
pub use segmenter::{Segmenter, SegmenterConfig, SegmenterHandle};
pub use speech::{RecognitionError, RecognitionUpdate, ScriptedSource, SpeechSource};
