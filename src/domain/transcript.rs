//! Transcript and chunk types.
//!
//! A transcript grows append-only: chunks are immutable once committed and
//! `raw_text` is always the space-joined concatenation of chunk texts in
//! arrival order. Merging two copies of the same transcript keeps scalar
//! fields last-write-wins and unions the chunk lists by chunk id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An immutable unit of finalized transcript text, committed after a quiet
/// period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Creation-time monotonic identifier (millisecond timestamp)
    pub id: i64,

    /// New finalized content only, trimmed, never empty
    pub text: String,

    /// When the chunk was committed
    pub timestamp: DateTime<Utc>,
}

impl Chunk {
    /// Create a chunk with the given id and current timestamp
    pub fn new(id: i64, text: impl Into<String>) -> Self {
        Self {
            id,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// A transcript for one lecture.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transcript {
    /// The lecture this transcript belongs to
    pub lecture_id: String,

    /// Full concatenated final text (derived from chunks)
    pub raw_text: String,

    /// Human-edited text, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub corrected_text: Option<String>,

    /// Who corrected it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub corrected_by: Option<String>,

    /// When it was corrected
    #[serde(skip_serializing_if = "Option::is_none")]
    pub corrected_at: Option<DateTime<Utc>>,

    /// Committed chunks in arrival order
    #[serde(default)]
    pub chunks: Vec<Chunk>,

    /// Last local modification time
    pub last_updated: DateTime<Utc>,

    /// User who created the transcript
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
}

impl Transcript {
    /// Create an empty transcript for a lecture
    pub fn new(lecture_id: impl Into<String>, created_by: Option<String>) -> Self {
        Self {
            lecture_id: lecture_id.into(),
            raw_text: String::new(),
            corrected_text: None,
            corrected_by: None,
            corrected_at: None,
            chunks: Vec::new(),
            last_updated: Utc::now(),
            created_by,
        }
    }

    /// Append a chunk, maintaining the raw_text invariant.
    ///
    /// Chunks already present (same id) and chunks whose text repeats the
    /// previous chunk verbatim are skipped. Returns whether the chunk was
    /// actually appended.
    pub fn append_chunk(&mut self, chunk: Chunk) -> bool {
        if self.chunks.iter().any(|c| c.id == chunk.id) {
            return false;
        }
        if let Some(last) = self.chunks.last() {
            if last.text == chunk.text {
                return false;
            }
        }
        if !self.raw_text.is_empty() {
            self.raw_text.push(' ');
        }
        self.raw_text.push_str(&chunk.text);
        self.chunks.push(chunk);
        self.last_updated = Utc::now();
        true
    }

    /// Merge another copy of this transcript into self.
    ///
    /// Scalar fields are last-write-wins by `last_updated`; the chunk list
    /// is the union of both, deduplicated by chunk id, with raw_text
    /// rebuilt from the result. Used when offline segmenter output must
    /// accumulate across sessions before sync.
    pub fn merge_from(&mut self, other: &Transcript) {
        if other.last_updated >= self.last_updated {
            if other.corrected_text.is_some() {
                self.corrected_text = other.corrected_text.clone();
                self.corrected_by = other.corrected_by.clone();
                self.corrected_at = other.corrected_at;
            }
            if other.created_by.is_some() {
                self.created_by = other.created_by.clone();
            }
            self.last_updated = other.last_updated;
        }

        for chunk in &other.chunks {
            if !self.chunks.iter().any(|c| c.id == chunk.id) {
                self.chunks.push(chunk.clone());
            }
        }
        self.chunks.sort_by_key(|c| c.id);
        self.rebuild_raw_text();
    }

    /// Rebuild raw_text from the chunk list
    fn rebuild_raw_text(&mut self) {
        self.raw_text = self
            .chunks
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
    }
}
