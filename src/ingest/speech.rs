//! Speech source contract.
//!
//! The recognizer is an external collaborator: a producer of result sets,
//! each finalized or interim, cumulative or incremental depending on the
//! implementation. The segmenter's fallback diffing absorbs either style.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors from the speech source.
#[derive(Debug, Clone, Error)]
pub enum RecognitionError {
    /// Fatal for the capture session; surfaced, requires manual restart
    #[error("recognition failed: {0}")]
    Fatal(String),

    /// No speech detected within the recognizer's window; recovered
    /// locally by restarting the source, never surfaced
    #[error("no speech detected")]
    NoSpeech,

    /// Audio input hiccup; recovered locally like NoSpeech
    #[error("audio capture interrupted: {0}")]
    AudioInterrupted(String),
}

impl RecognitionError {
    /// Transient errors trigger an automatic source restart
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::NoSpeech | Self::AudioInterrupted(_))
    }
}

/// One result set from the recognizer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecognitionUpdate {
    /// Finalized text so far (cumulative for cumulative-style sources,
    /// just the new segment for incremental ones)
    pub final_text: String,

    /// Interim text still subject to revision, display-only
    pub interim_text: String,
}

/// An asynchronous producer of recognition result sets.
#[async_trait]
pub trait SpeechSource: Send {
    /// Next result set; `None` when the source is exhausted
    async fn next(&mut self) -> Option<Result<RecognitionUpdate, RecognitionError>>;

    /// Restart after a transient error
    async fn restart(&mut self) -> Result<(), RecognitionError> {
        Ok(())
    }
}

/// Channel-fed source: whatever pushes into the sender drives capture.
/// Doubles as the test and demo source.
pub struct ScriptedSource {
    rx: mpsc::Receiver<Result<RecognitionUpdate, RecognitionError>>,
    restarts: u32,
}

impl ScriptedSource {
    pub fn new(rx: mpsc::Receiver<Result<RecognitionUpdate, RecognitionError>>) -> Self {
        Self { rx, restarts: 0 }
    }

    /// Build a source pre-loaded with a fixed script
    pub fn from_script(
        script: Vec<Result<RecognitionUpdate, RecognitionError>>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(script.len().max(1));
        for item in script {
            // Capacity covers the whole script
            let _ = tx.try_send(item);
        }
        Self::new(rx)
    }

    /// How many times the session restarted this source
    pub fn restarts(&self) -> u32 {
        self.restarts
    }
}

#[async_trait]
impl SpeechSource for ScriptedSource {
    async fn next(&mut self) -> Option<Result<RecognitionUpdate, RecognitionError>> {
        self.rx.recv().await
    }

    async fn restart(&mut self) -> Result<(), RecognitionError> {
        self.restarts += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(RecognitionError::NoSpeech.is_transient());
        assert!(RecognitionError::AudioInterrupted("stall".into()).is_transient());
        assert!(!RecognitionError::Fatal("mic denied".into()).is_transient());
    }

    #[tokio::test]
    async fn test_scripted_source_drains_in_order() {
        let mut source = ScriptedSource::from_script(vec![
            Ok(RecognitionUpdate {
                final_text: "one".into(),
                ..Default::default()
            }),
            Ok(RecognitionUpdate {
                final_text: "one two".into(),
                ..Default::default()
            }),
        ]);

        assert_eq!(source.next().await.unwrap().unwrap().final_text, "one");
        assert_eq!(source.next().await.unwrap().unwrap().final_text, "one two");
        assert!(source.next().await.is_none());
    }
}
