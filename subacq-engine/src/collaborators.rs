//! Interfaces to the systems around the engine
//!
//! The engine does not own storage or the speech-to-text engine. Callers
//! plug them in through these traits.

use crate::types::{Decision, ExistingResult, SubtitleFile};
use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

/// Stored results and decision history
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Currently stored result for `item_id` in `language`
    async fn existing_result(
        &self,
        item_id: &str,
        language: &str,
    ) -> anyhow::Result<Option<ExistingResult>>;

    /// Record the terminal decision of an acquisition attempt
    async fn record_decision(&self, decision: &Decision) -> anyhow::Result<()>;
}

/// Failure of the transcription collaborator
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranscriptionError {
    /// Engine not installed, model missing, or hardware unavailable
    #[error("transcription unavailable: {0}")]
    Unavailable(String),

    #[error("transcription failed: {0}")]
    Failed(String),
}

/// On-device speech-to-text
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Cheap readiness check made before queueing a job
    fn is_available(&self) -> bool {
        true
    }

    /// Produce a subtitle for the media file; may take minutes
    async fn transcribe(
        &self,
        media_file: &Path,
        language: &str,
    ) -> Result<SubtitleFile, TranscriptionError>;
}
