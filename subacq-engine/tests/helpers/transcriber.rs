//! Scripted speech-to-text collaborator

use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use subacq_engine::types::{SubtitleFile, SubtitleFormat};
use subacq_engine::{Transcriber, TranscriptionError};

pub struct ScriptedTranscriber {
    available: bool,
    result: Result<(), TranscriptionError>,
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedTranscriber {
    pub fn working() -> Self {
        Self::with_result(Ok(()))
    }

    pub fn with_result(result: Result<(), TranscriptionError>) -> Self {
        Self {
            available: true,
            result,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn not_installed() -> Self {
        Self {
            available: false,
            ..Self::working()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcriber for ScriptedTranscriber {
    fn is_available(&self) -> bool {
        self.available
    }

    async fn transcribe(
        &self,
        media_file: &Path,
        _language: &str,
    ) -> Result<SubtitleFile, TranscriptionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.result.clone().map(|()| SubtitleFile {
            format: SubtitleFormat::Plain,
            content: b"1\n00:00:01,000 --> 00:00:02,000\nhello\n".to_vec(),
            path: Some(media_file.with_extension("en.srt")),
        })
    }
}
