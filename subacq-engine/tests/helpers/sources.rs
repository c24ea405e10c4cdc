//! Scripted subtitle sources

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use subacq_engine::sources::{SourceError, SubtitleSource};
use subacq_engine::types::{Candidate, Query, SubtitleFile, SubtitleFormat};

/// What one call to a scripted source does
#[derive(Debug, Clone)]
pub enum Script {
    Respond(Vec<Candidate>),
    Fail(SourceError),
    /// Sleep, then respond
    Slow(Duration, Vec<Candidate>),
    Panic,
}

/// Source that plays back queued scripts, then repeats a default
pub struct ScriptedSource {
    name: String,
    queue: Mutex<VecDeque<Script>>,
    default: Mutex<Script>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    health: Mutex<Result<(), SourceError>>,
}

impl ScriptedSource {
    pub fn new(name: &str, default: Script) -> Self {
        Self {
            name: name.to_string(),
            queue: Mutex::new(VecDeque::new()),
            default: Mutex::new(default),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            health: Mutex::new(Ok(())),
        }
    }

    pub fn responding(name: &str, candidates: Vec<Candidate>) -> Self {
        Self::new(name, Script::Respond(candidates))
    }

    pub fn failing(name: &str) -> Self {
        Self::new(name, Script::Fail(SourceError::Network("connection refused".to_string())))
    }

    pub fn then(&self, script: Script) -> &Self {
        self.queue.lock().unwrap().push_back(script);
        self
    }

    pub fn set_default(&self, script: Script) {
        *self.default.lock().unwrap() = script;
    }

    pub fn set_health(&self, result: Result<(), SourceError>) {
        *self.health.lock().unwrap() = result;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_script(&self) -> Script {
        let queued = self.queue.lock().unwrap().pop_front();
        queued.unwrap_or_else(|| self.default.lock().unwrap().clone())
    }
}

#[async_trait]
impl SubtitleSource for ScriptedSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(&self, _query: &Query) -> Result<Vec<Candidate>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let script = self.next_script();
        let result = match script {
            Script::Respond(candidates) => Ok(candidates),
            Script::Fail(error) => Err(error),
            Script::Slow(delay, candidates) => {
                tokio::time::sleep(delay).await;
                Ok(candidates)
            }
            Script::Panic => {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                panic!("scripted source panic");
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn download(&self, candidate: &Candidate) -> Result<SubtitleFile, SourceError> {
        Ok(SubtitleFile {
            format: candidate.format,
            content: format!("subtitle {}", candidate.download_ref).into_bytes(),
            path: None,
        })
    }

    async fn health_check(&self) -> Result<(), SourceError> {
        self.health.lock().unwrap().clone()
    }
}

/// English candidate with the given reference and format
pub fn candidate(reference: &str, format: SubtitleFormat) -> Candidate {
    Candidate::new("ignored", reference, "en", format)
}
