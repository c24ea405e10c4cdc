//! Concurrent multi-source search
//!
//! For one query the manager walks the enabled sources in priority order,
//! gates each through its rate limiter and the health tracker, then runs
//! every allowed call as its own task bounded by that source's dynamic
//! timeout. The search completes when every task has answered, failed,
//! timed out or panicked. Whatever candidates arrived are merged in
//! priority order; the position in that list is the candidate's discovery
//! order for tie-breaking.
//!
//! A failing source only ever contributes an empty list and a
//! [`SourceOutcome`] entry. Nothing here returns an error to the caller.

use super::{ActiveSource, SourceError, SourceOutcome, SourceRegistry, SourceStatus};
use crate::events::{AcquisitionEvent, AcquisitionEventBus};
use crate::health::{CallOutcome, CallPermit, CircuitTransition, HealthTracker};
use crate::types::{Candidate, Query, SubtitleFile};
use futures::future::join_all;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinError;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Merged result of one multi-source search
#[derive(Debug, Clone, Default)]
pub struct SearchReport {
    /// Candidates from all sources, in source-priority order
    pub candidates: Vec<Candidate>,
    /// One entry per enabled source, in priority order
    pub outcomes: Vec<SourceOutcome>,
}

impl SearchReport {
    /// At least one source was called and answered
    pub fn any_responded(&self) -> bool {
        self.outcomes.iter().any(SourceOutcome::responded)
    }
}

/// Health bookkeeping shared with spawned call tasks
///
/// Every spawned call reports its own outcome, so a half-open trial call is
/// released even when the search that started it is dropped.
#[derive(Clone)]
struct CallRecorder {
    health: Arc<HealthTracker>,
    events: AcquisitionEventBus,
}

impl CallRecorder {
    /// Feed one search result to the health tracker and classify it
    fn record(
        &self,
        source: &str,
        result: Result<Vec<Candidate>, SourceError>,
        elapsed: Duration,
    ) -> (Vec<Candidate>, SourceStatus) {
        self.report(source, &call_outcome(&result), elapsed);
        match result {
            Ok(candidates) => {
                debug!(source = %source, candidates = candidates.len(), "Source answered");
                let count = candidates.len();
                (candidates, SourceStatus::Succeeded { candidates: count })
            }
            Err(SourceError::Timeout(timeout)) => {
                warn!(source = %source, timeout_ms = timeout.as_millis() as u64, "Source call timed out");
                (Vec::new(), SourceStatus::TimedOut)
            }
            Err(e) => match e.failure_kind() {
                Some(kind) => {
                    warn!(source = %source, error = %e, "Source call failed");
                    (
                        Vec::new(),
                        SourceStatus::Failed {
                            kind,
                            message: e.to_string(),
                        },
                    )
                }
                None => {
                    debug!(source = %source, reason = %e, "Source cannot serve query");
                    (Vec::new(), SourceStatus::Unsupported)
                }
            },
        }
    }

    fn report(&self, source: &str, outcome: &CallOutcome, elapsed: Duration) {
        let transition = self.health.after_call(source, outcome, elapsed);
        let timestamp = subacq_common::time::now();
        match transition {
            Some(CircuitTransition::Opened {
                consecutive_failures,
                cooldown,
            }) => {
                self.events.emit(AcquisitionEvent::CircuitOpened {
                    source: source.to_string(),
                    consecutive_failures,
                    cooldown_secs: cooldown.as_secs(),
                    timestamp,
                });
            }
            Some(CircuitTransition::Closed) => {
                self.events.emit(AcquisitionEvent::CircuitClosed {
                    source: source.to_string(),
                    timestamp,
                });
            }
            None => {}
        }
    }
}

/// Runs source calls under health, timeout and quota control
pub struct SourceManager {
    registry: Arc<SourceRegistry>,
    recorder: CallRecorder,
}

impl SourceManager {
    pub fn new(
        registry: Arc<SourceRegistry>,
        health: Arc<HealthTracker>,
        events: AcquisitionEventBus,
    ) -> Self {
        for descriptor in registry.descriptors() {
            health.register(&descriptor.name);
        }
        Self {
            registry,
            recorder: CallRecorder { health, events },
        }
    }

    pub fn registry(&self) -> &Arc<SourceRegistry> {
        &self.registry
    }

    pub fn health(&self) -> &Arc<HealthTracker> {
        &self.recorder.health
    }

    /// Search every enabled, healthy source concurrently
    pub async fn search(&self, query: &Query) -> SearchReport {
        let active = self.registry.enabled_in_priority_order();
        if active.is_empty() {
            debug!(item_id = %query.item_id, "No enabled sources");
            return SearchReport::default();
        }

        let shared_query = Arc::new(query.clone());
        let mut outcomes: Vec<Option<SourceOutcome>> = vec![None; active.len()];
        let mut calls = Vec::new();

        // No await between gating and spawning: a permit, once granted,
        // always belongs to a running task that reports back.
        for (index, source) in active.iter().enumerate() {
            if let Some(status) = self.gate(source) {
                outcomes[index] = Some(SourceOutcome::new(source.name(), status, Duration::ZERO));
                continue;
            }

            let timeout = self.health().timeout_for(source.name());
            let implementation = Arc::clone(&source.source);
            let task_query = Arc::clone(&shared_query);
            let recorder = self.recorder.clone();
            let name = source.name().to_string();
            let handle = tokio::spawn(async move {
                let started = Instant::now();
                let result = guarded(timeout, implementation.search(&task_query)).await;
                let elapsed = started.elapsed();
                let result = result.and_then(|found| validate(found, &name, &task_query));
                let (candidates, status) = recorder.record(&name, result, elapsed);
                (candidates, SourceOutcome::new(name, status, elapsed))
            });
            calls.push(((index, Instant::now()), handle));
        }

        let (meta, handles): (Vec<_>, Vec<_>) = calls.into_iter().unzip();
        let joined = join_all(handles).await;

        let mut per_source: Vec<Vec<Candidate>> = vec![Vec::new(); active.len()];
        for ((index, spawned), result) in meta.into_iter().zip(joined) {
            let (candidates, outcome) = match result {
                Ok(done) => done,
                Err(join_error) => {
                    let name = active[index].name();
                    let elapsed = spawned.elapsed();
                    let (candidates, status) =
                        self.recorder.record(name, Err(join_failure(join_error)), elapsed);
                    (candidates, SourceOutcome::new(name, status, elapsed))
                }
            };
            per_source[index] = candidates;
            outcomes[index] = Some(outcome);
        }

        let candidates: Vec<Candidate> = per_source.into_iter().flatten().collect();
        let outcomes: Vec<SourceOutcome> = outcomes.into_iter().flatten().collect();

        info!(
            item_id = %query.item_id,
            language = %query.language,
            sources = active.len(),
            candidates = candidates.len(),
            "Source search complete"
        );

        SearchReport {
            candidates,
            outcomes,
        }
    }

    /// Download a candidate's file from the source that returned it
    pub async fn download(&self, candidate: &Candidate) -> Result<SubtitleFile, SourceError> {
        let active = self
            .registry
            .enabled_in_priority_order()
            .into_iter()
            .find(|s| s.name() == candidate.source)
            .ok_or_else(|| {
                SourceError::Unavailable(format!("'{}' is not an enabled source", candidate.source))
            })?;

        if let Some(status) = self.gate(&active) {
            return Err(SourceError::Unavailable(format!(
                "'{}' {}",
                active.name(),
                match status {
                    SourceStatus::RateLimited => "is over its request quota",
                    _ => "circuit is open",
                }
            )));
        }

        let timeout = self.health().timeout_for(active.name());
        let implementation = Arc::clone(&active.source);
        let recorder = self.recorder.clone();
        let name = active.name().to_string();
        let target = candidate.clone();
        let spawned = Instant::now();
        let joined = tokio::spawn(async move {
            let started = Instant::now();
            let result = guarded(timeout, implementation.download(&target)).await;
            recorder.report(&name, &call_outcome(&result), started.elapsed());
            result
        })
        .await;

        joined.unwrap_or_else(|join_error| {
            let error = join_failure(join_error);
            self.recorder
                .report(active.name(), &call_outcome::<()>(&Err(error.clone())), spawned.elapsed());
            Err(error)
        })
    }

    /// Run every enabled source's health check concurrently
    ///
    /// Sources whose circuit is cooling down are reported as skipped; a
    /// check against a source past its cooldown acts as the half-open probe.
    pub async fn run_health_checks(&self) -> Vec<SourceOutcome> {
        let active = self.registry.enabled_in_priority_order();
        let mut outcomes: Vec<Option<SourceOutcome>> = vec![None; active.len()];
        let mut checks = Vec::new();

        for (index, source) in active.iter().enumerate() {
            if self.health().before_call(source.name()) == CallPermit::Skip {
                outcomes[index] =
                    Some(SourceOutcome::new(source.name(), SourceStatus::Skipped, Duration::ZERO));
                continue;
            }
            let timeout = self.health().timeout_for(source.name());
            let implementation = Arc::clone(&source.source);
            let recorder = self.recorder.clone();
            let name = source.name().to_string();
            let handle = tokio::spawn(async move {
                let started = Instant::now();
                let result = guarded(timeout, implementation.health_check()).await;
                let elapsed = started.elapsed();
                let (_, status) = recorder.record(&name, result.map(|()| Vec::new()), elapsed);
                SourceOutcome::new(name, status, elapsed)
            });
            checks.push(((index, Instant::now()), handle));
        }

        let (meta, handles): (Vec<_>, Vec<_>) = checks.into_iter().unzip();
        for ((index, spawned), result) in meta.into_iter().zip(join_all(handles).await) {
            outcomes[index] = Some(result.unwrap_or_else(|join_error| {
                let name = active[index].name();
                let elapsed = spawned.elapsed();
                let (_, status) = self.recorder.record(name, Err(join_failure(join_error)), elapsed);
                SourceOutcome::new(name, status, elapsed)
            }));
        }

        outcomes.into_iter().flatten().collect()
    }

    /// Quota then circuit; `Some(status)` when the source must not be called
    fn gate(&self, source: &ActiveSource) -> Option<SourceStatus> {
        if !source.try_acquire_quota() {
            debug!(source = %source.name(), "Source over request quota, skipping");
            return Some(SourceStatus::RateLimited);
        }
        if self.health().before_call(source.name()) == CallPermit::Skip {
            debug!(source = %source.name(), "Source circuit open, skipping");
            return Some(SourceStatus::Skipped);
        }
        None
    }
}

/// Run a source call under `timeout`, turning a panic into an error
async fn guarded<T, F>(timeout: Duration, call: F) -> Result<T, SourceError>
where
    F: Future<Output = Result<T, SourceError>>,
{
    match tokio::time::timeout(timeout, AssertUnwindSafe(call).catch_unwind()).await {
        Ok(Ok(result)) => result,
        Ok(Err(_panic)) => Err(SourceError::Other("source task panicked".to_string())),
        Err(_elapsed) => Err(SourceError::Timeout(timeout)),
    }
}

fn join_failure(join_error: JoinError) -> SourceError {
    if join_error.is_panic() {
        SourceError::Other("source task panicked".to_string())
    } else {
        SourceError::Other("source task cancelled".to_string())
    }
}

/// Health-tracker view of a call result
fn call_outcome<T>(result: &Result<T, SourceError>) -> CallOutcome {
    match result {
        Ok(_) => CallOutcome::Success,
        Err(e) => match e.failure_kind() {
            Some(kind) => CallOutcome::failure(kind, e.to_string()),
            None => CallOutcome::Success,
        },
    }
}

/// Reject malformed responses and drop candidates for other languages
///
/// A candidate without a download reference makes the whole response
/// malformed. The source name on every kept candidate is overwritten with
/// the registry name.
fn validate(
    candidates: Vec<Candidate>,
    source: &str,
    query: &Query,
) -> Result<Vec<Candidate>, SourceError> {
    if let Some(bad) = candidates.iter().position(|c| c.download_ref.trim().is_empty()) {
        return Err(SourceError::Malformed(format!(
            "candidate {} has no download reference",
            bad
        )));
    }

    let total = candidates.len();
    let kept: Vec<Candidate> = candidates
        .into_iter()
        .filter(|c| c.language.eq_ignore_ascii_case(&query.language))
        .map(|mut c| {
            c.source = source.to_string();
            c.score = None;
            c
        })
        .collect();

    if kept.len() < total {
        debug!(
            source = %source,
            dropped = total - kept.len(),
            "Dropped candidates for other languages"
        );
    }
    Ok(kept)
}
