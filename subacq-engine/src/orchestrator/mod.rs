//! Acquisition orchestrator
//!
//! Sequences one acquisition attempt for one (item, language):
//!
//! ```text
//! lock(item, language)
//!   → existing result lookup ──(sufficient)──────────────> NO_ACTION
//!   → cache lookup ──(miss)──> source search → cache write
//!   → score + rank
//!   → threshold check ──(accept)──> upgrade check ──────> ACCEPTED_SOURCE | NO_ACTION
//!                     └─(fallback)─> transcription ─────> ACCEPTED_FALLBACK | FAILED
//!   → record decision, publish DecisionMade
//! ```
//!
//! Every attempt ends in exactly one [`Decision`]. Collaborator failures
//! are turned into decision data, never returned as errors.

pub mod locks;

pub use locks::{ItemGuard, ItemLocks};

use crate::cache::Fingerprint;
use crate::collaborators::{ResultStore, TranscriptionError, Transcriber};
use crate::events::AcquisitionEvent;
use crate::policy::{
    evaluate_selection, evaluate_upgrade, existing_is_sufficient, rank_candidates, SearchMode,
    SelectionVerdict,
};
use crate::scoring;
use crate::types::{
    clamp_score, Candidate, Decision, DecisionAudit, ExistingResult, Outcome, Provenance, Query,
    Reason,
};
use crate::AcquisitionContext;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Top-level entry point for acquisition attempts
pub struct Orchestrator {
    context: Arc<AcquisitionContext>,
    store: Arc<dyn ResultStore>,
    transcriber: Option<Arc<dyn Transcriber>>,
    transcription_slots: Arc<Semaphore>,
    locks: ItemLocks,
}

/// Candidates gathered for one attempt, before scoring
struct Gathered {
    candidates: Vec<Candidate>,
    audit: DecisionAudit,
}

impl Orchestrator {
    pub fn new(
        context: Arc<AcquisitionContext>,
        store: Arc<dyn ResultStore>,
        transcriber: Option<Arc<dyn Transcriber>>,
    ) -> Self {
        let slots = context.config().fallback.max_concurrent_transcriptions.max(1);
        Self {
            context,
            store,
            transcriber,
            transcription_slots: Arc::new(Semaphore::new(slots)),
            locks: ItemLocks::new(),
        }
    }

    pub fn context(&self) -> &Arc<AcquisitionContext> {
        &self.context
    }

    /// Run one acquisition attempt to its terminal decision
    pub async fn acquire(&self, query: &Query, mode: SearchMode) -> Decision {
        let _guard = self.locks.lock(&query.item_id, &query.language).await;
        debug!(item_id = %query.item_id, language = %query.language, mode = ?mode, "Acquisition started");

        let decision = self.decide(query, mode).await;

        if let Err(e) = self.store.record_decision(&decision).await {
            warn!(item_id = %decision.item_id, error = %e, "Failed to record decision");
        }

        info!(
            item_id = %decision.item_id,
            language = %decision.language,
            outcome = ?decision.outcome,
            reason = %decision.reason,
            score = decision.score,
            origin = decision.origin().unwrap_or("-"),
            "Acquisition decided"
        );
        self.context.events().emit(AcquisitionEvent::DecisionMade {
            decision: Box::new(decision.clone()),
        });

        decision
    }

    async fn decide(&self, query: &Query, mode: SearchMode) -> Decision {
        let config = self.context.config();

        // An unreadable store is treated as holding nothing
        let (existing, lookup_failed) =
            match self.store.existing_result(&query.item_id, &query.language).await {
                Ok(existing) => (existing, false),
                Err(e) => {
                    warn!(item_id = %query.item_id, error = %e, "Existing-result lookup failed, continuing without it");
                    (None, true)
                }
            };

        if existing_is_sufficient(existing.as_ref(), &query.language, mode, &config.fallback) {
            let audit = DecisionAudit {
                existing_score: existing.as_ref().map(|e| e.score),
                ..DecisionAudit::default()
            };
            let mut d = decision(query, Outcome::NoAction, Reason::ExistingSufficient, audit);
            d.score = existing.as_ref().map_or(0, |e| e.score);
            return d;
        }

        let Gathered {
            mut candidates,
            mut audit,
        } = self.gather(query).await;
        audit.existing_score = existing.as_ref().map(|e| e.score);
        audit.existing_lookup_failed = lookup_failed;
        audit.candidates_considered = candidates.len();

        scoring::score_all(&mut candidates, query, &config.scoring);
        let ranked = rank_candidates(candidates, &self.priorities(), config.scoring.preferred_format);
        audit.runner_up = ranked
            .get(1)
            .map(|c| (c.source.clone(), c.ranking_score()));
        audit.best_breakdown = ranked
            .first()
            .map(|best| scoring::explain(best, query, &config.scoring));
        let best = ranked.into_iter().next();

        match evaluate_selection(best, &config.fallback) {
            SelectionVerdict::Accept { candidate, reason } => {
                self.accept_source(query, candidate, reason, existing.as_ref(), audit)
            }
            SelectionVerdict::Fallback { reason } => {
                debug!(item_id = %query.item_id, reason = %reason, "Proceeding to fallback");
                match existing {
                    // Nothing qualifies: keep the stored result, never transcribe over it
                    Some(_) => decision(query, Outcome::NoAction, Reason::ExistingRetained, audit),
                    None => self.fallback(query, reason, audit).await,
                }
            }
        }
    }

    /// Cached candidates, or a fresh search written back to the cache
    async fn gather(&self, query: &Query) -> Gathered {
        let cache = self.context.cache();
        let mut audit = DecisionAudit::default();

        if !cache.is_enabled() {
            let report = self.context.manager().search(query).await;
            audit.source_outcomes = report.outcomes;
            return Gathered {
                candidates: report.candidates,
                audit,
            };
        }

        let fingerprint = Fingerprint::new(query, &self.context.registry().enabled_names());
        if let Some(candidates) = cache.get(&fingerprint) {
            debug!(item_id = %query.item_id, fingerprint = %fingerprint, "Result cache hit");
            audit.from_cache = true;
            return Gathered { candidates, audit };
        }
        debug!(item_id = %query.item_id, fingerprint = %fingerprint, "Result cache miss");

        let epoch = cache.epoch();
        let report = self.context.manager().search(query).await;
        if report.any_responded() {
            cache.put_if_current(fingerprint, report.candidates.clone(), cache.default_ttl(), epoch);
        }
        audit.source_outcomes = report.outcomes;
        Gathered {
            candidates: report.candidates,
            audit,
        }
    }

    fn priorities(&self) -> HashMap<String, u32> {
        self.context
            .registry()
            .descriptors()
            .into_iter()
            .map(|d| (d.name, d.priority))
            .collect()
    }

    fn accept_source(
        &self,
        query: &Query,
        candidate: Candidate,
        reason: Reason,
        existing: Option<&ExistingResult>,
        audit: DecisionAudit,
    ) -> Decision {
        let config = self.context.config();
        let score = clamp_score(candidate.ranking_score());

        let reason = match existing {
            None => reason,
            Some(existing) => {
                let verdict = evaluate_upgrade(
                    existing,
                    score,
                    candidate.format,
                    config.scoring.preferred_format,
                    &config.upgrade,
                    subacq_common::time::now(),
                );
                debug!(
                    item_id = %query.item_id,
                    delta = verdict.delta,
                    required_delta = verdict.required_delta,
                    permitted = verdict.permitted,
                    reason = %verdict.reason,
                    "Upgrade evaluated"
                );
                if !verdict.permitted {
                    let mut d = decision(query, Outcome::NoAction, verdict.reason, audit);
                    d.score = score;
                    return d;
                }
                verdict.reason
            }
        };

        let mut d = decision(query, Outcome::AcceptedSource, reason, audit);
        d.score = score;
        d.provenance = Some(Provenance::Source);
        d.candidate = Some(candidate);
        d
    }

    async fn fallback(&self, query: &Query, trigger: Reason, audit: DecisionAudit) -> Decision {
        let config = self.context.config();

        let transcriber = match &self.transcriber {
            Some(t) if config.fallback.transcription_enabled && t.is_available() => t,
            _ => {
                debug!(item_id = %query.item_id, "Transcription disabled or not available");
                return decision(query, Outcome::Failed, Reason::FallbackUnavailable, audit);
            }
        };
        let Some(media_file) = query.file_path.as_deref() else {
            debug!(item_id = %query.item_id, "No media file to transcribe");
            return decision(query, Outcome::Failed, Reason::FallbackUnavailable, audit);
        };

        let permit = match Arc::clone(&self.transcription_slots).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return decision(query, Outcome::Failed, Reason::FallbackUnavailable, audit),
        };
        info!(item_id = %query.item_id, language = %query.language, trigger = %trigger, "Starting transcription");
        let result = transcriber.transcribe(media_file, &query.language).await;
        drop(permit);

        match result {
            Ok(file) => {
                debug!(
                    item_id = %query.item_id,
                    format = ?file.format,
                    bytes = file.content.len(),
                    path = ?file.path,
                    "Transcription produced a file"
                );
                let mut d = decision(query, Outcome::AcceptedFallback, trigger, audit);
                d.provenance = Some(Provenance::Fallback);
                d.transcript = Some(file);
                d
            }
            Err(TranscriptionError::Unavailable(message)) => {
                debug!(item_id = %query.item_id, reason = %message, "Transcriber reported unavailable");
                decision(query, Outcome::Failed, Reason::FallbackUnavailable, audit)
            }
            Err(TranscriptionError::Failed(message)) => {
                warn!(item_id = %query.item_id, error = %message, "Transcription failed");
                decision(query, Outcome::Failed, Reason::FallbackFailed, audit)
            }
        }
    }
}

fn decision(query: &Query, outcome: Outcome, reason: Reason, audit: DecisionAudit) -> Decision {
    Decision {
        item_id: query.item_id.clone(),
        language: query.language.clone(),
        outcome,
        candidate: None,
        reason,
        score: 0,
        provenance: None,
        transcript: None,
        decided_at: subacq_common::time::now(),
        audit,
    }
}
