//! Candidate selection and the fallback trigger
//!
//! Ranking order, applied with a stable sort so input order is the final
//! tie-breaker:
//!
//! 1. Higher score
//! 2. Preferred format
//! 3. Higher-priority source (lower rank value)
//! 4. Discovery order

use crate::types::{Candidate, ExistingResult, Provenance, Reason, SubtitleFormat};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::HashMap;
use subacq_common::config::FallbackConfig;

/// Why an acquisition attempt was started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    /// Only acquire when nothing adequate is stored (library scan)
    MissingOnly,
    /// Search even when a result is stored, to look for an upgrade
    UpgradeCheck,
}

/// Outcome of the threshold check on the best candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionVerdict {
    Accept { candidate: Candidate, reason: Reason },
    Fallback { reason: Reason },
}

/// Sort candidates best-first
///
/// `priorities` maps source name to priority rank; unknown sources rank
/// last. Candidates are expected to carry a score already.
pub fn rank_candidates(
    mut candidates: Vec<Candidate>,
    priorities: &HashMap<String, u32>,
    preferred_format: SubtitleFormat,
) -> Vec<Candidate> {
    candidates.sort_by_key(|c| {
        (
            Reverse(c.ranking_score()),
            c.format != preferred_format,
            priorities.get(&c.source).copied().unwrap_or(u32::MAX),
        )
    });
    candidates
}

/// Highest-ranked candidate, if any
pub fn select_best(
    candidates: Vec<Candidate>,
    priorities: &HashMap<String, u32>,
    preferred_format: SubtitleFormat,
) -> Option<Candidate> {
    rank_candidates(candidates, priorities, preferred_format)
        .into_iter()
        .next()
}

/// Apply the fallback threshold to the selected candidate
///
/// With `min_score == 0` the threshold is disabled and fallback happens
/// only when there is no candidate at all.
pub fn evaluate_selection(best: Option<Candidate>, fallback: &FallbackConfig) -> SelectionVerdict {
    let Some(candidate) = best else {
        return SelectionVerdict::Fallback {
            reason: Reason::NoCandidates,
        };
    };

    if fallback.min_score == 0 {
        return SelectionVerdict::Accept {
            candidate,
            reason: Reason::ThresholdDisabled,
        };
    }

    if candidate.ranking_score() >= i64::from(fallback.min_score) {
        SelectionVerdict::Accept {
            candidate,
            reason: Reason::ThresholdSatisfied,
        }
    } else {
        SelectionVerdict::Fallback {
            reason: Reason::ScoreBelowThreshold,
        }
    }
}

/// Whether a stored result makes searching unnecessary
///
/// Only a source-provided result in the right language that meets the
/// threshold qualifies, and only for [`SearchMode::MissingOnly`]. A
/// fallback result never does: it stays eligible for replacement by a
/// genuine source match.
pub fn existing_is_sufficient(
    existing: Option<&ExistingResult>,
    language: &str,
    mode: SearchMode,
    fallback: &FallbackConfig,
) -> bool {
    let Some(existing) = existing else {
        return false;
    };
    mode == SearchMode::MissingOnly
        && existing.provenance == Provenance::Source
        && existing.language.eq_ignore_ascii_case(language)
        && (fallback.min_score == 0 || existing.score >= fallback.min_score)
}
