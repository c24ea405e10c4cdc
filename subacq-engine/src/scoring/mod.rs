//! Scoring engine
//!
//! A candidate's score is the sum of independently evaluated boolean
//! predicates, each contributing its configured weight when true, plus
//! three adjustments:
//!
//! | Component        | When                                                   |
//! |------------------|--------------------------------------------------------|
//! | `strong_id`      | content hash or any shared external id matches         |
//! | `title`          | normalised titles similar (Jaro-Winkler)               |
//! | `year`           | release years equal                                    |
//! | `season`         | season numbers equal (episodes only)                   |
//! | `episode`        | episode numbers equal (episodes only)                  |
//! | `release_group`  | release groups equal                                   |
//! | `source_tag`     | source/quality tags equal                              |
//! | `resolution`     | resolution tags equal                                  |
//! | `format_bonus`   | candidate is in the preferred format (+)               |
//! | `source_modifier`| configured per-source adjustment (±)                   |
//! | `mt_penalty`     | translation confidence above threshold (−)             |
//!
//! Scoring is pure: the same candidate, query and weights always give the
//! same score. Raw scores may be negative; clamping happens only where a
//! score leaves the engine (see [`crate::types::clamp_score`]).

pub mod release;

pub use release::{QualitySource, ReleaseTags};

use crate::types::{Candidate, MediaKind, Query};
use serde::{Deserialize, Serialize};
use subacq_common::config::ScoringConfig;

/// One contribution to a candidate's score
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreComponent {
    pub name: String,
    pub points: i64,
}

/// Every matched predicate and adjustment for one candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub components: Vec<ScoreComponent>,
    pub total: i64,
}

impl ScoreBreakdown {
    fn new() -> Self {
        Self {
            components: Vec::new(),
            total: 0,
        }
    }

    fn add(&mut self, name: &str, points: i64) {
        if points == 0 {
            return;
        }
        self.components.push(ScoreComponent {
            name: name.to_string(),
            points,
        });
        self.total += points;
    }

    pub fn contains(&self, name: &str) -> bool {
        self.components.iter().any(|c| c.name == name)
    }
}

/// Score a candidate, listing each contribution
pub fn explain(candidate: &Candidate, query: &Query, weights: &ScoringConfig) -> ScoreBreakdown {
    let mut breakdown = ScoreBreakdown::new();

    if strong_id_matches(candidate, query) {
        breakdown.add("strong_id", weights.strong_id.into());
    }

    if let Some(title) = &candidate.title {
        if title_similarity(title, &query.title) >= weights.title_similarity {
            breakdown.add("title", weights.title.into());
        }
    }

    if query.year.is_some() && candidate.year == query.year {
        breakdown.add("year", weights.year.into());
    }

    if let MediaKind::Episode { season, episode } = query.kind {
        if candidate.season == Some(season) {
            breakdown.add("season", weights.season.into());
        }
        if candidate.episode == Some(episode) {
            breakdown.add("episode", weights.episode.into());
        }
    }

    let wanted = query
        .release_name()
        .map(|name| ReleaseTags::parse(&name))
        .unwrap_or_default();
    let offered = candidate
        .release_info
        .as_deref()
        .map(ReleaseTags::parse)
        .unwrap_or_default();

    if wanted.group.is_some() && wanted.group == offered.group {
        breakdown.add("release_group", weights.release_group.into());
    }
    if wanted.source.is_some() && wanted.source == offered.source {
        breakdown.add("source_tag", weights.source_tag.into());
    }
    if wanted.resolution.is_some() && wanted.resolution == offered.resolution {
        breakdown.add("resolution", weights.resolution.into());
    }

    if candidate.format == weights.preferred_format {
        breakdown.add("format_bonus", weights.format_bonus.into());
    }

    breakdown.add(
        "source_modifier",
        weights.source_modifier(&candidate.source).into(),
    );

    if weights.mt_check_enabled() {
        if let Some(confidence) = candidate.mt_confidence {
            if confidence > weights.mt_threshold {
                breakdown.add("mt_penalty", -i64::from(weights.mt_penalty));
            }
        }
    }

    breakdown
}

/// Integer match score for a candidate
pub fn score(candidate: &Candidate, query: &Query, weights: &ScoringConfig) -> i64 {
    explain(candidate, query, weights).total
}

/// Fill in `score` for every candidate
pub fn score_all(candidates: &mut [Candidate], query: &Query, weights: &ScoringConfig) {
    for candidate in candidates.iter_mut() {
        candidate.score = Some(score(candidate, query, weights));
    }
}

fn strong_id_matches(candidate: &Candidate, query: &Query) -> bool {
    if let (Some(ours), Some(theirs)) = (&query.content_hash, &candidate.content_hash) {
        if !ours.is_empty() && ours.trim().eq_ignore_ascii_case(theirs.trim()) {
            return true;
        }
    }

    query.external_ids.iter().any(|(namespace, id)| {
        candidate
            .external_ids
            .get(namespace)
            .is_some_and(|other| !id.is_empty() && other.trim().eq_ignore_ascii_case(id.trim()))
    })
}

/// Lower-case, drop punctuation, collapse whitespace
pub fn normalize_title(title: &str) -> String {
    title
        .replace('&', " and ")
        .chars()
        .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Jaro-Winkler similarity of two titles after normalisation, in [0, 1]
///
/// An empty title never matches anything.
pub fn title_similarity(a: &str, b: &str) -> f64 {
    let a = normalize_title(a);
    let b = normalize_title(b);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    strsim::jaro_winkler(&a, &b)
}
