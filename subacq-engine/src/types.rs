//! Core data model for subtitle acquisition
//!
//! - [`Query`]: what is being searched for (immutable per attempt)
//! - [`Candidate`]: one result returned by one source
//! - [`ExistingResult`]: the currently stored result for item + language
//! - [`Decision`]: the single terminal record of an acquisition attempt

use crate::scoring::ScoreBreakdown;
use crate::sources::SourceOutcome;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

pub use subacq_common::config::SubtitleFormat;

// ============================================================================
// Query
// ============================================================================

/// What kind of media item is being searched for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MediaKind {
    Episode { season: u32, episode: u32 },
    Movie,
}

/// Identifies one media item in one target language
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    /// Stable identifier of the media item (owned by the library manager)
    pub item_id: String,
    /// Series name or movie title
    pub title: String,
    pub kind: MediaKind,
    /// Release year (movie year, or series premiere year)
    pub year: Option<u16>,
    /// Target language code (e.g. "en", "pt-BR")
    pub language: String,
    /// Content hash of the media file, when computed
    pub content_hash: Option<String>,
    /// External identifiers keyed by namespace (e.g. "imdb", "tvdb")
    pub external_ids: BTreeMap<String, String>,
    /// Media file on disk (needed for transcription and release tags)
    pub file_path: Option<PathBuf>,
}

impl Query {
    pub fn episode(
        item_id: impl Into<String>,
        title: impl Into<String>,
        season: u32,
        episode: u32,
        language: impl Into<String>,
    ) -> Self {
        Self {
            item_id: item_id.into(),
            title: title.into(),
            kind: MediaKind::Episode { season, episode },
            year: None,
            language: language.into(),
            content_hash: None,
            external_ids: BTreeMap::new(),
            file_path: None,
        }
    }

    pub fn movie(
        item_id: impl Into<String>,
        title: impl Into<String>,
        year: Option<u16>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            item_id: item_id.into(),
            title: title.into(),
            kind: MediaKind::Movie,
            year,
            language: language.into(),
            content_hash: None,
            external_ids: BTreeMap::new(),
            file_path: None,
        }
    }

    pub fn with_year(mut self, year: u16) -> Self {
        self.year = Some(year);
        self
    }

    pub fn with_content_hash(mut self, hash: impl Into<String>) -> Self {
        self.content_hash = Some(hash.into());
        self
    }

    pub fn with_external_id(mut self, namespace: impl Into<String>, id: impl Into<String>) -> Self {
        self.external_ids.insert(namespace.into(), id.into());
        self
    }

    pub fn with_file_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    pub fn is_episode(&self) -> bool {
        matches!(self.kind, MediaKind::Episode { .. })
    }

    /// File name of the media file, used as the query's release name
    pub fn release_name(&self) -> Option<String> {
        self.file_path
            .as_ref()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
    }
}

// ============================================================================
// Candidate
// ============================================================================

/// One search result from one source
///
/// Candidates live only for the duration of one acquisition attempt
/// (or a cache TTL). `score` is filled in by the scoring engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    /// Source that returned this candidate (overwritten by the manager)
    pub source: String,
    pub language: String,
    pub format: SubtitleFormat,
    /// Provider-assigned identifier / download reference
    pub download_ref: String,
    /// Title as reported by the provider
    pub title: Option<String>,
    pub year: Option<u16>,
    pub season: Option<u32>,
    pub episode: Option<u32>,
    /// Content hash the provider matched on, if any
    pub content_hash: Option<String>,
    /// External identifiers reported by the provider
    #[serde(default)]
    pub external_ids: BTreeMap<String, String>,
    /// Free-text release description (usually a release file name)
    pub release_info: Option<String>,
    /// Provider's automated-translation confidence, 0-100
    pub mt_confidence: Option<u8>,
    /// Ranking score. May be negative during ranking; see [`Decision::score`].
    pub score: Option<i64>,
}

impl Candidate {
    pub fn new(
        source: impl Into<String>,
        download_ref: impl Into<String>,
        language: impl Into<String>,
        format: SubtitleFormat,
    ) -> Self {
        Self {
            source: source.into(),
            language: language.into(),
            format,
            download_ref: download_ref.into(),
            title: None,
            year: None,
            season: None,
            episode: None,
            content_hash: None,
            external_ids: BTreeMap::new(),
            release_info: None,
            mt_confidence: None,
            score: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_year(mut self, year: u16) -> Self {
        self.year = Some(year);
        self
    }

    pub fn with_episode(mut self, season: u32, episode: u32) -> Self {
        self.season = Some(season);
        self.episode = Some(episode);
        self
    }

    pub fn with_content_hash(mut self, hash: impl Into<String>) -> Self {
        self.content_hash = Some(hash.into());
        self
    }

    pub fn with_external_id(mut self, namespace: impl Into<String>, id: impl Into<String>) -> Self {
        self.external_ids.insert(namespace.into(), id.into());
        self
    }

    pub fn with_release_info(mut self, release: impl Into<String>) -> Self {
        self.release_info = Some(release.into());
        self
    }

    pub fn with_mt_confidence(mut self, confidence: u8) -> Self {
        self.mt_confidence = Some(confidence);
        self
    }

    /// Ranking score, 0 when not yet scored
    pub fn ranking_score(&self) -> i64 {
        self.score.unwrap_or(0)
    }
}

/// A downloaded or transcribed subtitle file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtitleFile {
    pub format: SubtitleFormat,
    pub content: Vec<u8>,
    /// Where the collaborator wrote the file, if it did
    pub path: Option<PathBuf>,
}

// ============================================================================
// Existing result
// ============================================================================

/// Where a stored result came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Source,
    Fallback,
}

/// Currently stored result for an item + language
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExistingResult {
    pub language: String,
    pub score: u32,
    pub format: SubtitleFormat,
    pub provenance: Provenance,
    /// Source name, or "fallback"
    pub origin: String,
    pub stored_at: DateTime<Utc>,
}

impl ExistingResult {
    pub fn age_days(&self, now: DateTime<Utc>) -> u32 {
        subacq_common::time::age_in_days(self.stored_at, now)
    }
}

// ============================================================================
// Decision
// ============================================================================

/// Terminal outcome of one acquisition attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    AcceptedSource,
    AcceptedFallback,
    NoAction,
    Failed,
}

/// Why a decision was reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    ThresholdSatisfied,
    ThresholdDisabled,
    ScoreBelowThreshold,
    NoCandidates,
    FallbackUnavailable,
    FallbackFailed,
    ExistingSufficient,
    ExistingRetained,
    UpgradeScoreDelta,
    UpgradeFormat,
    ReplacesFallback,
    UpgradeNotWarranted,
    FormatDowngradeBlocked,
}

impl Reason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reason::ThresholdSatisfied => "threshold satisfied",
            Reason::ThresholdDisabled => "threshold disabled",
            Reason::ScoreBelowThreshold => "score below threshold",
            Reason::NoCandidates => "no candidates",
            Reason::FallbackUnavailable => "fallback unavailable",
            Reason::FallbackFailed => "fallback failed",
            Reason::ExistingSufficient => "existing result sufficient",
            Reason::ExistingRetained => "existing result retained",
            Reason::UpgradeScoreDelta => "upgrade: score delta",
            Reason::UpgradeFormat => "upgrade: preferred format",
            Reason::ReplacesFallback => "upgrade: replaces fallback",
            Reason::UpgradeNotWarranted => "upgrade not warranted",
            Reason::FormatDowngradeBlocked => "format downgrade blocked",
        }
    }
}

impl std::fmt::Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Supporting detail for a decision
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionAudit {
    /// Candidates were served from the result cache
    pub from_cache: bool,
    /// Number of candidates that were scored
    pub candidates_considered: usize,
    /// Per-source call results (empty on cache hits)
    pub source_outcomes: Vec<SourceOutcome>,
    /// Score breakdown of the best candidate, when one was scored
    pub best_breakdown: Option<ScoreBreakdown>,
    /// Source and raw score of the second-ranked candidate
    pub runner_up: Option<(String, i64)>,
    /// Score of the existing result the candidate was compared against
    pub existing_score: Option<u32>,
    /// The existing-result lookup failed and the attempt ran as if none existed
    pub existing_lookup_failed: bool,
}

/// The single output record of an acquisition attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub item_id: String,
    pub language: String,
    pub outcome: Outcome,
    /// The chosen candidate (ACCEPTED_SOURCE only)
    pub candidate: Option<Candidate>,
    pub reason: Reason,
    /// Score that drove the decision, clamped to zero
    pub score: u32,
    /// Provenance of the accepted result, if one was accepted
    pub provenance: Option<Provenance>,
    /// Transcribed file (ACCEPTED_FALLBACK only)
    pub transcript: Option<SubtitleFile>,
    pub decided_at: DateTime<Utc>,
    pub audit: DecisionAudit,
}

impl Decision {
    /// Persisted origin label: source name, "fallback", or none
    pub fn origin(&self) -> Option<&str> {
        match self.outcome {
            Outcome::AcceptedSource => self.candidate.as_ref().map(|c| c.source.as_str()),
            Outcome::AcceptedFallback => Some("fallback"),
            Outcome::NoAction | Outcome::Failed => None,
        }
    }
}

/// Clamp a raw ranking score to the externally visible range
pub fn clamp_score(raw: i64) -> u32 {
    u32::try_from(raw.max(0)).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_score() {
        assert_eq!(clamp_score(-40), 0);
        assert_eq!(clamp_score(0), 0);
        assert_eq!(clamp_score(359), 359);
    }

    #[test]
    fn test_release_name_from_path() {
        let query = Query::episode("i1", "Show", 1, 2, "en")
            .with_file_path("/tv/Show/Show.S01E02.720p.WEB-DL-GRP.mkv");
        assert_eq!(
            query.release_name().as_deref(),
            Some("Show.S01E02.720p.WEB-DL-GRP.mkv")
        );
    }

    #[test]
    fn test_reason_strings() {
        assert_eq!(Reason::ScoreBelowThreshold.to_string(), "score below threshold");
        assert_eq!(Reason::FallbackUnavailable.as_str(), "fallback unavailable");
    }

    #[test]
    fn test_outcome_serializes_upper_snake() {
        let json = serde_json::to_string(&Outcome::AcceptedFallback).unwrap();
        assert_eq!(json, "\"ACCEPTED_FALLBACK\"");
    }
}
