//! Upgrade-over-existing policy
//!
//! Rules, first match wins:
//!
//! 1. Preferred format → non-preferred format: never.
//! 2. Existing result came from fallback transcription: always.
//! 3. Non-preferred → preferred format with `prefer_preferred_format`: always.
//! 4. `delta >= min_delta`, where `min_delta` doubles while the existing
//!    result is within `recent_window_days`.
//! 5. Otherwise: not warranted.

use crate::types::{ExistingResult, Provenance, Reason, SubtitleFormat};
use chrono::{DateTime, Utc};
use subacq_common::config::UpgradeConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpgradeVerdict {
    pub permitted: bool,
    pub reason: Reason,
    /// New score minus existing score
    pub delta: i64,
    /// Delta that was required by the score rule
    pub required_delta: u32,
}

/// Decide whether a newly selected candidate may replace `existing`
pub fn evaluate_upgrade(
    existing: &ExistingResult,
    new_score: u32,
    new_format: SubtitleFormat,
    preferred_format: SubtitleFormat,
    config: &UpgradeConfig,
    now: DateTime<Utc>,
) -> UpgradeVerdict {
    let delta = i64::from(new_score) - i64::from(existing.score);
    let recent = existing.age_days(now) <= config.recent_window_days;
    let required_delta = if recent {
        config.min_delta.saturating_mul(2)
    } else {
        config.min_delta
    };

    let verdict = |permitted, reason| UpgradeVerdict {
        permitted,
        reason,
        delta,
        required_delta,
    };

    if existing.format == preferred_format && new_format != preferred_format {
        return verdict(false, Reason::FormatDowngradeBlocked);
    }

    if existing.provenance == Provenance::Fallback {
        return verdict(true, Reason::ReplacesFallback);
    }

    if config.prefer_preferred_format
        && existing.format != preferred_format
        && new_format == preferred_format
    {
        return verdict(true, Reason::UpgradeFormat);
    }

    if delta >= i64::from(required_delta) {
        verdict(true, Reason::UpgradeScoreDelta)
    } else {
        verdict(false, Reason::UpgradeNotWarranted)
    }
}
