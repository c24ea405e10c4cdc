//! Configuration loading, validation and path resolution
//!
//! The engine is configured from a single TOML file. Every field has a
//! built-in default, so a missing or empty file yields a usable (if
//! source-less) configuration.
//!
//! # Config file priority
//!
//! 1. Explicit path passed by the caller (highest priority)
//! 2. `SUBACQ_CONFIG` environment variable
//! 3. `<user config dir>/subacq/config.toml`
//! 4. Built-in defaults (fallback)
//!
//! Validation runs at load time. A configuration that fails validation is
//! rejected before any acquisition attempt starts.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "SUBACQ_CONFIG";

/// Largest magnitude accepted for a per-source score modifier
pub const MAX_SOURCE_MODIFIER: i32 = 100;

/// Upper bound on `timeouts.multiplier`
pub const MAX_TIMEOUT_MULTIPLIER: f64 = 100.0;

/// Subtitle format tag
///
/// `Styled` covers formats carrying positioning/typeface information
/// (ASS/SSA); `Plain` covers bare timed text (SRT, VTT).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubtitleFormat {
    Styled,
    Plain,
}

impl SubtitleFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubtitleFormat::Styled => "styled",
            SubtitleFormat::Plain => "plain",
        }
    }
}

impl std::fmt::Display for SubtitleFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Result cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Dynamic per-source timeout parameters
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Circuit breaker parameters
    #[serde(default)]
    pub circuit: CircuitConfig,

    /// Scoring weight table
    #[serde(default)]
    pub scoring: ScoringConfig,

    /// Fallback (speech-to-text) policy
    #[serde(default)]
    pub fallback: FallbackConfig,

    /// Upgrade-over-existing policy
    #[serde(default)]
    pub upgrade: UpgradeConfig,

    /// Configured sources, in no particular order (priority decides)
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (trace, debug, info, warn, error, or a full directive)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Result cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Time-to-live for cached candidate lists. 0 disables caching.
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl_secs(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn is_enabled(&self) -> bool {
        self.ttl_secs > 0
    }
}

fn default_cache_ttl_secs() -> u64 {
    900
}

/// Dynamic timeout parameters
///
/// Until `min_samples` response times are recorded for a source, calls use
/// `default_ms`. After that the timeout is
/// `clamp(avg(response_times) * multiplier, min_ms, max_ms)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_timeout_ms")]
    pub default_ms: u64,

    #[serde(default = "default_timeout_multiplier")]
    pub multiplier: f64,

    #[serde(default = "default_min_timeout_ms")]
    pub min_ms: u64,

    #[serde(default = "default_max_timeout_ms")]
    pub max_ms: u64,

    #[serde(default = "default_min_samples")]
    pub min_samples: usize,

    /// Size of the rolling response-time window per source
    #[serde(default = "default_window_size")]
    pub window_size: usize,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            default_ms: default_timeout_ms(),
            multiplier: default_timeout_multiplier(),
            min_ms: default_min_timeout_ms(),
            max_ms: default_max_timeout_ms(),
            min_samples: default_min_samples(),
            window_size: default_window_size(),
        }
    }
}

impl TimeoutConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_ms)
    }

    pub fn min_timeout(&self) -> Duration {
        Duration::from_millis(self.min_ms)
    }

    pub fn max_timeout(&self) -> Duration {
        Duration::from_millis(self.max_ms)
    }
}

fn default_timeout_ms() -> u64 {
    15_000
}
fn default_timeout_multiplier() -> f64 {
    3.0
}
fn default_min_timeout_ms() -> u64 {
    2_000
}
fn default_max_timeout_ms() -> u64 {
    30_000
}
fn default_min_samples() -> usize {
    3
}
fn default_window_size() -> usize {
    20
}

/// Circuit breaker parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitConfig {
    /// Consecutive failures that trip the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// How long a tripped circuit stays open
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

impl CircuitConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

fn default_failure_threshold() -> u32 {
    5
}
fn default_cooldown_secs() -> u64 {
    60
}

/// Scoring weight table
///
/// Each predicate contributes its weight when true. The strong-identifier
/// weight must be the highest predicate weight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default = "default_strong_id_weight")]
    pub strong_id: u32,
    #[serde(default = "default_title_weight")]
    pub title: u32,
    #[serde(default = "default_year_weight")]
    pub year: u32,
    #[serde(default = "default_season_weight")]
    pub season: u32,
    #[serde(default = "default_episode_weight")]
    pub episode: u32,
    #[serde(default = "default_release_group_weight")]
    pub release_group: u32,
    #[serde(default = "default_source_tag_weight")]
    pub source_tag: u32,
    #[serde(default = "default_resolution_weight")]
    pub resolution: u32,

    /// Bonus for candidates in the preferred format
    #[serde(default = "default_format_bonus")]
    pub format_bonus: u32,

    #[serde(default = "default_preferred_format")]
    pub preferred_format: SubtitleFormat,

    /// Penalty subtracted when automated-translation confidence exceeds
    /// `mt_threshold`. 0 disables the check.
    #[serde(default)]
    pub mt_penalty: u32,

    /// Automated-translation confidence threshold (0-100). 0 disables the check.
    #[serde(default)]
    pub mt_threshold: u8,

    /// Signed per-source adjustments, keyed by source name
    #[serde(default)]
    pub source_modifiers: BTreeMap<String, i32>,

    /// Minimum Jaro-Winkler similarity of normalised titles for the title
    /// predicate, in (0, 1]
    #[serde(default = "default_title_similarity")]
    pub title_similarity: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            strong_id: default_strong_id_weight(),
            title: default_title_weight(),
            year: default_year_weight(),
            season: default_season_weight(),
            episode: default_episode_weight(),
            release_group: default_release_group_weight(),
            source_tag: default_source_tag_weight(),
            resolution: default_resolution_weight(),
            format_bonus: default_format_bonus(),
            preferred_format: default_preferred_format(),
            mt_penalty: 0,
            mt_threshold: 0,
            source_modifiers: BTreeMap::new(),
            title_similarity: default_title_similarity(),
        }
    }
}

impl ScoringConfig {
    /// Predicate weights by name, used for validation and diagnostics
    pub fn predicate_weights(&self) -> [(&'static str, u32); 8] {
        [
            ("strong_id", self.strong_id),
            ("title", self.title),
            ("year", self.year),
            ("season", self.season),
            ("episode", self.episode),
            ("release_group", self.release_group),
            ("source_tag", self.source_tag),
            ("resolution", self.resolution),
        ]
    }

    pub fn source_modifier(&self, source: &str) -> i32 {
        self.source_modifiers.get(source).copied().unwrap_or(0)
    }

    pub fn mt_check_enabled(&self) -> bool {
        self.mt_penalty > 0 && self.mt_threshold > 0
    }
}

fn default_strong_id_weight() -> u32 {
    359
}
fn default_title_weight() -> u32 {
    180
}
fn default_year_weight() -> u32 {
    90
}
fn default_season_weight() -> u32 {
    30
}
fn default_episode_weight() -> u32 {
    30
}
fn default_release_group_weight() -> u32 {
    15
}
fn default_source_tag_weight() -> u32 {
    7
}
fn default_resolution_weight() -> u32 {
    2
}
fn default_title_similarity() -> f64 {
    0.85
}
fn default_format_bonus() -> u32 {
    50
}
fn default_preferred_format() -> SubtitleFormat {
    SubtitleFormat::Styled
}

/// Fallback (speech-to-text) policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackConfig {
    /// Source candidates scoring below this trigger fallback. 0 disables.
    #[serde(default)]
    pub min_score: u32,

    #[serde(default)]
    pub transcription_enabled: bool,

    /// Global cap on concurrently running transcriptions
    #[serde(default = "default_max_concurrent_transcriptions")]
    pub max_concurrent_transcriptions: usize,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            min_score: 0,
            transcription_enabled: false,
            max_concurrent_transcriptions: default_max_concurrent_transcriptions(),
        }
    }
}

fn default_max_concurrent_transcriptions() -> usize {
    1
}

/// Upgrade-over-existing policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpgradeConfig {
    /// Minimum score improvement required to replace an existing result
    #[serde(default = "default_min_delta")]
    pub min_delta: u32,

    /// Results younger than this (in days) need twice the delta
    #[serde(default = "default_recent_window_days")]
    pub recent_window_days: u32,

    /// Always allow non-preferred → preferred format upgrades
    #[serde(default = "default_true")]
    pub prefer_preferred_format: bool,
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        Self {
            min_delta: default_min_delta(),
            recent_window_days: default_recent_window_days(),
            prefer_preferred_format: true,
        }
    }
}

fn default_min_delta() -> u32 {
    10
}
fn default_recent_window_days() -> u32 {
    7
}
fn default_true() -> bool {
    true
}

/// One configured source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,

    /// Lower value = higher priority
    #[serde(default = "default_priority")]
    pub priority: u32,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Optional request quota for this source
    #[serde(default)]
    pub rate_limit_per_minute: Option<u32>,

    /// Opaque source-specific settings (credentials, endpoints)
    #[serde(default)]
    pub settings: toml::Table,
}

impl SourceConfig {
    pub fn new(name: impl Into<String>, priority: u32) -> Self {
        Self {
            name: name.into(),
            priority,
            enabled: true,
            rate_limit_per_minute: None,
            settings: toml::Table::new(),
        }
    }
}

fn default_priority() -> u32 {
    100
}

impl EngineConfig {
    /// Reject configurations the engine cannot run with
    ///
    /// Called by [`load_config`]; callers building a config in code should
    /// call it before handing the config to the engine.
    pub fn validate(&self) -> Result<()> {
        let t = &self.timeouts;
        if !t.multiplier.is_finite() || t.multiplier <= 0.0 || t.multiplier > MAX_TIMEOUT_MULTIPLIER
        {
            return Err(Error::Config(format!(
                "timeouts.multiplier must be in (0, {}], got {}",
                MAX_TIMEOUT_MULTIPLIER, t.multiplier
            )));
        }
        if t.min_ms > t.max_ms {
            return Err(Error::Config(format!(
                "timeouts.min_ms ({}) must not exceed timeouts.max_ms ({})",
                t.min_ms, t.max_ms
            )));
        }
        if t.default_ms == 0 {
            return Err(Error::Config("timeouts.default_ms must be > 0".to_string()));
        }
        if t.window_size == 0 {
            return Err(Error::Config("timeouts.window_size must be > 0".to_string()));
        }
        if t.min_samples > t.window_size {
            return Err(Error::Config(format!(
                "timeouts.min_samples ({}) cannot exceed timeouts.window_size ({})",
                t.min_samples, t.window_size
            )));
        }

        if self.circuit.failure_threshold == 0 {
            return Err(Error::Config(
                "circuit.failure_threshold must be >= 1".to_string(),
            ));
        }

        let s = &self.scoring;
        for (name, weight) in s.predicate_weights().iter().skip(1) {
            if *weight > s.strong_id {
                return Err(Error::Config(format!(
                    "scoring.strong_id ({}) must be the highest predicate weight, but scoring.{} is {}",
                    s.strong_id, name, weight
                )));
            }
        }
        if !(s.title_similarity > 0.0 && s.title_similarity <= 1.0) {
            return Err(Error::Config(format!(
                "scoring.title_similarity must be in (0, 1], got {}",
                s.title_similarity
            )));
        }
        if s.mt_threshold > 100 {
            return Err(Error::Config(format!(
                "scoring.mt_threshold must be in 0..=100, got {}",
                s.mt_threshold
            )));
        }
        for (source, modifier) in &s.source_modifiers {
            if modifier.abs() > MAX_SOURCE_MODIFIER {
                return Err(Error::Config(format!(
                    "scoring.source_modifiers.{} must be in -{}..={}, got {}",
                    source, MAX_SOURCE_MODIFIER, MAX_SOURCE_MODIFIER, modifier
                )));
            }
        }

        if self.fallback.transcription_enabled && self.fallback.max_concurrent_transcriptions == 0
        {
            return Err(Error::Config(
                "fallback.max_concurrent_transcriptions must be >= 1 when transcription is enabled"
                    .to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for source in &self.sources {
            if source.name.trim().is_empty() {
                return Err(Error::Config("sources[].name must not be empty".to_string()));
            }
            if !seen.insert(source.name.as_str()) {
                return Err(Error::Config(format!(
                    "duplicate source name: {}",
                    source.name
                )));
            }
            if source.rate_limit_per_minute == Some(0) {
                return Err(Error::Config(format!(
                    "sources.{}.rate_limit_per_minute must be >= 1 when set",
                    source.name
                )));
            }
        }

        for source in s.source_modifiers.keys() {
            if !seen.contains(source.as_str()) {
                warn!("scoring.source_modifiers references unknown source '{}'", source);
            }
        }

        Ok(())
    }
}

/// Parse and validate a configuration from TOML text
pub fn parse_config(content: &str) -> Result<EngineConfig> {
    let config: EngineConfig = toml::from_str(content)?;
    config.validate()?;
    Ok(config)
}

/// Load and validate a configuration file
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    let config = parse_config(&content)?;
    info!(
        "Loaded configuration from {} ({} sources)",
        path.display(),
        config.sources.len()
    );
    Ok(config)
}

/// Resolve the config file location
///
/// Returns `None` when no explicit path is given, the environment variable
/// is unset, and no file exists at the per-user default location.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: explicit path
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    // Priority 2: environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: per-user config directory
    default_config_path().filter(|path| path.exists())
}

/// Per-user default config file location
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("subacq").join("config.toml"))
}

/// Load configuration following the priority order
///
/// A missing default-location file is not an error: built-in defaults are
/// used with a warning. A path that was named explicitly (argument or
/// environment) must exist and parse.
pub fn load_config_or_default(explicit: Option<&Path>) -> Result<EngineConfig> {
    match resolve_config_path(explicit) {
        Some(path) => load_config(&path),
        None => {
            warn!("No configuration file found, using built-in defaults");
            let config = EngineConfig::default();
            config.validate()?;
            Ok(config)
        }
    }
}

/// Write configuration atomically (temp file + rename)
pub fn write_config(config: &EngineConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scoring.strong_id, 359);
        assert_eq!(config.circuit.failure_threshold, 5);
        assert_eq!(config.circuit.cooldown(), Duration::from_secs(60));
        assert_eq!(config.fallback.min_score, 0);
        assert!(!config.fallback.transcription_enabled);
    }

    #[test]
    fn test_empty_document_parses_to_defaults() {
        let config = parse_config("").unwrap();
        assert!(config.sources.is_empty());
        assert_eq!(config.cache.ttl_secs, 900);
        assert_eq!(config.scoring.preferred_format, SubtitleFormat::Styled);
    }

    #[test]
    fn test_zero_failure_threshold_rejected() {
        let err = parse_config("[circuit]\nfailure_threshold = 0\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_strong_id_must_dominate() {
        let err = parse_config("[scoring]\nstrong_id = 100\ntitle = 180\n").unwrap_err();
        assert!(err.to_string().contains("strong_id"));
    }

    #[test]
    fn test_negative_threshold_is_a_parse_error() {
        let err = parse_config("[fallback]\nmin_score = -5\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_source_modifier_range() {
        let ok = parse_config(
            "[[sources]]\nname = \"a\"\n[scoring.source_modifiers]\na = -100\n",
        );
        assert!(ok.is_ok());

        let err = parse_config(
            "[[sources]]\nname = \"a\"\n[scoring.source_modifiers]\na = 101\n",
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_duplicate_sources_rejected() {
        let toml = "[[sources]]\nname = \"a\"\n[[sources]]\nname = \"a\"\n";
        let err = parse_config(toml).unwrap_err();
        assert!(err.to_string().contains("duplicate source name"));
    }

    #[test]
    fn test_min_timeout_above_max_rejected() {
        let err = parse_config("[timeouts]\nmin_ms = 5000\nmax_ms = 1000\n").unwrap_err();
        assert!(err.to_string().contains("min_ms"));
    }

    #[test]
    fn test_min_samples_bounded_by_window() {
        let err = parse_config("[timeouts]\nmin_samples = 30\nwindow_size = 10\n").unwrap_err();
        assert!(err.to_string().contains("min_samples"));
    }

    #[test]
    fn test_timeout_multiplier_bounds() {
        assert!(parse_config("[timeouts]\nmultiplier = 100.0\n").is_ok());

        let err = parse_config("[timeouts]\nmultiplier = 1e20\nmin_samples = 1\n").unwrap_err();
        assert!(err.to_string().contains("timeouts.multiplier"));

        assert!(parse_config("[timeouts]\nmultiplier = 0.0\n").is_err());
        assert!(parse_config("[timeouts]\nmultiplier = nan\n").is_err());
    }

    #[test]
    fn test_title_similarity_bounds() {
        assert!(parse_config("[scoring]\ntitle_similarity = 1.0\n").is_ok());
        assert!(parse_config("[scoring]\ntitle_similarity = 0.0\n").is_err());
        let err = parse_config("[scoring]\ntitle_similarity = 1.5\n").unwrap_err();
        assert!(err.to_string().contains("title_similarity"));
    }

    #[test]
    fn test_transcription_needs_capacity() {
        let toml = "[fallback]\ntranscription_enabled = true\nmax_concurrent_transcriptions = 0\n";
        assert!(parse_config(toml).is_err());
    }

    #[test]
    fn test_source_settings_are_opaque() {
        let toml = r#"
[[sources]]
name = "opensubs"
priority = 1
rate_limit_per_minute = 40

[sources.settings]
api_key = "secret"
endpoint = "https://example.invalid"
"#;
        let config = parse_config(toml).unwrap();
        let source = &config.sources[0];
        assert_eq!(source.priority, 1);
        assert!(source.enabled);
        assert_eq!(source.rate_limit_per_minute, Some(40));
        assert_eq!(
            source.settings.get("api_key").and_then(|v| v.as_str()),
            Some("secret")
        );
    }
}
