//! Subtitle sources
//!
//! Each source is an independent implementation of [`SubtitleSource`]
//! registered by name in a [`SourceRegistry`]. The registry is built once
//! at startup from configuration; only the enabled flag and priority of a
//! registered source can change afterwards (configuration reload).
//!
//! Source calls return structured [`SourceError`] values. The
//! [`SourceManager`] converts every error into a health-tracker report and
//! an empty contribution, so no source failure crosses its boundary.

pub mod manager;

pub use manager::{SearchReport, SourceManager};

use crate::health::FailureKind;
use crate::types::{Candidate, Query, SubtitleFile};
use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use subacq_common::config::SourceConfig;
use subacq_common::{Error, Result};
use thiserror::Error as ThisError;
use tracing::{debug, info};

// ============================================================================
// Errors and outcomes
// ============================================================================

/// Failure of a single source call
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum SourceError {
    #[error("network error: {0}")]
    Network(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    /// The source cannot serve this kind of query (not a health failure)
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// The call was never made: unknown source, open circuit or exhausted quota
    #[error("source unavailable: {0}")]
    Unavailable(String),

    #[error("{0}")]
    Other(String),
}

impl SourceError {
    /// Health-tracker classification, `None` when the call does not count
    /// against the source
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            SourceError::Network(_) | SourceError::Other(_) => Some(FailureKind::Transient),
            SourceError::Timeout(_) => Some(FailureKind::Timeout),
            SourceError::Auth(_) => Some(FailureKind::Auth),
            SourceError::Malformed(_) => Some(FailureKind::Malformed),
            SourceError::Unsupported(_) | SourceError::Unavailable(_) => None,
        }
    }
}

/// What happened to one source during one search
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SourceStatus {
    Succeeded { candidates: usize },
    Failed { kind: FailureKind, message: String },
    TimedOut,
    Unsupported,
    /// Circuit open (or half-open probe already in flight)
    Skipped,
    /// Over its configured request quota
    RateLimited,
}

/// Per-source entry of a search audit trail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceOutcome {
    pub source: String,
    pub status: SourceStatus,
    pub elapsed_ms: u64,
}

impl SourceOutcome {
    pub fn new(source: impl Into<String>, status: SourceStatus, elapsed: Duration) -> Self {
        Self {
            source: source.into(),
            status,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    /// The source was actually called and answered
    pub fn responded(&self) -> bool {
        matches!(
            self.status,
            SourceStatus::Succeeded { .. } | SourceStatus::Unsupported
        )
    }
}

// ============================================================================
// Source capability interface
// ============================================================================

/// A subtitle provider
///
/// Implementations perform their own network I/O. They must be cheap to
/// call concurrently: the manager may run one search per acquisition
/// attempt against the same source at the same time.
#[async_trait]
pub trait SubtitleSource: Send + Sync {
    /// Registry name; must match the configured source name
    fn name(&self) -> &str;

    /// Search for subtitles matching `query`
    async fn search(&self, query: &Query) -> std::result::Result<Vec<Candidate>, SourceError>;

    /// Fetch the subtitle file for a candidate this source returned
    async fn download(&self, candidate: &Candidate) -> std::result::Result<SubtitleFile, SourceError>;

    /// Lightweight liveness/credential check
    async fn health_check(&self) -> std::result::Result<(), SourceError> {
        Ok(())
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Configured identity of a source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub name: String,
    /// Lower value = higher priority
    pub priority: u32,
    pub enabled: bool,
    pub rate_limit_per_minute: Option<u32>,
    /// Source-specific settings, passed through untouched
    #[serde(default)]
    pub settings: toml::Table,
}

impl From<&SourceConfig> for SourceDescriptor {
    fn from(config: &SourceConfig) -> Self {
        Self {
            name: config.name.clone(),
            priority: config.priority,
            enabled: config.enabled,
            rate_limit_per_minute: config.rate_limit_per_minute,
            settings: config.settings.clone(),
        }
    }
}

/// A registered source with its descriptor snapshot and rate limiter
#[derive(Clone)]
pub struct ActiveSource {
    pub descriptor: SourceDescriptor,
    pub source: Arc<dyn SubtitleSource>,
    pub limiter: Option<Arc<DefaultDirectRateLimiter>>,
}

impl ActiveSource {
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// Consume one unit of quota; `false` when over the limit
    pub fn try_acquire_quota(&self) -> bool {
        self.limiter
            .as_ref()
            .map_or(true, |limiter| limiter.check().is_ok())
    }
}

/// Lookup table of sources keyed by name
pub struct SourceRegistry {
    sources: HashMap<String, Arc<dyn SubtitleSource>>,
    limiters: HashMap<String, Arc<DefaultDirectRateLimiter>>,
    descriptors: RwLock<HashMap<String, SourceDescriptor>>,
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("descriptors", &self.descriptors())
            .finish()
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self {
            sources: HashMap::new(),
            limiters: HashMap::new(),
            descriptors: RwLock::new(HashMap::new()),
        }
    }

    /// Build a registry pairing configured sources with implementations
    ///
    /// Every configured source needs an implementation and every
    /// implementation needs a configuration entry.
    pub fn from_config(
        configs: &[SourceConfig],
        implementations: Vec<Arc<dyn SubtitleSource>>,
    ) -> Result<Self> {
        let mut by_name: HashMap<String, Arc<dyn SubtitleSource>> = HashMap::new();
        for source in implementations {
            let name = source.name().to_string();
            if by_name.insert(name.clone(), source).is_some() {
                return Err(Error::Config(format!(
                    "source implementation '{}' provided twice",
                    name
                )));
            }
        }

        let mut registry = Self::new();
        for config in configs {
            let source = by_name.remove(&config.name).ok_or_else(|| {
                Error::Config(format!(
                    "source '{}' is configured but has no implementation",
                    config.name
                ))
            })?;
            registry.register(SourceDescriptor::from(config), source)?;
        }

        if let Some(name) = by_name.keys().next() {
            return Err(Error::Config(format!(
                "source implementation '{}' has no configuration entry",
                name
            )));
        }

        info!(sources = registry.len(), "Source registry built");
        Ok(registry)
    }

    /// Add one source
    pub fn register(
        &mut self,
        descriptor: SourceDescriptor,
        source: Arc<dyn SubtitleSource>,
    ) -> Result<()> {
        if descriptor.name != source.name() {
            return Err(Error::Config(format!(
                "descriptor '{}' does not match implementation '{}'",
                descriptor.name,
                source.name()
            )));
        }
        if self.sources.contains_key(&descriptor.name) {
            return Err(Error::Config(format!(
                "duplicate source name: {}",
                descriptor.name
            )));
        }

        if let Some(per_minute) = descriptor.rate_limit_per_minute {
            let per_minute = NonZeroU32::new(per_minute).ok_or_else(|| {
                Error::Config(format!(
                    "sources.{}.rate_limit_per_minute must be >= 1",
                    descriptor.name
                ))
            })?;
            self.limiters.insert(
                descriptor.name.clone(),
                Arc::new(RateLimiter::direct(Quota::per_minute(per_minute))),
            );
        }

        debug!(
            source = %descriptor.name,
            priority = descriptor.priority,
            enabled = descriptor.enabled,
            "Registered source"
        );
        self.sources.insert(descriptor.name.clone(), source);
        self.descriptors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(descriptor.name.clone(), descriptor);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn SubtitleSource>> {
        self.sources.get(name).cloned()
    }

    /// Snapshot of all descriptors, sorted by priority then name
    pub fn descriptors(&self) -> Vec<SourceDescriptor> {
        let mut all: Vec<SourceDescriptor> = self
            .descriptors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        all.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
        all
    }

    /// Current settings table of a registered source
    pub fn settings(&self, name: &str) -> Option<toml::Table> {
        self.descriptors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(|d| d.settings.clone())
    }

    /// Enabled sources, highest priority first (name breaks priority ties)
    pub fn enabled_in_priority_order(&self) -> Vec<ActiveSource> {
        self.descriptors()
            .into_iter()
            .filter(|d| d.enabled)
            .filter_map(|descriptor| {
                let source = self.sources.get(&descriptor.name).cloned()?;
                let limiter = self.limiters.get(&descriptor.name).cloned();
                Some(ActiveSource {
                    descriptor,
                    source,
                    limiter,
                })
            })
            .collect()
    }

    /// Names of enabled sources, sorted (used for cache fingerprints)
    pub fn enabled_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .enabled_in_priority_order()
            .into_iter()
            .map(|s| s.descriptor.name)
            .collect();
        names.sort();
        names
    }

    /// Apply enabled, priority and settings changes from a reloaded configuration
    ///
    /// Unknown names are rejected without applying any change. Sources
    /// missing from `configs` keep their current settings.
    pub fn apply_reload(&self, configs: &[SourceConfig]) -> Result<()> {
        let mut descriptors = self
            .descriptors
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(unknown) = configs.iter().find(|c| !descriptors.contains_key(&c.name)) {
            return Err(Error::Config(format!(
                "reload references unregistered source '{}'",
                unknown.name
            )));
        }

        for config in configs {
            if let Some(descriptor) = descriptors.get_mut(&config.name) {
                if descriptor.enabled != config.enabled || descriptor.priority != config.priority {
                    info!(
                        source = %config.name,
                        enabled = config.enabled,
                        priority = config.priority,
                        "Source settings reloaded"
                    );
                }
                descriptor.enabled = config.enabled;
                descriptor.priority = config.priority;
                if descriptor.settings != config.settings {
                    debug!(source = %config.name, "Source-specific settings replaced");
                    descriptor.settings = config.settings.clone();
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SubtitleFormat;

    struct NamedSource(&'static str);

    #[async_trait]
    impl SubtitleSource for NamedSource {
        fn name(&self) -> &str {
            self.0
        }

        async fn search(&self, _query: &Query) -> std::result::Result<Vec<Candidate>, SourceError> {
            Ok(Vec::new())
        }

        async fn download(
            &self,
            _candidate: &Candidate,
        ) -> std::result::Result<SubtitleFile, SourceError> {
            Ok(SubtitleFile {
                format: SubtitleFormat::Plain,
                content: Vec::new(),
                path: None,
            })
        }
    }

    fn configs() -> Vec<SourceConfig> {
        let mut disabled = SourceConfig::new("c", 1);
        disabled.enabled = false;
        vec![SourceConfig::new("a", 20), SourceConfig::new("b", 10), disabled]
    }

    fn implementations() -> Vec<Arc<dyn SubtitleSource>> {
        vec![
            Arc::new(NamedSource("a")),
            Arc::new(NamedSource("b")),
            Arc::new(NamedSource("c")),
        ]
    }

    #[test]
    fn test_enabled_in_priority_order() {
        let registry = SourceRegistry::from_config(&configs(), implementations()).unwrap();
        let names: Vec<String> = registry
            .enabled_in_priority_order()
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn test_missing_implementation_rejected() {
        let result = SourceRegistry::from_config(&configs(), vec![Arc::new(NamedSource("a"))]);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_unconfigured_implementation_rejected() {
        let mut impls = implementations();
        impls.push(Arc::new(NamedSource("stray")));
        let err = SourceRegistry::from_config(&configs(), impls).unwrap_err();
        assert!(err.to_string().contains("stray"));
    }

    #[test]
    fn test_reload_updates_enabled_and_priority() {
        let registry = SourceRegistry::from_config(&configs(), implementations()).unwrap();

        let mut a = SourceConfig::new("a", 1);
        a.enabled = true;
        let c = SourceConfig::new("c", 5);
        registry.apply_reload(&[a, c]).unwrap();

        assert_eq!(registry.enabled_names(), vec!["a", "b", "c"]);
        let order: Vec<String> = registry
            .enabled_in_priority_order()
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        assert_eq!(order, vec!["a", "c", "b"]);
    }

    #[test]
    fn test_source_settings_carried_and_reloaded() {
        let mut a = SourceConfig::new("a", 1);
        a.settings.insert("api_key".to_string(), toml::Value::String("secret".to_string()));
        a.settings.insert("endpoint".to_string(), toml::Value::String("https://a.example".to_string()));
        let registry = SourceRegistry::from_config(&[a.clone()], vec![Arc::new(NamedSource("a"))]).unwrap();

        let settings = registry.settings("a").unwrap();
        assert_eq!(settings.get("api_key").and_then(|v| v.as_str()), Some("secret"));
        assert_eq!(registry.enabled_in_priority_order()[0].descriptor.settings, settings);
        assert!(registry.settings("missing").is_none());

        a.settings.insert("api_key".to_string(), toml::Value::String("rotated".to_string()));
        registry.apply_reload(&[a]).unwrap();
        let settings = registry.settings("a").unwrap();
        assert_eq!(settings.get("api_key").and_then(|v| v.as_str()), Some("rotated"));
        assert_eq!(settings.len(), 2);
    }

    #[test]
    fn test_reload_rejects_unknown_source_atomically() {
        let registry = SourceRegistry::from_config(&configs(), implementations()).unwrap();
        let before = registry.descriptors();

        let result = registry.apply_reload(&[SourceConfig::new("a", 1), SourceConfig::new("zzz", 1)]);
        assert!(result.is_err());
        assert_eq!(registry.descriptors(), before);
    }

    #[test]
    fn test_rate_limiter_quota() {
        let mut config = SourceConfig::new("a", 1);
        config.rate_limit_per_minute = Some(2);
        let registry =
            SourceRegistry::from_config(&[config], vec![Arc::new(NamedSource("a"))]).unwrap();

        let active = &registry.enabled_in_priority_order()[0];
        assert!(active.try_acquire_quota());
        assert!(active.try_acquire_quota());
        assert!(!active.try_acquire_quota());
    }

    #[test]
    fn test_failure_classification() {
        assert_eq!(
            SourceError::Auth("401".into()).failure_kind(),
            Some(FailureKind::Auth)
        );
        assert_eq!(
            SourceError::Network("reset".into()).failure_kind(),
            Some(FailureKind::Transient)
        );
        assert_eq!(SourceError::Unsupported("movies".into()).failure_kind(), None);
    }
}
