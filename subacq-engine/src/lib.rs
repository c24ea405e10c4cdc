//! # subacq engine
//!
//! Subtitle acquisition decision engine: for one media item and target
//! language, search every configured subtitle source concurrently, score
//! what comes back, and decide between accepting a source result, keeping
//! what is already stored, or falling back to speech-to-text.
//!
//! **Components (leaves first):**
//! - [`health`]: per-source response-time window and circuit breaker
//! - [`cache`]: short-TTL candidate cache keyed by query fingerprint
//! - [`scoring`]: deterministic weighted match score
//! - [`sources`]: source capability trait, registry and concurrent manager
//! - [`policy`]: selection/fallback and upgrade rules
//! - [`orchestrator`]: sequences one acquisition attempt into a [`Decision`]
//!
//! All process-wide state lives in one [`AcquisitionContext`], built once
//! at startup and shared by reference.

pub mod cache;
pub mod collaborators;
pub mod events;
pub mod health;
pub mod orchestrator;
pub mod policy;
pub mod scoring;
pub mod sources;
pub mod types;

pub use collaborators::{ResultStore, Transcriber, TranscriptionError};
pub use events::{AcquisitionEvent, AcquisitionEventBus};
pub use orchestrator::Orchestrator;
pub use policy::SearchMode;
pub use types::{Candidate, Decision, ExistingResult, Outcome, Provenance, Query, Reason};

use cache::ResultCache;
use health::{HealthTracker, SourceHealthReport};
use sources::{SourceManager, SourceRegistry, SubtitleSource};
use std::sync::Arc;
use subacq_common::config::{EngineConfig, SourceConfig};
use subacq_common::Result;
use tracing::info;

/// Process-wide engine state
///
/// Holds the validated configuration, the source registry, health
/// records, result cache and event bus.
pub struct AcquisitionContext {
    config: Arc<EngineConfig>,
    registry: Arc<SourceRegistry>,
    health: Arc<HealthTracker>,
    cache: Arc<ResultCache>,
    events: AcquisitionEventBus,
    manager: SourceManager,
}

impl AcquisitionContext {
    /// Validate `config` and pair its sources with `implementations`
    pub fn new(
        config: EngineConfig,
        implementations: Vec<Arc<dyn SubtitleSource>>,
    ) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(SourceRegistry::from_config(&config.sources, implementations)?);
        let health = Arc::new(HealthTracker::new(
            config.timeouts.clone(),
            config.circuit.clone(),
        ));
        let cache = Arc::new(ResultCache::new(config.cache.ttl()));
        let events = AcquisitionEventBus::new(events::DEFAULT_EVENT_CAPACITY);
        let manager = SourceManager::new(Arc::clone(&registry), Arc::clone(&health), events.clone());

        info!(
            sources = registry.len(),
            cache_ttl_secs = config.cache.ttl_secs,
            fallback_min_score = config.fallback.min_score,
            "Acquisition context initialised"
        );

        Ok(Self {
            config: Arc::new(config),
            registry,
            health,
            cache,
            events,
            manager,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SourceRegistry> {
        &self.registry
    }

    pub fn health(&self) -> &Arc<HealthTracker> {
        &self.health
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    pub fn events(&self) -> &AcquisitionEventBus {
        &self.events
    }

    pub fn manager(&self) -> &SourceManager {
        &self.manager
    }

    /// Apply reloaded enabled/priority settings
    pub fn reload_sources(&self, sources: &[SourceConfig]) -> Result<()> {
        self.registry.apply_reload(sources)
    }

    /// Invalidate cached candidate lists and publish `CacheCleared`
    pub fn clear_cache(&self, source: Option<&str>) -> usize {
        let removed = self.cache.clear(source);
        self.events.emit(AcquisitionEvent::CacheCleared {
            source: source.map(str::to_string),
            removed,
            timestamp: subacq_common::time::now(),
        });
        removed
    }

    pub fn health_report(&self) -> Vec<SourceHealthReport> {
        self.health.report()
    }
}
