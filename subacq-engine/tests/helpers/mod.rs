//! Test Helper Utilities
//!
//! Shared collaborators for subacq-engine integration tests

#![allow(dead_code)]

pub mod sources;
pub mod store;
pub mod transcriber;

pub use sources::{Script, ScriptedSource};
pub use store::MemoryStore;
pub use transcriber::ScriptedTranscriber;

use std::sync::Arc;
use subacq_common::config::{EngineConfig, SourceConfig};
use subacq_engine::sources::SubtitleSource;
use subacq_engine::{AcquisitionContext, Orchestrator};

/// Config with the given sources (priority = position + 1) and caching off
pub fn config_with_sources(names: &[&str]) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.cache.ttl_secs = 0;
    config.sources = names
        .iter()
        .enumerate()
        .map(|(i, name)| SourceConfig::new(*name, i as u32 + 1))
        .collect();
    config
}

pub fn build_context(config: EngineConfig, sources: &[Arc<ScriptedSource>]) -> Arc<AcquisitionContext> {
    let implementations: Vec<Arc<dyn SubtitleSource>> = sources
        .iter()
        .map(|s| Arc::clone(s) as Arc<dyn SubtitleSource>)
        .collect();
    Arc::new(AcquisitionContext::new(config, implementations).unwrap())
}

pub fn build_orchestrator(
    config: EngineConfig,
    sources: &[Arc<ScriptedSource>],
    store: Arc<MemoryStore>,
    transcriber: Option<Arc<ScriptedTranscriber>>,
) -> Orchestrator {
    let context = build_context(config, sources);
    Orchestrator::new(
        context,
        store,
        transcriber.map(|t| t as Arc<dyn subacq_engine::Transcriber>),
    )
}
