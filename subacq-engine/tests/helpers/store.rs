//! In-memory result store

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use subacq_engine::types::{Decision, ExistingResult};
use subacq_engine::ResultStore;

#[derive(Default)]
pub struct MemoryStore {
    existing: Mutex<HashMap<(String, String), ExistingResult>>,
    decisions: Mutex<Vec<Decision>>,
    fail_lookups: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_existing(self, item_id: &str, existing: ExistingResult) -> Self {
        self.existing
            .lock()
            .unwrap()
            .insert((item_id.to_string(), existing.language.clone()), existing);
        self
    }

    pub fn fail_lookups(&self, fail: bool) {
        self.fail_lookups.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn decisions(&self) -> Vec<Decision> {
        self.decisions.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResultStore for MemoryStore {
    async fn existing_result(
        &self,
        item_id: &str,
        language: &str,
    ) -> anyhow::Result<Option<ExistingResult>> {
        if self.fail_lookups.load(Ordering::SeqCst) {
            anyhow::bail!("database is locked");
        }
        Ok(self
            .existing
            .lock()
            .unwrap()
            .get(&(item_id.to_string(), language.to_string()))
            .cloned())
    }

    async fn record_decision(&self, decision: &Decision) -> anyhow::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            anyhow::bail!("disk full");
        }
        self.decisions.lock().unwrap().push(decision.clone());
        Ok(())
    }
}
