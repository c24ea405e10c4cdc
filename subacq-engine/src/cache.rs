//! Short-TTL result cache
//!
//! Maps a [`Fingerprint`] of (query, enabled source set) to the merged,
//! unscored candidate list a search produced. Because the source set is
//! part of the fingerprint, enabling or disabling a source makes older
//! entries unreachable without an explicit clear.
//!
//! Every [`ResultCache::clear`] bumps an epoch. A search captures the
//! epoch before it starts and writes back with
//! [`ResultCache::put_if_current`]; a write racing an invalidation is
//! dropped, so the race resolves to a miss on the next lookup.

use crate::types::{Candidate, MediaKind, Query};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Cache key derived from a query and the enabled source set
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    digest: String,
    sources: Vec<String>,
}

impl Fingerprint {
    pub fn new(query: &Query, enabled_sources: &[String]) -> Self {
        let mut sources = enabled_sources.to_vec();
        sources.sort();
        sources.dedup();

        let mut hasher = Sha256::new();
        let mut field = |name: &str, value: &str| {
            hasher.update(name.as_bytes());
            hasher.update([0x1f]);
            hasher.update(value.as_bytes());
            hasher.update([0x1e]);
        };

        field("item", &query.item_id);
        field("title", &query.title);
        match query.kind {
            MediaKind::Episode { season, episode } => {
                field("kind", "episode");
                field("season", &season.to_string());
                field("episode", &episode.to_string());
            }
            MediaKind::Movie => field("kind", "movie"),
        }
        if let Some(year) = query.year {
            field("year", &year.to_string());
        }
        field("language", &query.language.to_ascii_lowercase());
        if let Some(hash) = &query.content_hash {
            field("hash", &hash.to_ascii_lowercase());
        }
        for (namespace, id) in &query.external_ids {
            field(&format!("id:{}", namespace), id);
        }
        if let Some(path) = &query.file_path {
            field("path", &path.to_string_lossy());
        }
        for source in &sources {
            field("source", source);
        }

        Self {
            digest: format!("{:x}", hasher.finalize()),
            sources,
        }
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn sources(&self) -> &[String] {
        &self.sources
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.digest[..12.min(self.digest.len())])
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    candidates: Vec<Candidate>,
    sources: Vec<String>,
    expires_at: Instant,
}

impl CacheEntry {
    fn references(&self, source: &str) -> bool {
        self.sources.iter().any(|s| s == source) || self.candidates.iter().any(|c| c.source == source)
    }
}

/// Concurrent TTL cache of candidate lists
#[derive(Debug)]
pub struct ResultCache {
    default_ttl: Duration,
    entries: RwLock<HashMap<Fingerprint, CacheEntry>>,
    epoch: AtomicU64,
}

impl ResultCache {
    /// A zero `default_ttl` disables caching
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            default_ttl,
            entries: RwLock::new(HashMap::new()),
            epoch: AtomicU64::new(0),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn is_enabled(&self) -> bool {
        !self.default_ttl.is_zero()
    }

    /// Cached candidates, or `None` on a miss or an expired entry
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<Vec<Candidate>> {
        // A poisoned map is unreadable: treat as a miss
        let entries = self.entries.read().ok()?;
        let entry = entries.get(fingerprint)?;
        if Instant::now() >= entry.expires_at {
            return None;
        }
        Some(entry.candidates.clone())
    }

    /// Store candidates for `ttl`; a zero TTL stores nothing
    pub fn put(&self, fingerprint: Fingerprint, candidates: Vec<Candidate>, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        Self::insert(&mut entries, fingerprint, candidates, ttl);
    }

    /// Store candidates only if no clear happened since `epoch` was read
    ///
    /// Returns whether the entry was written.
    pub fn put_if_current(
        &self,
        fingerprint: Fingerprint,
        candidates: Vec<Candidate>,
        ttl: Duration,
        epoch: u64,
    ) -> bool {
        if ttl.is_zero() {
            return false;
        }
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        // Epoch only changes under the write lock, so this check is exact
        if self.epoch.load(Ordering::Acquire) != epoch {
            debug!(fingerprint = %fingerprint, "Dropping cache write from before an invalidation");
            return false;
        }
        Self::insert(&mut entries, fingerprint, candidates, ttl);
        true
    }

    fn insert(
        entries: &mut HashMap<Fingerprint, CacheEntry>,
        fingerprint: Fingerprint,
        candidates: Vec<Candidate>,
        ttl: Duration,
    ) {
        let entry = CacheEntry {
            sources: fingerprint.sources.clone(),
            candidates,
            expires_at: Instant::now() + ttl,
        };
        entries.insert(fingerprint, entry);
    }

    /// Current invalidation epoch
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Remove all entries, or only those referencing `source`
    ///
    /// Returns the number of entries removed.
    pub fn clear(&self, source: Option<&str>) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        self.epoch.fetch_add(1, Ordering::AcqRel);

        let before = entries.len();
        match source {
            None => entries.clear(),
            Some(name) => entries.retain(|_, entry| !entry.references(name)),
        }
        let removed = before - entries.len();
        debug!(source = ?source, removed, "Result cache cleared");
        removed
    }

    /// Drop expired entries, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    /// Number of stored entries, expired ones included
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .map(|entries| entries.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
