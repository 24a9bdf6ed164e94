use chrono::Utc;
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::db::{self, KeyValueStore, ANALYSIS_CACHE_KEY};
use crate::error::Result;
use crate::models::{Analysis, CachedAnalysis};

pub const MAX_CACHED_ANALYSES: usize = 50;

type CacheMap = BTreeMap<String, CachedAnalysis>;

/// Memoized analyses keyed by `derive_cache_key`, oldest evicted first.
pub struct AnalysisCache<'a> {
    store: &'a dyn KeyValueStore,
}

impl<'a> AnalysisCache<'a> {
    pub fn new(store: &'a dyn KeyValueStore) -> Self {
        Self { store }
    }

    fn read(&self) -> Result<CacheMap> {
        Ok(db::load(self.store, ANALYSIS_CACHE_KEY)?.unwrap_or_default())
    }

    pub fn lookup(&self, key: &str) -> Result<Option<CachedAnalysis>> {
        Ok(self.read()?.remove(key))
    }

    pub fn store(&self, key: &str, analysis: Analysis, job_url: &str) -> Result<()> {
        self.store_at(key, analysis, job_url, Utc::now().timestamp_millis())
    }

    pub(crate) fn store_at(
        &self,
        key: &str,
        analysis: Analysis,
        job_url: &str,
        timestamp: i64,
    ) -> Result<()> {
        let mut cache = self.read()?;
        cache.insert(
            key.to_string(),
            CachedAnalysis {
                analysis,
                timestamp,
                job_url: job_url.to_string(),
            },
        );

        let evicted = evict_oldest(&mut cache, key);
        if evicted > 0 {
            info!(evicted, "analysis cache over capacity, removed oldest entries");
        }

        db::save(self.store, ANALYSIS_CACHE_KEY, &cache)?;
        debug!(key, "analysis cached");
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        db::save(self.store, ANALYSIS_CACHE_KEY, &CacheMap::new())
    }

    #[allow(dead_code)]
    pub fn len(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }

    /// Entries, newest first.
    pub fn entries(&self) -> Result<Vec<(String, CachedAnalysis)>> {
        let mut entries: Vec<_> = self.read()?.into_iter().collect();
        entries.sort_by(|a, b| b.1.timestamp.cmp(&a.1.timestamp));
        Ok(entries)
    }
}

// Smallest timestamps go first; on a tie the entry just written is kept.
fn evict_oldest(cache: &mut CacheMap, just_written: &str) -> usize {
    if cache.len() <= MAX_CACHED_ANALYSES {
        return 0;
    }
    let excess = cache.len() - MAX_CACHED_ANALYSES;

    let mut by_age: Vec<(i64, bool, String)> = cache
        .iter()
        .map(|(k, v)| (v.timestamp, k == just_written, k.clone()))
        .collect();
    by_age.sort();

    for (_, _, key) in by_age.into_iter().take(excess) {
        cache.remove(&key);
    }
    excess
}
