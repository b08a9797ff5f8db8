use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use cortex_store::Store;
use cortex_types::Memory;

// NOTE: Cache Design Rationale
//
// Why no access charge on injection?
// - Injecting a memory into context and then counting that as an access
//   would feed the hot tier from its own output; popular memories would
//   never leave. Access is recorded only on explicit retrieval.
//
// Why smoothed counts instead of raw counters?
// - A memory hammered during one incident should cool off afterwards.
//   Each recorded access folds into an exponentially smoothed value, so
//   rank decays without a background job.

const ACCESS_SMOOTHING: f64 = 0.8;

/// In-RAM working set over the store: id map, category buckets, hot tier,
/// and co-occurrence edges. Read-mostly; writes flow store -> cache via
/// [`MemoryIndex::delta_sync`].
pub struct MemoryIndex {
    entries: HashMap<String, Memory>,
    buckets: HashMap<String, Vec<String>>,
    smoothed_access: HashMap<String, f64>,
    co_occurrence: HashMap<(String, String), u32>,
    watermark: DateTime<Utc>,
    hot_cap: usize,
    warmup_limit: usize,
}

impl MemoryIndex {
    pub fn new(hot_cap: usize, warmup_limit: usize) -> Self {
        Self {
            entries: HashMap::new(),
            buckets: HashMap::new(),
            smoothed_access: HashMap::new(),
            co_occurrence: HashMap::new(),
            watermark: DateTime::<Utc>::MIN_UTC,
            hot_cap,
            warmup_limit,
        }
    }

    /// Bulk-load recent memories and seed the smoothed counts from their
    /// persisted access counters.
    pub fn warmup(&mut self, store: &Store) -> cortex_store::Result<usize> {
        let memories = store.get_recent(self.warmup_limit, None)?;
        let loaded = memories.len();
        for memory in memories {
            self.smoothed_access
                .insert(memory.id.clone(), memory.access_count as f64);
            self.insert(memory);
        }
        self.watermark = Utc::now();
        Ok(loaded)
    }

    fn insert(&mut self, memory: Memory) {
        if let Some(old) = self.entries.get(&memory.id) {
            for category in &old.categories {
                if let Some(bucket) = self.buckets.get_mut(category) {
                    bucket.retain(|id| id != &memory.id);
                }
            }
        }
        for category in &memory.categories {
            self.buckets
                .entry(category.clone())
                .or_default()
                .push(memory.id.clone());
        }
        self.entries.insert(memory.id.clone(), memory);
        self.enforce_hot_cap();
    }

    pub fn get(&self, id: &str) -> Option<&Memory> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Top-n by smoothed access count. Ties break toward the more recently
    /// accessed memory so eviction order stays deterministic.
    pub fn get_hot(&self, n: usize) -> Vec<&Memory> {
        let mut ranked: Vec<&Memory> = self.entries.values().collect();
        ranked.sort_by(|a, b| {
            let score_a = self.smoothed_access.get(&a.id).copied().unwrap_or(0.0);
            let score_b = self.smoothed_access.get(&b.id).copied().unwrap_or(0.0);
            score_b
                .partial_cmp(&score_a)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.last_accessed.cmp(&a.last_accessed))
                .then(a.id.cmp(&b.id))
        });
        ranked.truncate(n);
        ranked
    }

    /// Top-n hot memories paired with their smoothed access counts
    pub fn hot_with_scores(&self, n: usize) -> Vec<(Memory, f64)> {
        self.get_hot(n)
            .into_iter()
            .map(|memory| {
                let score = self.smoothed_access.get(&memory.id).copied().unwrap_or(0.0);
                (memory.clone(), score)
            })
            .collect()
    }

    /// Category bucket sorted newest-first
    pub fn get_by_category(&self, category: &str) -> Vec<&Memory> {
        let Some(bucket) = self.buckets.get(category) else {
            return Vec::new();
        };
        let mut memories: Vec<&Memory> = bucket
            .iter()
            .filter_map(|id| self.entries.get(id))
            .collect();
        memories.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        memories
    }

    pub fn categories(&self) -> Vec<&str> {
        self.buckets.keys().map(String::as_str).collect()
    }

    /// Record an explicit retrieval: fold into the smoothed count, update
    /// the cached copy, and mirror to the store.
    pub fn record_access(&mut self, id: &str, store: &Store) -> cortex_store::Result<()> {
        store.record_access(id)?;
        let smoothed = self.smoothed_access.entry(id.to_string()).or_insert(0.0);
        *smoothed = *smoothed * ACCESS_SMOOTHING + 1.0;
        if let Some(memory) = self.entries.get_mut(id) {
            memory.access_count += 1;
            memory.last_accessed = Utc::now();
        }
        Ok(())
    }

    /// Pairwise adjacency for memories that appeared together in one
    /// injected context.
    pub fn record_co_occurrence(&mut self, ids: &[String]) {
        for (i, a) in ids.iter().enumerate() {
            for b in ids.iter().skip(i + 1) {
                let key = if a < b {
                    (a.clone(), b.clone())
                } else {
                    (b.clone(), a.clone())
                };
                *self.co_occurrence.entry(key).or_default() += 1;
            }
        }
    }

    /// Memories most often co-injected with `id`, strongest edge first
    pub fn related(&self, id: &str, n: usize) -> Vec<(&Memory, u32)> {
        let mut related: Vec<(&Memory, u32)> = self
            .co_occurrence
            .iter()
            .filter_map(|((a, b), count)| {
                let other = if a == id {
                    b
                } else if b == id {
                    a
                } else {
                    return None;
                };
                self.entries.get(other).map(|m| (m, *count))
            })
            .collect();
        related.sort_by(|a, b| b.1.cmp(&a.1));
        related.truncate(n);
        related
    }

    /// Load additional bucket memories from the store on a category shift.
    pub fn prefetch_category(&mut self, store: &Store, category: &str) -> cortex_store::Result<usize> {
        let wanted = vec![category.to_string()];
        let memories = store.get_recent(self.warmup_limit / 4, Some(&wanted))?;
        let mut added = 0;
        for memory in memories {
            if !self.entries.contains_key(&memory.id) {
                added += 1;
                self.insert(memory);
            }
        }
        Ok(added)
    }

    /// Pull memories updated after the watermark and advance it. Returns
    /// the number of cache entries refreshed.
    pub fn delta_sync(&mut self, store: &Store) -> cortex_store::Result<usize> {
        let delta = store.updated_since(self.watermark)?;
        let synced = delta.len();
        let mut max_seen = self.watermark;
        for memory in delta {
            // last_updated is not carried on the domain type; approximate
            // the new watermark with now once any row moved.
            max_seen = max_seen.max(Utc::now());
            self.insert(memory);
        }
        if synced > 0 {
            self.watermark = max_seen;
        }
        self.prune_deleted(store)?;
        Ok(synced)
    }

    fn prune_deleted(&mut self, store: &Store) -> cortex_store::Result<()> {
        let stale: Vec<String> = self
            .entries
            .keys()
            .filter(|id| store.get_memory(id).is_err())
            .cloned()
            .collect();
        for id in stale {
            self.remove(&id);
        }
        Ok(())
    }

    fn remove(&mut self, id: &str) {
        if let Some(memory) = self.entries.remove(id) {
            for category in &memory.categories {
                if let Some(bucket) = self.buckets.get_mut(category) {
                    bucket.retain(|b| b != id);
                }
            }
        }
        self.smoothed_access.remove(id);
    }

    /// Evict beyond the hot cap: lowest smoothed access first, ties broken
    /// by oldest last_accessed.
    fn enforce_hot_cap(&mut self) {
        while self.entries.len() > self.hot_cap {
            let victim = self
                .entries
                .values()
                .min_by(|a, b| {
                    let score_a = self.smoothed_access.get(&a.id).copied().unwrap_or(0.0);
                    let score_b = self.smoothed_access.get(&b.id).copied().unwrap_or(0.0);
                    score_a
                        .partial_cmp(&score_b)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then(a.last_accessed.cmp(&b.last_accessed))
                        .then(a.id.cmp(&b.id))
                })
                .map(|m| m.id.clone());
            match victim {
                Some(id) => self.remove(&id),
                None => break,
            }
        }
    }

    pub fn hot_cap(&self) -> usize {
        self.hot_cap
    }

    /// Ids currently cached, for stats reporting
    pub fn cached_ids(&self) -> HashSet<&str> {
        self.entries.keys().map(String::as_str).collect()
    }
}
