//! Native render pipelines keyed by static description and dynamic state.

use std::sync::atomic::{AtomicU64, Ordering};
use parking_lot::RwLock;
use keel_core::collections::hashmap::{Entry, HashMap};
use keel_core::log;
use crate::error::{RhiError, RhiResult};
use crate::pipeline::{DynamicState, RenderPipelineDesc};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineCacheStats {
    /// Native variants currently alive.
    pub graphic_pipeline_count: usize,
    pub hits: u64,
    pub misses: u64,
}

struct CacheEntry<P> {
    /// Render pipeline handles sharing this static description.
    users: u32,
    variants: HashMap<DynamicState, P>,
}

/// Shared by every recorder of a device. Lookups take the read lock; only insertion and
/// eviction take the write lock, and native builds run with no cache lock held.
pub(crate) struct PipelineCache<P> {
    entries: RwLock<HashMap<RenderPipelineDesc, CacheEntry<P>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<P> Default for PipelineCache<P> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }
}

impl<P: Copy> PipelineCache<P> {
    /// Register one more handle using `key`.
    pub fn acquire(&self, key: &RenderPipelineDesc) {
        let mut entries = self.entries.write();
        match entries.entry(key.clone()) {
            Entry::Occupied(mut occupied) => occupied.get_mut().users += 1,
            Entry::Vacant(vacant) => {
                vacant.insert(CacheEntry { users: 1, variants: HashMap::default() });
            }
        }
    }

    /// Drop one handle's interest in `key`. Returns the native variants to destroy once the
    /// last user is gone.
    pub fn release(&self, key: &RenderPipelineDesc) -> Vec<P> {
        let mut entries = self.entries.write();
        let Some(entry) = entries.get_mut(key) else {
            return Vec::new();
        };
        entry.users = entry.users.saturating_sub(1);
        if entry.users > 0 {
            return Vec::new();
        }
        entries
            .remove(key)
            .map(|entry| entry.variants.into_values().collect())
            .unwrap_or_default()
    }

    pub fn lookup(&self, key: &RenderPipelineDesc, dynamic: &DynamicState) -> Option<P> {
        let entries = self.entries.read();
        let pipeline = entries.get(key)?.variants.get(dynamic).copied();
        if pipeline.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        pipeline
    }

    /// Resolve the variant for `dynamic`, building it on a miss.
    ///
    /// `build` runs without any cache lock. If another thread inserted the same variant in the
    /// meantime its pipeline wins and ours is handed to `discard`.
    pub fn get_or_build(
        &self,
        key: &RenderPipelineDesc,
        dynamic: &DynamicState,
        build: impl FnOnce() -> RhiResult<P>,
        discard: impl FnOnce(P),
    ) -> RhiResult<P> {
        if let Some(pipeline) = self.lookup(key, dynamic) {
            return Ok(pipeline);
        }

        let built = build()?;

        let mut entries = self.entries.write();
        let Some(entry) = entries.get_mut(key) else {
            drop(entries);
            discard(built);
            return Err(RhiError::runtime("render pipeline was destroyed while being resolved"));
        };
        match entry.variants.entry(*dynamic) {
            Entry::Occupied(existing) => {
                let pipeline = *existing.get();
                drop(entries);
                self.hits.fetch_add(1, Ordering::Relaxed);
                discard(built);
                Ok(pipeline)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(built);
                self.misses.fetch_add(1, Ordering::Relaxed);
                log::debug!("pipeline cache miss for {dynamic:?}");
                Ok(built)
            }
        }
    }

    pub fn stats(&self) -> PipelineCacheStats {
        let entries = self.entries.read();
        PipelineCacheStats {
            graphic_pipeline_count: entries.values().map(|entry| entry.variants.len()).sum(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Empty the cache, returning every native pipeline. Used at device teardown.
    pub fn drain(&self) -> Vec<P> {
        self.entries
            .write()
            .drain()
            .flat_map(|(_, entry)| entry.variants.into_values())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::Handle;
    use crate::pipeline::{RenderPipelineDescBuilder, Topology};

    fn desc() -> RenderPipelineDesc {
        RenderPipelineDescBuilder::default()
            .vertex_shader(Handle::new(0, 1))
            .fragment_shader(Handle::new(1, 1))
            .build()
            .unwrap()
    }

    #[test]
    fn identical_state_hits() {
        let cache = PipelineCache::<u32>::default();
        let key = desc();
        cache.acquire(&key);

        let dynamic = DynamicState::default();
        let first = cache.get_or_build(&key, &dynamic, || Ok(10), |_| unreachable!()).unwrap();
        let second = cache.get_or_build(&key, &dynamic, || panic!("must not rebuild"), |_| ()).unwrap();
        assert_eq!(first, second);

        let stats = cache.stats();
        assert_eq!((stats.graphic_pipeline_count, stats.hits, stats.misses), (1, 1, 1));
    }

    #[test]
    fn changed_dynamic_field_misses() {
        let cache = PipelineCache::<u32>::default();
        let key = desc();
        cache.acquire(&key);

        let triangles = DynamicState::default();
        let lines = DynamicState { topology: Topology::Line, ..triangles };
        let biased = DynamicState { depth_bias_enable: true, ..triangles };
        assert_eq!(cache.get_or_build(&key, &triangles, || Ok(1), |_| ()).unwrap(), 1);
        assert_eq!(cache.get_or_build(&key, &lines, || Ok(2), |_| ()).unwrap(), 2);
        assert_eq!(cache.get_or_build(&key, &biased, || Ok(3), |_| ()).unwrap(), 3);
        assert_eq!(cache.stats().misses, 3);
    }

    #[test]
    fn last_release_evicts_every_variant() {
        let cache = PipelineCache::<u32>::default();
        let key = desc();
        cache.acquire(&key);
        cache.acquire(&key);
        cache.get_or_build(&key, &DynamicState::default(), || Ok(1), |_| ()).unwrap();

        assert!(cache.release(&key).is_empty());
        assert_eq!(cache.release(&key), vec![1]);
        assert_eq!(cache.stats().graphic_pipeline_count, 0);
        assert!(cache.get_or_build(&key, &DynamicState::default(), || Ok(2), |_| ()).is_err());
    }
}
