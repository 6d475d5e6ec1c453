//! Database handle and public API.
//!
//! [`Database`] is the sole entry point: create or load an artifact, then
//! add, remove, query, and save through the handle. A single
//! `parking_lot::RwLock` guards the engine — readers (`query`, `get`,
//! `count`) share access, writers (`add`, `remove`, `save`) are exclusive.
//! The handle is move-only; share it across threads behind an `Arc`.
//!
//! # Example
//!
//! ```no_run
//! use oriondb::{Config, Database, Metadata, MetadataValue};
//!
//! fn main() -> oriondb::Result<()> {
//!     let db = Database::create("vectors.orion", Config::new(2, 1000)?)?;
//!
//!     let mut meta = Metadata::new();
//!     meta.insert("type".to_string(), MetadataValue::from("animal"));
//!     assert!(db.add(1, &[0.1, 0.1], meta.clone()));
//!
//!     let hits = db.query_with_filter(&[0.1, 0.1], 5, &meta);
//!     assert_eq!(hits[0].id, 1);
//!
//!     db.save()?;
//!     Ok(())
//! }
//! ```
//!
//! # Persistence
//!
//! Changes are not persisted automatically. [`save()`](Database::save)
//! rewrites the artifact atomically; a crash between saves loses only the
//! unsaved mutations, never the previous artifact.

use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use lru::LruCache;
use ordered_float::OrderedFloat;
use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;
use tracing::{debug, info, instrument};

use crate::config::Config;
use crate::engine::{Engine, QueryResult};
use crate::error::Result;
use crate::metadata::Metadata;
use crate::storage;
use crate::store::VectorId;

/// Cache key for unfiltered query results. `OrderedFloat` makes the query
/// components hashable with a total order over NaN and infinities.
#[derive(Clone, PartialEq, Eq)]
struct QueryCacheKey {
    query: Vec<OrderedFloat<f32>>,
    k: usize,
}

impl Hash for QueryCacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.k.hash(state);
        for v in &self.query {
            v.hash(state);
        }
    }
}

impl QueryCacheKey {
    fn new(query: &[f32], k: usize) -> Self {
        Self {
            query: query.iter().map(|&f| OrderedFloat(f)).collect(),
            k,
        }
    }
}

/// Query cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
    pub capacity: usize,
}

struct QueryCache {
    cache: LruCache<QueryCacheKey, Vec<QueryResult>>,
    hits: u64,
    misses: u64,
}

impl QueryCache {
    fn new(capacity: NonZeroUsize) -> Self {
        Self {
            cache: LruCache::new(capacity),
            hits: 0,
            misses: 0,
        }
    }

    fn get(&mut self, key: &QueryCacheKey) -> Option<Vec<QueryResult>> {
        match self.cache.get(key) {
            Some(results) => {
                self.hits += 1;
                Some(results.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    fn put(&mut self, key: QueryCacheKey, results: Vec<QueryResult>) {
        self.cache.put(key, results);
    }

    fn stats(&self) -> QueryCacheStats {
        QueryCacheStats {
            hits: self.hits,
            misses: self.misses,
            size: self.cache.len(),
            capacity: self.cache.cap().get(),
        }
    }
}

/// An embedded vector database bound to one on-disk artifact.
///
/// See the [module documentation](self) for an overview and example.
pub struct Database {
    path: PathBuf,
    inner: RwLock<Engine>,
    dirty: AtomicBool,
    /// Unfiltered-query result cache; cleared on every mutation.
    cache: Mutex<Option<QueryCache>>,
}

impl Database {
    /// Create a database at `path` and immediately persist the empty
    /// artifact.
    ///
    /// An existing file at `path` is overwritten.
    ///
    /// # Errors
    ///
    /// [`OrionError::InvalidConfig`](crate::OrionError::InvalidConfig) for
    /// a zero dimension or capacity, [`OrionError::Io`](crate::OrionError::Io)
    /// if the artifact cannot be written.
    #[instrument(skip(config), fields(path = %path.as_ref().display()))]
    pub fn create<P: AsRef<Path>>(path: P, config: Config) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        // Re-validate: Config fields are public, so a handcrafted value
        // can bypass Config::new.
        let config = Config::new(config.dimension, config.capacity)?;

        let engine = Engine::new(config);
        storage::save_engine(&engine, &path)?;
        info!(
            dimension = config.dimension,
            capacity = config.capacity,
            "database created"
        );

        Ok(Self {
            path,
            inner: RwLock::new(engine),
            dirty: AtomicBool::new(false),
            cache: Mutex::new(None),
        })
    }

    /// Open an existing artifact, reconstructing the full engine state.
    ///
    /// # Errors
    ///
    /// [`OrionError::Io`](crate::OrionError::Io) if the file cannot be
    /// read, [`OrionError::InvalidDatabase`](crate::OrionError::InvalidDatabase)
    /// for an unrecognized magic or format version, and
    /// [`OrionError::Corruption`](crate::OrionError::Corruption) for a
    /// truncated or malformed stream.
    #[instrument(fields(path = %path.as_ref().display()))]
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let engine = storage::load_engine(&path)?;
        Ok(Self {
            path,
            inner: RwLock::new(engine),
            dirty: AtomicBool::new(false),
            cache: Mutex::new(None),
        })
    }

    /// Path of the on-disk artifact.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Declared vector dimension.
    pub fn dimension(&self) -> usize {
        self.inner.read().config().dim()
    }

    /// Current index capacity (grows via rebuild).
    pub fn capacity(&self) -> u64 {
        self.inner.read().config().capacity
    }

    /// Insert or replace the vector under `id`.
    ///
    /// Returns `false` — leaving the database unchanged or, for a replace
    /// that fails mid-flight, without the id — when the vector length does
    /// not match the database dimension, the vector or a metadata value is
    /// NaN, or an index rebuild fails. The reason is logged at warn level.
    pub fn add(&self, id: VectorId, vector: &[f32], metadata: Metadata) -> bool {
        let added = self.inner.write().add(id, vector.to_vec(), metadata);
        if added {
            self.mark_modified();
        }
        added
    }

    /// Remove the vector under `id` from all structures. Returns whether
    /// it existed; removing an absent id is not an error.
    pub fn remove(&self, id: VectorId) -> bool {
        let removed = self.inner.write().remove(id);
        if removed {
            self.mark_modified();
        }
        removed
    }

    /// Fetch an owned copy of the vector and metadata under `id`.
    pub fn get(&self, id: VectorId) -> Option<(Vec<f32>, Metadata)> {
        self.inner.read().get(id)
    }

    /// Number of live vectors.
    pub fn count(&self) -> usize {
        self.inner.read().count()
    }

    /// Top-k approximate nearest neighbors, ascending by squared-L2
    /// distance. A query of the wrong dimension returns an empty result.
    pub fn query(&self, query: &[f32], k: usize) -> Vec<QueryResult> {
        // The read lock is held across the cache fill so a writer's
        // invalidation cannot be overwritten by a result computed against
        // the pre-write state.
        let engine = self.inner.read();

        let key = {
            let mut cache = self.cache.lock();
            match cache.as_mut() {
                Some(c) => {
                    let key = QueryCacheKey::new(query, k);
                    if let Some(results) = c.get(&key) {
                        return results;
                    }
                    Some(key)
                }
                None => None,
            }
        };

        let results = engine.query(query, k);

        if let Some(key) = key {
            if let Some(c) = self.cache.lock().as_mut() {
                c.put(key, results.clone());
            }
        }
        results
    }

    /// Top-k search restricted to vectors whose metadata matches every
    /// `(key, value)` clause of `filter` exactly. An empty filter matches
    /// everything; a clause naming an unknown key or value yields an
    /// empty result.
    pub fn query_with_filter(
        &self,
        query: &[f32],
        k: usize,
        filter: &Metadata,
    ) -> Vec<QueryResult> {
        self.inner.read().query_filtered(query, k, filter)
    }

    /// Run many unfiltered queries in parallel under one read
    /// acquisition. Result order matches query order.
    pub fn query_batch(&self, queries: &[Vec<f32>], k: usize) -> Vec<Vec<QueryResult>> {
        let engine = self.inner.read();
        queries
            .par_iter()
            .map(|query| engine.query(query, k))
            .collect()
    }

    /// Atomically persist the current state to the artifact path.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn save(&self) -> Result<()> {
        // Exclusive: a save is a writer in the locking discipline, so the
        // serialized snapshot can never interleave with a mutation.
        let engine = self.inner.write();
        storage::save_engine(&engine, &self.path)?;
        self.dirty.store(false, Ordering::Release);
        Ok(())
    }

    /// True when mutations exist that have not been saved.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    fn mark_modified(&self) {
        self.dirty.store(true, Ordering::Release);
        if let Some(c) = self.cache.lock().as_mut() {
            c.cache.clear();
        }
    }

    /// Enable caching of unfiltered query results. Replaces any existing
    /// cache. A zero capacity is ignored.
    pub fn enable_query_cache(&self, capacity: usize) {
        if let Some(capacity) = NonZeroUsize::new(capacity) {
            debug!(capacity, "query cache enabled");
            *self.cache.lock() = Some(QueryCache::new(capacity));
        }
    }

    /// Disable and drop the query cache.
    pub fn disable_query_cache(&self) {
        *self.cache.lock() = None;
    }

    /// Hit/miss statistics, or `None` when the cache is disabled.
    pub fn query_cache_stats(&self) -> Option<QueryCacheStats> {
        self.cache.lock().as_ref().map(QueryCache::stats)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .field("count", &self.count())
            .field("dirty", &self.is_dirty())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::MetadataValue;
    use tempfile::tempdir;

    fn meta(pairs: &[(&str, MetadataValue)]) -> Metadata {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_create_writes_empty_artifact() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.orion");
        let db = Database::create(&path, Config::new(2, 100).unwrap()).unwrap();
        assert!(path.exists());
        assert_eq!(db.count(), 0);
        assert!(!db.is_dirty());

        // The empty artifact is immediately loadable.
        drop(db);
        let reloaded = Database::load(&path).unwrap();
        assert_eq!(reloaded.count(), 0);
        assert_eq!(reloaded.dimension(), 2);
    }

    #[test]
    fn test_create_overwrites_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.orion");
        {
            let db = Database::create(&path, Config::new(2, 100).unwrap()).unwrap();
            db.add(1, &[0.1, 0.1], Metadata::new());
            db.save().unwrap();
        }
        let db = Database::create(&path, Config::new(3, 50).unwrap()).unwrap();
        assert_eq!(db.count(), 0);
        assert_eq!(db.dimension(), 3);
    }

    #[test]
    fn test_create_rejects_invalid_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.orion");
        let config = Config {
            dimension: 0,
            capacity: 10,
        };
        assert!(Database::create(&path, config).is_err());
    }

    #[test]
    fn test_dirty_tracking() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.orion");
        let db = Database::create(&path, Config::new(2, 100).unwrap()).unwrap();

        assert!(!db.is_dirty());
        db.add(1, &[0.0, 0.0], Metadata::new());
        assert!(db.is_dirty());
        db.save().unwrap();
        assert!(!db.is_dirty());

        // Rejected mutations do not dirty the handle.
        db.add(2, &[0.0], Metadata::new());
        db.remove(99);
        assert!(!db.is_dirty());
    }

    #[test]
    fn test_query_cache_hits_and_invalidation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.orion");
        let db = Database::create(&path, Config::new(2, 100).unwrap()).unwrap();
        db.add(1, &[0.1, 0.1], Metadata::new());
        db.enable_query_cache(16);

        let first = db.query(&[0.1, 0.1], 5);
        let second = db.query(&[0.1, 0.1], 5);
        assert_eq!(first, second);
        let stats = db.query_cache_stats().unwrap();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);

        // A mutation invalidates cached results.
        db.add(2, &[0.1, 0.1], Metadata::new());
        let third = db.query(&[0.1, 0.1], 5);
        assert_eq!(third.len(), 2);
    }

    #[test]
    fn test_query_batch_matches_sequential() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.orion");
        let db = Database::create(&path, Config::new(2, 100).unwrap()).unwrap();
        for i in 0..20u64 {
            db.add(i, &[i as f32 / 20.0, 0.5], Metadata::new());
        }

        let queries: Vec<Vec<f32>> = vec![vec![0.0, 0.5], vec![0.5, 0.5], vec![1.0, 0.5]];
        let batch = db.query_batch(&queries, 3);
        assert_eq!(batch.len(), 3);
        for (query, results) in queries.iter().zip(&batch) {
            assert_eq!(results, &db.query(query, 3));
        }
    }

    #[test]
    fn test_filtered_query_through_facade() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.orion");
        let db = Database::create(&path, Config::new(2, 100).unwrap()).unwrap();
        db.add(1, &[0.1, 0.1], meta(&[("type", MetadataValue::from("a"))]));
        db.add(2, &[0.2, 0.2], meta(&[("type", MetadataValue::from("b"))]));

        let filter = meta(&[("type", MetadataValue::from("b"))]);
        let results = db.query_with_filter(&[0.1, 0.1], 5, &filter);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, 2);
    }
}
