//! Core engine composing the primary store, inverted index, and graph.
//!
//! The engine owns the three coupled structures and keeps them consistent
//! across every mutation. It is not synchronized; [`Database`] wraps it in
//! a reader/writer lock and is the public surface.
//!
//! [`Database`]: crate::database::Database

use tracing::{debug, warn};

use crate::config::Config;
use crate::hnsw::GraphIndex;
use crate::inverted::{Candidates, InvertedIndex};
use crate::metadata::{contains_nan, Metadata};
use crate::store::{PrimaryStore, VectorId};
use crate::error::{OrionError, Result};

/// Headroom added on top of the live count when a rebuild grows capacity.
const REBUILD_SLACK: u64 = 10;

/// One query hit: a vector id and its squared-L2 distance from the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueryResult {
    pub id: VectorId,
    pub distance: f32,
}

#[derive(Debug)]
pub(crate) struct Engine {
    config: Config,
    store: PrimaryStore,
    postings: InvertedIndex,
    graph: GraphIndex,
}

fn vector_is_finite(vector: &[f32]) -> bool {
    vector.iter().all(|v| v.is_finite())
}

impl Engine {
    pub(crate) fn new(config: Config) -> Self {
        Self {
            graph: GraphIndex::new(config.dim(), config.capacity as usize),
            store: PrimaryStore::new(),
            postings: InvertedIndex::new(),
            config,
        }
    }

    /// Reassemble an engine from deserialized parts, reconciling the graph
    /// against the store: every stored id is reinserted so that entries
    /// missing from the graph blob are restored. Live re-adds are
    /// idempotent payload refreshes; a capacity overflow mid-way falls
    /// back to a full rebuild.
    pub(crate) fn from_parts(
        config: Config,
        store: PrimaryStore,
        postings: InvertedIndex,
        graph: GraphIndex,
    ) -> Result<Self> {
        let mut engine = Self {
            config,
            store,
            postings,
            graph,
        };
        let mut overflowed = false;
        for (id, record) in engine.store.iter() {
            match engine.graph.add_point(&record.vector, *id) {
                Ok(()) => {}
                Err(OrionError::CapacityExceeded(_)) => {
                    overflowed = true;
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        if overflowed {
            debug!("graph capacity exceeded during load reconciliation, rebuilding");
            engine.rebuild()?;
        }
        Ok(engine)
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn store(&self) -> &PrimaryStore {
        &self.store
    }

    pub(crate) fn postings(&self) -> &InvertedIndex {
        &self.postings
    }

    pub(crate) fn graph(&self) -> &GraphIndex {
        &self.graph
    }

    /// Insert or replace a vector. Returns false (leaving consistent
    /// state) on dimension mismatch, non-finite input, or rebuild failure.
    pub(crate) fn add(&mut self, id: VectorId, vector: Vec<f32>, metadata: Metadata) -> bool {
        if vector.len() != self.config.dim() {
            warn!(
                id,
                expected = self.config.dim(),
                got = vector.len(),
                "add rejected: dimension mismatch"
            );
            return false;
        }
        if !vector_is_finite(&vector) {
            warn!(id, "add rejected: vector has NaN or infinite component");
            return false;
        }
        if contains_nan(&metadata) {
            warn!(id, "add rejected: metadata value is NaN");
            return false;
        }

        // Replace: retract the old postings and tombstone the old label
        // before the new record goes in.
        if let Some(old) = self.store.get(id) {
            let old_meta = old.metadata.clone();
            self.postings.remove(id, &old_meta);
            self.graph.mark_delete(id);
        }

        self.store.insert_or_replace(id, vector, metadata.clone());
        let record = self.store.get(id).expect("record inserted above");
        let vector_ref = record.vector.clone();

        match self.graph.add_point(&vector_ref, id) {
            Ok(()) => {}
            Err(OrionError::CapacityExceeded(_)) => {
                debug!(
                    id,
                    capacity = self.config.capacity,
                    live = self.store.len(),
                    "graph full, rebuilding at larger capacity"
                );
                if let Err(e) = self.rebuild() {
                    warn!(id, error = %e, "index rebuild failed, add aborted");
                    self.store.erase(id);
                    return false;
                }
                // The rebuild reinserted everything in the store, this id
                // included; the retry is an idempotent refresh.
                if let Err(e) = self.graph.add_point(&vector_ref, id) {
                    warn!(id, error = %e, "add failed after rebuild");
                    self.store.erase(id);
                    return false;
                }
            }
            Err(e) => {
                warn!(id, error = %e, "graph insertion failed, add aborted");
                self.store.erase(id);
                return false;
            }
        }

        self.postings.add(id, &metadata);
        true
    }

    /// Build a fresh graph at `max(capacity * 2, live + slack)` and swap it
    /// in. On failure the old graph stays in place untouched.
    fn rebuild(&mut self) -> Result<()> {
        let new_capacity = (self.config.capacity * 2).max(self.store.len() as u64 + REBUILD_SLACK);
        let mut fresh = GraphIndex::new(self.config.dim(), new_capacity as usize);

        // Store iteration is id-ordered, so rebuilds are reproducible.
        for (id, record) in self.store.iter() {
            fresh.add_point(&record.vector, *id).map_err(|e| {
                OrionError::RebuildFailed(format!("reinserting id {id} failed: {e}"))
            })?;
        }

        debug!(
            old_capacity = self.config.capacity,
            new_capacity,
            vectors = self.store.len(),
            "graph index rebuilt"
        );
        self.graph = fresh;
        self.config.capacity = new_capacity;
        Ok(())
    }

    /// Remove a vector from all three structures. Returns whether it existed.
    pub(crate) fn remove(&mut self, id: VectorId) -> bool {
        match self.store.erase(id) {
            Some(record) => {
                self.postings.remove(id, &record.metadata);
                self.graph.mark_delete(id);
                true
            }
            None => false,
        }
    }

    pub(crate) fn get(&self, id: VectorId) -> Option<(Vec<f32>, Metadata)> {
        self.store
            .get(id)
            .map(|record| (record.vector.clone(), record.metadata.clone()))
    }

    pub(crate) fn count(&self) -> usize {
        self.store.len()
    }

    /// Unfiltered top-k query. Dimension mismatches and non-finite queries
    /// yield an empty result rather than an error.
    pub(crate) fn query(&self, query: &[f32], k: usize) -> Vec<QueryResult> {
        if query.len() != self.config.dim() || !vector_is_finite(query) || self.store.is_empty() {
            return Vec::new();
        }
        self.graph
            .search(query, k)
            .into_iter()
            .map(|(id, distance)| QueryResult { id, distance })
            .collect()
    }

    /// Filtered top-k query: intersect posting lists into a candidate set,
    /// then search the graph with a membership predicate. An empty filter
    /// bypasses the inverted index entirely.
    pub(crate) fn query_filtered(
        &self,
        query: &[f32],
        k: usize,
        filter: &Metadata,
    ) -> Vec<QueryResult> {
        if filter.is_empty() {
            return self.query(query, k);
        }
        if query.len() != self.config.dim() || !vector_is_finite(query) || self.store.is_empty() {
            return Vec::new();
        }

        let candidates = match self.postings.intersect(filter) {
            Candidates::AllMissing => return Vec::new(),
            Candidates::Ids(ids) if ids.is_empty() => return Vec::new(),
            Candidates::Ids(ids) => ids,
        };

        self.graph
            .search_filtered(query, k, |label| candidates.contains(&label))
            .into_iter()
            .map(|(id, distance)| QueryResult { id, distance })
            .collect()
    }
}
