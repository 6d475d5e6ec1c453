//! Hierarchical Navigable Small World (HNSW) graph index.
//!
//! Approximate nearest-neighbor search over labeled vectors using a layered
//! proximity graph: sparse upper layers route a greedy descent toward the
//! neighborhood of the query, then a beam search over the dense bottom
//! layer collects the k closest labels by squared-L2 distance.
//!
//! The index owns its vector payloads and is bounded by a fixed capacity in
//! slots. Deletes are logical (tombstones): a deleted label is never
//! returned from a search but its node keeps routing traversals until the
//! engine rebuilds the index at a larger capacity. Searches accept an
//! optional per-label predicate, which is how filtered queries restrict
//! results to a candidate set.
//!
//! # Key Parameters
//!
//! - **M**: maximum connections per node above layer 0 (default 16);
//!   layer 0 allows 2·M.
//! - **ef_construction**: beam width while inserting (default 200).
//! - **ef_search**: beam width while querying (default 50, widened to k
//!   when k is larger).
//!
//! Not thread-safe by itself; the engine serializes access behind its
//! reader/writer lock.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use ordered_float::OrderedFloat;
use rand::Rng;

use crate::codec::{Reader, Writer};
use crate::distance::l2_squared;
use crate::error::{OrionError, Result};
use crate::store::VectorId;

const DEFAULT_M: usize = 16;
const DEFAULT_EF_CONSTRUCTION: usize = 200;
const DEFAULT_EF_SEARCH: usize = 50;
const MAX_LEVEL: usize = 32;

/// One layer of the graph: adjacency lists indexed by slot.
#[derive(Debug, Clone, Default)]
struct Layer {
    connections: Vec<Vec<usize>>,
}

impl Layer {
    fn new() -> Self {
        Self {
            connections: Vec::new(),
        }
    }

    fn ensure_slot(&mut self, slot: usize) {
        if slot >= self.connections.len() {
            self.connections.resize(slot + 1, Vec::new());
        }
    }

    fn neighbors(&self, slot: usize) -> &[usize] {
        self.connections
            .get(slot)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    fn set_neighbors(&mut self, slot: usize, neighbors: Vec<usize>) {
        self.ensure_slot(slot);
        self.connections[slot] = neighbors;
    }

    fn connect(&mut self, from: usize, to: usize) {
        self.ensure_slot(from);
        if !self.connections[from].contains(&to) {
            self.connections[from].push(to);
        }
    }

    fn degree(&self, slot: usize) -> usize {
        self.connections.get(slot).map(|v| v.len()).unwrap_or(0)
    }
}

/// Bit-packed tombstone set over slot indices.
#[derive(Debug, Clone, Default)]
struct Tombstones {
    bits: Vec<u64>,
    len: usize,
}

impl Tombstones {
    fn new() -> Self {
        Self::default()
    }

    #[inline]
    fn contains(&self, slot: usize) -> bool {
        self.bits
            .get(slot / 64)
            .map_or(false, |word| word >> (slot % 64) & 1 == 1)
    }

    fn insert(&mut self, slot: usize) -> bool {
        let word = slot / 64;
        if word >= self.bits.len() {
            self.bits.resize(word + 1, 0);
        }
        let mask = 1u64 << (slot % 64);
        let fresh = self.bits[word] & mask == 0;
        if fresh {
            self.bits[word] |= mask;
            self.len += 1;
        }
        fresh
    }

    fn len(&self) -> usize {
        self.len
    }
}

/// Capacity-bounded HNSW index over `u64` labels with squared-L2 distance.
#[derive(Debug)]
pub struct GraphIndex {
    dimension: usize,
    capacity: usize,
    m: usize,
    m_max0: usize,
    ef_construction: usize,
    ef_search: usize,
    /// Level multiplier for random layer assignment, 1/ln(M).
    ml: f64,
    layers: Vec<Layer>,
    entry_point: Option<usize>,
    entry_level: usize,
    /// Per-slot vector payloads; a slot is never reused once tombstoned.
    vectors: Vec<Vec<f32>>,
    labels: Vec<VectorId>,
    node_levels: Vec<usize>,
    /// Live labels only; tombstoned slots are unmapped.
    slot_of: HashMap<VectorId, usize>,
    deleted: Tombstones,
}

impl GraphIndex {
    /// Create an empty index with default HNSW parameters.
    pub fn new(dimension: usize, capacity: usize) -> Self {
        Self::with_params(dimension, capacity, DEFAULT_M, DEFAULT_EF_CONSTRUCTION)
    }

    /// Create an empty index with explicit M and ef_construction.
    pub fn with_params(
        dimension: usize,
        capacity: usize,
        m: usize,
        ef_construction: usize,
    ) -> Self {
        Self {
            dimension,
            capacity,
            m,
            m_max0: m * 2,
            ef_construction,
            ef_search: DEFAULT_EF_SEARCH,
            ml: 1.0 / (m as f64).ln(),
            layers: vec![Layer::new()],
            entry_point: None,
            entry_level: 0,
            vectors: Vec::new(),
            labels: Vec::new(),
            node_levels: Vec::new(),
            slot_of: HashMap::new(),
            deleted: Tombstones::new(),
        }
    }

    /// Number of live (undeleted) labels.
    pub fn len(&self) -> usize {
        self.slot_of.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slot_of.is_empty()
    }

    /// Number of occupied slots, live and tombstoned.
    pub fn slot_count(&self) -> usize {
        self.vectors.len()
    }

    /// Number of tombstoned slots awaiting a rebuild.
    pub fn deleted_count(&self) -> usize {
        self.deleted.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// True if `label` is present and not deleted.
    pub fn contains(&self, label: VectorId) -> bool {
        self.slot_of.contains_key(&label)
    }

    /// Set the beam width used by queries.
    pub fn set_ef_search(&mut self, ef: usize) {
        self.ef_search = ef.max(1);
    }

    fn max_connections(&self, layer: usize) -> usize {
        if layer == 0 {
            self.m_max0
        } else {
            self.m
        }
    }

    fn random_level(&self) -> usize {
        let mut rng = rand::thread_rng();
        let mut level = 0;
        while rng.gen::<f64>() < self.ml && level < MAX_LEVEL {
            level += 1;
        }
        level
    }

    /// Insert a labeled vector.
    ///
    /// Re-adding a label that is currently live refreshes its payload in
    /// place (this makes load-time reconciliation idempotent). Re-adding a
    /// label after [`mark_delete`](Self::mark_delete) allocates a fresh
    /// slot; the tombstoned slot is never reclaimed, which is why the
    /// engine rebuilds once slots run out.
    ///
    /// # Errors
    ///
    /// [`OrionError::DimensionMismatch`] for a wrong-length vector,
    /// [`OrionError::CapacityExceeded`] when every slot is occupied.
    pub fn add_point(&mut self, vector: &[f32], label: VectorId) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(OrionError::DimensionMismatch {
                expected: self.dimension,
                got: vector.len(),
            });
        }

        if let Some(&slot) = self.slot_of.get(&label) {
            self.vectors[slot] = vector.to_vec();
            return Ok(());
        }

        if self.vectors.len() >= self.capacity {
            return Err(OrionError::CapacityExceeded(format!(
                "index is full at {} slots",
                self.capacity
            )));
        }

        let slot = self.vectors.len();
        let level = self.random_level();
        self.vectors.push(vector.to_vec());
        self.labels.push(label);
        self.node_levels.push(level);
        self.slot_of.insert(label, slot);

        while self.layers.len() <= level {
            self.layers.push(Layer::new());
        }

        let Some(entry) = self.entry_point else {
            self.entry_point = Some(slot);
            self.entry_level = level;
            for l in 0..=level {
                self.layers[l].ensure_slot(slot);
            }
            return Ok(());
        };

        // Greedy descent through layers above the insertion level.
        // Tombstoned nodes still participate: they keep routing the graph
        // and stay valid link targets until a rebuild drops them.
        let mut current = entry;
        for l in ((level + 1)..=self.entry_level).rev() {
            if let Some(&(closest, _)) = self.search_layer(vector, current, 1, l, &|_| true).first()
            {
                current = closest;
            }
        }

        // Wire connections from min(level, entry_level) down to 0.
        let start = level.min(self.entry_level);
        for l in (0..=start).rev() {
            let candidates =
                self.search_layer(vector, current, self.ef_construction, l, &|_| true);
            let max_conn = self.max_connections(l);
            let neighbors = Self::closest(&candidates, max_conn);

            self.layers[l].set_neighbors(slot, neighbors.iter().map(|&(n, _)| n).collect());

            for &(neighbor, _) in &neighbors {
                self.layers[l].connect(neighbor, slot);
                if self.layers[l].degree(neighbor) > max_conn {
                    let linked = self.layers[l].neighbors(neighbor).to_vec();
                    let anchor = &self.vectors[neighbor];
                    let scored: Vec<(usize, f32)> = linked
                        .iter()
                        .map(|&n| (n, l2_squared(anchor, &self.vectors[n])))
                        .collect();
                    let pruned = Self::closest(&scored, max_conn);
                    self.layers[l]
                        .set_neighbors(neighbor, pruned.iter().map(|&(n, _)| n).collect());
                }
            }

            if let Some(&(closest, _)) = candidates.first() {
                current = closest;
            }
        }

        if level > self.entry_level {
            self.entry_point = Some(slot);
            self.entry_level = level;
        }

        Ok(())
    }

    /// Soft-delete a label. Returns false if the label is absent or
    /// already deleted.
    pub fn mark_delete(&mut self, label: VectorId) -> bool {
        match self.slot_of.remove(&label) {
            Some(slot) => {
                self.deleted.insert(slot);
                true
            }
            None => false,
        }
    }

    /// Top-k search by ascending squared-L2 distance.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(VectorId, f32)> {
        self.search_filtered(query, k, |_| true)
    }

    /// Top-k search restricted to labels accepted by `predicate`.
    ///
    /// The predicate is consulted per candidate label; rejected nodes still
    /// route the traversal. The predicate must not call back into the
    /// engine that owns this index.
    pub fn search_filtered<F>(&self, query: &[f32], k: usize, predicate: F) -> Vec<(VectorId, f32)>
    where
        F: Fn(VectorId) -> bool,
    {
        if k == 0 || query.len() != self.dimension || self.slot_of.is_empty() {
            return Vec::new();
        }
        let Some(entry) = self.entry_point else {
            return Vec::new();
        };

        // Upper layers only route; deletion and the predicate apply to the
        // bottom-layer result set.
        let mut current = entry;
        for l in (1..=self.entry_level).rev() {
            if let Some(&(closest, _)) = self.search_layer(query, current, 1, l, &|_| true).first()
            {
                current = closest;
            }
        }

        let ef = self.ef_search.max(k);
        let accept = |slot: usize| !self.deleted.contains(slot) && predicate(self.labels[slot]);
        let found = self.search_layer(query, current, ef, 0, &accept);

        found
            .into_iter()
            .take(k)
            .map(|(slot, dist)| (self.labels[slot], dist))
            .collect()
    }

    /// Beam search within one layer. Traverses every reachable node but
    /// only slots passing `accept` enter the result set. Returns slots
    /// sorted by ascending distance.
    fn search_layer(
        &self,
        query: &[f32],
        entry: usize,
        ef: usize,
        layer: usize,
        accept: &dyn Fn(usize) -> bool,
    ) -> Vec<(usize, f32)> {
        let mut visited = vec![false; self.vectors.len()];
        // Min-heap of candidates to expand; max-heap of kept results so
        // the worst kept distance is always at the top.
        let mut candidates: BinaryHeap<Reverse<(OrderedFloat<f32>, usize)>> = BinaryHeap::new();
        let mut results: BinaryHeap<(OrderedFloat<f32>, usize)> = BinaryHeap::new();

        let entry_dist = l2_squared(query, &self.vectors[entry]);
        candidates.push(Reverse((OrderedFloat(entry_dist), entry)));
        if accept(entry) {
            results.push((OrderedFloat(entry_dist), entry));
        }
        visited[entry] = true;

        while let Some(Reverse((OrderedFloat(dist), slot))) = candidates.pop() {
            let worst = results.peek().map(|&(d, _)| d.0).unwrap_or(f32::INFINITY);
            if dist > worst && results.len() >= ef {
                break;
            }

            for &neighbor in self.layers[layer].neighbors(slot) {
                if visited[neighbor] {
                    continue;
                }
                visited[neighbor] = true;
                let d = l2_squared(query, &self.vectors[neighbor]);
                if d < worst || results.len() < ef {
                    candidates.push(Reverse((OrderedFloat(d), neighbor)));
                    if accept(neighbor) {
                        results.push((OrderedFloat(d), neighbor));
                        if results.len() > ef {
                            results.pop();
                        }
                    }
                }
            }
        }

        let mut out: Vec<(usize, f32)> = results
            .into_iter()
            .map(|(d, slot)| (slot, d.0))
            .collect();
        out.sort_unstable_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        out
    }

    /// Keep the `max_neighbors` closest candidates.
    fn closest(candidates: &[(usize, f32)], max_neighbors: usize) -> Vec<(usize, f32)> {
        let mut sorted = candidates.to_vec();
        sorted.sort_unstable_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        sorted.truncate(max_neighbors);
        sorted
    }

    /// Serialize the full graph into a byte buffer.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(self.vectors.len() * (self.dimension * 4 + 32));
        w.put_u32(self.dimension as u32);
        w.put_u64(self.capacity as u64);
        w.put_u32(self.m as u32);
        w.put_u32(self.ef_construction as u32);

        w.put_u64(self.vectors.len() as u64);
        for slot in 0..self.vectors.len() {
            w.put_u64(self.labels[slot]);
            w.put_u64(self.node_levels[slot] as u64);
            w.put_u8(u8::from(self.deleted.contains(slot)));
            for &component in &self.vectors[slot] {
                w.put_f32(component);
            }
        }

        match self.entry_point {
            Some(slot) => {
                w.put_u8(1);
                w.put_u64(slot as u64);
                w.put_u64(self.entry_level as u64);
            }
            None => w.put_u8(0),
        }

        w.put_u64(self.layers.len() as u64);
        for layer in &self.layers {
            w.put_u64(layer.connections.len() as u64);
            for neighbors in &layer.connections {
                w.put_u64(neighbors.len() as u64);
                for &n in neighbors {
                    w.put_u64(n as u64);
                }
            }
        }

        w.into_bytes()
    }

    /// Reconstruct a graph from [`to_bytes`](Self::to_bytes) output.
    ///
    /// # Errors
    ///
    /// [`OrionError::Corruption`] on truncation or any structurally
    /// invalid reference (out-of-range slot indexes, bad entry point).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(bytes);

        let dimension = r.get_u32("graph dimension")? as usize;
        let capacity = r.get_u64("graph capacity")? as usize;
        let m = r.get_u32("graph M")? as usize;
        let ef_construction = r.get_u32("graph ef_construction")? as usize;
        if dimension == 0 || m == 0 {
            return Err(OrionError::Corruption(
                "graph header has zero dimension or M".to_string(),
            ));
        }

        let slot_count = r.get_count(dimension * 4 + 17, "graph slot")?;
        let mut vectors = Vec::with_capacity(slot_count);
        let mut labels = Vec::with_capacity(slot_count);
        let mut node_levels = Vec::with_capacity(slot_count);
        let mut deleted = Tombstones::new();
        let mut slot_of = HashMap::new();

        for slot in 0..slot_count {
            let label = r.get_u64("graph label")?;
            let level = r.get_u64("graph node level")? as usize;
            let is_deleted = r.get_u8("graph tombstone flag")? != 0;
            let mut vector = Vec::with_capacity(dimension);
            for _ in 0..dimension {
                vector.push(r.get_f32("graph vector component")?);
            }
            if level > MAX_LEVEL {
                return Err(OrionError::Corruption(format!(
                    "graph node level {level} out of range"
                )));
            }
            if is_deleted {
                deleted.insert(slot);
            } else if slot_of.insert(label, slot).is_some() {
                return Err(OrionError::Corruption(format!(
                    "duplicate live label {label} in graph"
                )));
            }
            vectors.push(vector);
            labels.push(label);
            node_levels.push(level);
        }

        let (entry_point, entry_level) = if r.get_u8("graph entry flag")? != 0 {
            let slot = r.get_u64("graph entry point")? as usize;
            let level = r.get_u64("graph entry level")? as usize;
            if slot >= slot_count || level > MAX_LEVEL {
                return Err(OrionError::Corruption(
                    "graph entry point out of range".to_string(),
                ));
            }
            (Some(slot), level)
        } else {
            (None, 0)
        };

        let layer_count = r.get_count(8, "graph layer")?;
        if layer_count == 0 {
            return Err(OrionError::Corruption("graph has no layers".to_string()));
        }
        let mut layers = Vec::with_capacity(layer_count);
        for _ in 0..layer_count {
            let node_count = r.get_count(8, "graph layer node")?;
            if node_count > slot_count {
                return Err(OrionError::Corruption(
                    "graph layer larger than slot table".to_string(),
                ));
            }
            let mut connections = Vec::with_capacity(node_count);
            for _ in 0..node_count {
                let conn_count = r.get_count(8, "graph connection")?;
                let mut neighbors = Vec::with_capacity(conn_count);
                for _ in 0..conn_count {
                    let n = r.get_u64("graph connection")? as usize;
                    if n >= slot_count {
                        return Err(OrionError::Corruption(format!(
                            "graph connection to slot {n} out of range"
                        )));
                    }
                    neighbors.push(n);
                }
                connections.push(neighbors);
            }
            layers.push(Layer { connections });
        }
        r.expect_end("graph blob")?;

        if entry_level >= layers.len() {
            return Err(OrionError::Corruption(format!(
                "graph entry level {entry_level} exceeds {} layers",
                layers.len()
            )));
        }

        Ok(Self {
            dimension,
            capacity,
            m,
            m_max0: m * 2,
            ef_construction,
            ef_search: DEFAULT_EF_SEARCH,
            ml: 1.0 / (m as f64).ln(),
            layers,
            entry_point,
            entry_level,
            vectors,
            labels,
            node_levels,
            slot_of,
            deleted,
        })
    }
}
