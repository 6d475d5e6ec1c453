//! Metadata inverted index.
//!
//! Maps each metadata key to a map of values, each value holding the sorted
//! set of vector ids carrying that exact `(key, value)` pair — a posting
//! list. Filtered queries intersect the posting lists for every clause of a
//! conjunctive equality filter to produce the candidate set handed to the
//! graph search as a predicate.
//!
//! The index is kept exactly in sync with the primary store: an id appears
//! under `(k, v)` if and only if the stored metadata for that id maps `k`
//! to `v`. Empty posting lists and empty key entries are pruned on removal
//! so that lookup misses are distinguishable from empty intersections.

use std::collections::{BTreeMap, BTreeSet};

use crate::codec::{Reader, Writer};
use crate::error::Result;
use crate::metadata::{Metadata, MetadataValue};
use crate::store::VectorId;

/// Outcome of a filter intersection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Candidates {
    /// Some filter clause referenced a key or value with no postings at
    /// all; the query result is empty without touching the graph.
    AllMissing,
    /// The intersection of all clause posting lists (possibly empty).
    Ids(BTreeSet<VectorId>),
}

impl Candidates {
    pub fn is_empty(&self) -> bool {
        match self {
            Candidates::AllMissing => true,
            Candidates::Ids(ids) => ids.is_empty(),
        }
    }
}

/// `key -> (value -> sorted id set)` posting lists.
#[derive(Debug, Default)]
pub struct InvertedIndex {
    postings: BTreeMap<String, BTreeMap<MetadataValue, BTreeSet<VectorId>>>,
}

impl InvertedIndex {
    pub fn new() -> Self {
        Self {
            postings: BTreeMap::new(),
        }
    }

    /// Insert `id` into the posting list of every `(key, value)` in `meta`.
    pub fn add(&mut self, id: VectorId, meta: &Metadata) {
        for (key, value) in meta {
            self.postings
                .entry(key.clone())
                .or_default()
                .entry(value.clone())
                .or_default()
                .insert(id);
        }
    }

    /// Remove `id` from every `(key, value)` posting list in `meta`,
    /// pruning entries that become empty.
    pub fn remove(&mut self, id: VectorId, meta: &Metadata) {
        for (key, value) in meta {
            if let Some(by_value) = self.postings.get_mut(key) {
                if let Some(ids) = by_value.get_mut(value) {
                    ids.remove(&id);
                    if ids.is_empty() {
                        by_value.remove(value);
                    }
                }
                if by_value.is_empty() {
                    self.postings.remove(key);
                }
            }
        }
    }

    /// Intersect the posting lists of every clause in `filter`.
    ///
    /// Callers handle the empty filter (match-everything) before reaching
    /// this method. The smallest posting list drives the intersection.
    pub fn intersect(&self, filter: &Metadata) -> Candidates {
        debug_assert!(!filter.is_empty(), "empty filter bypasses the index");

        let mut lists: Vec<&BTreeSet<VectorId>> = Vec::with_capacity(filter.len());
        for (key, value) in filter {
            let Some(ids) = self.postings.get(key).and_then(|m| m.get(value)) else {
                return Candidates::AllMissing;
            };
            lists.push(ids);
        }

        lists.sort_by_key(|ids| ids.len());
        let Some((smallest, rest)) = lists.split_first() else {
            return Candidates::AllMissing;
        };
        let ids = smallest
            .iter()
            .copied()
            .filter(|id| rest.iter().all(|list| list.contains(id)))
            .collect();
        Candidates::Ids(ids)
    }

    /// Number of keys with at least one posting.
    pub fn key_count(&self) -> usize {
        self.postings.len()
    }

    /// Total number of `(key, value, id)` postings.
    pub fn posting_count(&self) -> usize {
        self.postings
            .values()
            .flat_map(|by_value| by_value.values())
            .map(|ids| ids.len())
            .sum()
    }

    /// Encode as `u64 outer_count`, then per key: string key,
    /// `u64 inner_count`, per value: tagged value, `u64 id_count`,
    /// ascending ids.
    pub(crate) fn encode_into(&self, w: &mut Writer) {
        w.put_u64(self.postings.len() as u64);
        for (key, by_value) in &self.postings {
            w.put_string(key);
            w.put_u64(by_value.len() as u64);
            for (value, ids) in by_value {
                w.put_value(value);
                w.put_u64(ids.len() as u64);
                for id in ids {
                    w.put_u64(*id);
                }
            }
        }
    }

    pub(crate) fn decode(r: &mut Reader<'_>) -> Result<Self> {
        let outer_count = r.get_count(8, "inverted index key")?;
        let mut postings = BTreeMap::new();
        for _ in 0..outer_count {
            let key = r.get_string("inverted index key")?;
            let inner_count = r.get_count(1, "inverted index value")?;
            let mut by_value = BTreeMap::new();
            for _ in 0..inner_count {
                let value = r.get_value("inverted index value")?;
                let id_count = r.get_count(8, "posting list id")?;
                let mut ids = BTreeSet::new();
                for _ in 0..id_count {
                    ids.insert(r.get_u64("posting list id")?);
                }
                by_value.insert(value, ids);
            }
            postings.insert(key, by_value);
        }
        Ok(Self { postings })
    }
}
