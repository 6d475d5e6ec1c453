//! Primary vector storage.
//!
//! The [`PrimaryStore`] is the authoritative mapping from [`VectorId`] to
//! vector payload and metadata. The inverted index and the graph index are
//! both derived from it: rebuilds and persistence walk this store as the
//! source of truth. Iteration is key-ordered so that saving produces the
//! same bytes for the same logical state.

use std::collections::BTreeMap;

use crate::codec::{Reader, Writer};
use crate::error::Result;
use crate::metadata::Metadata;

/// Opaque 64-bit vector identifier, unique within a database.
pub type VectorId = u64;

/// Vector payload and metadata stored under one id.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub vector: Vec<f32>,
    pub metadata: Metadata,
}

/// Authoritative `VectorId -> (vector, metadata)` map.
#[derive(Debug, Default)]
pub struct PrimaryStore {
    records: BTreeMap<VectorId, VectorRecord>,
}

impl PrimaryStore {
    pub fn new() -> Self {
        Self {
            records: BTreeMap::new(),
        }
    }

    /// Insert a record, returning the displaced record if the id existed.
    pub fn insert_or_replace(
        &mut self,
        id: VectorId,
        vector: Vec<f32>,
        metadata: Metadata,
    ) -> Option<VectorRecord> {
        self.records.insert(id, VectorRecord { vector, metadata })
    }

    /// Remove a record, returning it if the id existed.
    pub fn erase(&mut self, id: VectorId) -> Option<VectorRecord> {
        self.records.remove(&id)
    }

    pub fn get(&self, id: VectorId) -> Option<&VectorRecord> {
        self.records.get(&id)
    }

    pub fn contains(&self, id: VectorId) -> bool {
        self.records.contains_key(&id)
    }

    /// Key-ordered iteration over all records.
    pub fn iter(&self) -> impl Iterator<Item = (&VectorId, &VectorRecord)> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Encode as `u64 count` then key-ordered entries of
    /// `{ id, vec_len, f32 payload, meta_count, (key, tagged value)* }`.
    pub(crate) fn encode_into(&self, w: &mut Writer) {
        w.put_u64(self.records.len() as u64);
        for (id, record) in &self.records {
            w.put_u64(*id);
            w.put_u64(record.vector.len() as u64);
            for &component in &record.vector {
                w.put_f32(component);
            }
            w.put_u64(record.metadata.len() as u64);
            for (key, value) in &record.metadata {
                w.put_string(key);
                w.put_value(value);
            }
        }
    }

    pub(crate) fn decode(r: &mut Reader<'_>) -> Result<Self> {
        let count = r.get_count(8, "primary store entry")?;
        let mut records = BTreeMap::new();
        for _ in 0..count {
            let id = r.get_u64("vector id")?;
            let vec_len = r.get_count(4, "vector length")?;
            let mut vector = Vec::with_capacity(vec_len);
            for _ in 0..vec_len {
                vector.push(r.get_f32("vector component")?);
            }
            let meta_count = r.get_count(1, "metadata pair count")?;
            let mut metadata = Metadata::new();
            for _ in 0..meta_count {
                let key = r.get_string("metadata key")?;
                let value = r.get_value("metadata value")?;
                metadata.insert(key, value);
            }
            records.insert(id, VectorRecord { vector, metadata });
        }
        Ok(Self { records })
    }
}
