//! # OrionDB - Embedded Vector Database
//!
//! OrionDB is an embedded, single-node vector database providing
//! approximate nearest-neighbor search over fixed-dimensional f32 vectors
//! with attached key/value metadata. It links directly into the host
//! application — no server, no network surface — and persists as a single
//! crash-safe file.
//!
//! ## Quick Start
//!
//! ```no_run
//! use oriondb::{Config, Database, Metadata, MetadataValue};
//!
//! fn main() -> oriondb::Result<()> {
//!     // Create a database for 2-dimensional vectors
//!     let db = Database::create("pets.orion", Config::new(2, 1000)?)?;
//!
//!     // Insert vectors with metadata
//!     let mut meta = Metadata::new();
//!     meta.insert("type".to_string(), MetadataValue::from("animal"));
//!     meta.insert("color".to_string(), MetadataValue::from("blue"));
//!     db.add(3, &[0.9, 0.9], meta.clone());
//!
//!     // Filtered nearest-neighbor search
//!     let results = db.query_with_filter(&[0.8, 0.8], 1, &meta);
//!     for hit in results {
//!         println!("id {} at distance {}", hit.id, hit.distance);
//!     }
//!
//!     // Persist atomically, then reload later with Database::load
//!     db.save()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **HNSW index**: approximate nearest-neighbor search with logarithmic
//!   expected query cost and transparent capacity growth
//! - **Metadata filtering**: conjunctive equality filters answered through
//!   an inverted index intersected with the graph traversal
//! - **Single-file storage**: one endian-stable artifact, replaced
//!   atomically on every save
//! - **Concurrent reads**: a reader/writer lock lets queries run in
//!   parallel while writes are serialized

pub mod config;
pub mod database;
pub mod distance;
pub mod error;
pub mod hnsw;
pub mod inverted;
pub mod metadata;
pub mod store;

mod codec;
mod engine;
mod storage;

pub use config::Config;
pub use database::{Database, QueryCacheStats};
pub use engine::QueryResult;
pub use error::{OrionError, Result};
pub use hnsw::GraphIndex;
pub use inverted::{Candidates, InvertedIndex};
pub use metadata::{Metadata, MetadataValue};
pub use store::{PrimaryStore, VectorId, VectorRecord};
pub use storage::{MAGIC, VERSION};
