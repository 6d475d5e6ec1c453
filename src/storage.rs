//! Atomic single-file persistence.
//!
//! A database artifact is one file: magic and format version, the config,
//! the primary store section, then the framed inverted-index and graph
//! blobs. Every save serializes the full state into memory, writes it to a
//! sibling `.tmp` file, forces it to stable storage, and renames it over
//! the target path — a reader always observes either the previous or the
//! new artifact, never a partial write.

use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::codec::{Reader, Writer};
use crate::config::Config;
use crate::engine::Engine;
use crate::error::{OrionError, Result};
use crate::hnsw::GraphIndex;
use crate::inverted::InvertedIndex;
use crate::store::PrimaryStore;

/// Magic bytes identifying a database artifact.
pub const MAGIC: &[u8; 8] = b"ORIONDB2";

/// Current file format version.
pub const VERSION: u32 = 2;

fn temp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

/// Serialize `engine` and atomically replace the artifact at `path`.
pub(crate) fn save_engine(engine: &Engine, path: &Path) -> Result<()> {
    let graph_blob = engine.graph().to_bytes();

    let mut primary = Writer::new();
    engine.store().encode_into(&mut primary);
    let primary_blob = primary.into_bytes();

    let mut inverted = Writer::new();
    engine.postings().encode_into(&mut inverted);
    let inverted_blob = inverted.into_bytes();

    let mut w = Writer::with_capacity(
        MAGIC.len() + 24 + primary_blob.len() + inverted_blob.len() + graph_blob.len(),
    );
    w.put_bytes(MAGIC);
    w.put_u32(VERSION);
    w.put_u32(engine.config().dimension);
    w.put_u64(engine.config().capacity);
    // The primary section carries its own count; the index and graph
    // blobs are framed so they can be skipped or parsed independently.
    w.put_bytes(&primary_blob);
    w.put_framed(&inverted_blob);
    w.put_framed(&graph_blob);
    let bytes = w.into_bytes();

    let tmp = temp_path(path);
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(&bytes)?;
        file.flush()?;
        // Durability barrier: fsync on POSIX, FlushFileBuffers on Windows.
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;

    debug!(
        path = %path.display(),
        bytes = bytes.len(),
        vectors = engine.store().len(),
        "database saved"
    );
    Ok(())
}

/// Read and verify the artifact at `path`, reconstructing the engine.
pub(crate) fn load_engine(path: &Path) -> Result<Engine> {
    let bytes = fs::read(path)?;
    let mut r = Reader::new(&bytes);

    let magic = r.take(MAGIC.len(), "file magic")?;
    if magic != MAGIC {
        if magic.starts_with(b"ORIONDB") {
            warn!(path = %path.display(), "rejecting artifact with unsupported format magic");
            return Err(OrionError::InvalidDatabase(format!(
                "unsupported format {:?} (expected {:?})",
                String::from_utf8_lossy(magic),
                String::from_utf8_lossy(MAGIC),
            )));
        }
        return Err(OrionError::InvalidDatabase(
            "unrecognized file magic".to_string(),
        ));
    }
    let version = r.get_u32("format version")?;
    if version != VERSION {
        return Err(OrionError::InvalidDatabase(format!(
            "unsupported format version {version} (expected {VERSION})"
        )));
    }

    let dimension = r.get_u32("config dimension")?;
    let capacity = r.get_u64("config capacity")?;
    let config = Config::new(dimension, capacity)
        .map_err(|e| OrionError::Corruption(format!("invalid stored config: {e}")))?;

    let store = PrimaryStore::decode(&mut r)?;
    for (id, record) in store.iter() {
        if record.vector.len() != config.dim() {
            return Err(OrionError::Corruption(format!(
                "vector {id} has {} components, expected {}",
                record.vector.len(),
                config.dim()
            )));
        }
    }

    let inverted_blob = r.get_framed("inverted index section")?;
    let mut inverted_reader = Reader::new(inverted_blob);
    let postings = InvertedIndex::decode(&mut inverted_reader)?;
    inverted_reader.expect_end("inverted index section")?;

    let graph_blob = r.get_framed("graph section")?;
    let graph = GraphIndex::from_bytes(graph_blob)?;
    if graph.dimension() != config.dim() {
        return Err(OrionError::Corruption(format!(
            "graph dimension {} disagrees with config dimension {}",
            graph.dimension(),
            config.dim()
        )));
    }
    r.expect_end("database artifact")?;

    let engine = Engine::from_parts(config, store, postings, graph)?;
    info!(
        path = %path.display(),
        vectors = engine.store().len(),
        dimension,
        "database loaded"
    );
    Ok(engine)
}
