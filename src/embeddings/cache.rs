//! Content-addressed embedding cache (C21): `sha256(content) ++
//! sha256(metadata) → vector`, lock-striped via `dashmap`, gzip-persisted.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Builds the cache key from the content and its serialized metadata.
pub fn cache_key(content: &str, metadata: &str) -> String {
    format!("{}{}", sha256_hex(content.as_bytes()), sha256_hex(metadata.as_bytes()))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    key: String,
    vector: Vec<f32>,
}

pub struct EmbeddingCache {
    entries: DashMap<String, Vec<f32>>,
    path: PathBuf,
    flush_threshold: usize,
    entries_since_flush: std::sync::atomic::AtomicUsize,
}

impl EmbeddingCache {
    pub fn new(path: impl Into<PathBuf>, flush_threshold: usize) -> Self {
        let path = path.into();
        let entries = Self::load(&path);
        Self {
            entries,
            path,
            flush_threshold: flush_threshold.max(1),
            entries_since_flush: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Loads from a gzip JSON file, tolerating a missing or corrupt file by
    /// starting with an empty cache (per §4.20).
    fn load(path: &Path) -> DashMap<String, Vec<f32>> {
        let map = DashMap::new();
        let file = match std::fs::File::open(path) {
            Ok(f) => f,
            Err(_) => return map,
        };

        let mut decoder = flate2::read::GzDecoder::new(file);
        let mut buf = String::new();
        if decoder.read_to_string(&mut buf).is_err() {
            warn!(path = %path.display(), "embedding cache file is corrupt, starting empty");
            return map;
        }

        match serde_json::from_str::<Vec<CacheEntry>>(&buf) {
            Ok(entries) => {
                for entry in entries {
                    map.insert(entry.key, entry.vector);
                }
            }
            Err(_) => warn!(path = %path.display(), "embedding cache file is not valid JSON, starting empty"),
        }
        map
    }

    pub fn get(&self, key: &str) -> Option<Vec<f32>> {
        self.entries.get(key).map(|v| v.clone())
    }

    /// Inserts a new entry and flushes if the threshold-trigger is reached.
    pub fn put(&self, key: String, vector: Vec<f32>) {
        self.entries.insert(key, vector);
        let count = self.entries_since_flush.fetch_add(1, std::sync::atomic::Ordering::Relaxed) + 1;
        if count >= self.flush_threshold {
            self.entries_since_flush.store(0, std::sync::atomic::Ordering::Relaxed);
            if let Err(e) = self.flush() {
                warn!(error = %e, "threshold-triggered embedding cache flush failed");
            }
        }
    }

    /// Writes the current cache contents to the gzip JSON file, creating
    /// parent directories as needed.
    pub fn flush(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let snapshot: Vec<CacheEntry> = self
            .entries
            .iter()
            .map(|entry| CacheEntry { key: entry.key().clone(), vector: entry.value().clone() })
            .collect();
        let json = serde_json::to_vec(&snapshot)?;

        let file = std::fs::File::create(&self.path)?;
        let mut encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        encoder.write_all(&json)?;
        encoder.finish()?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Spawns the 2-minute persistence timer described in §4.20, on top of
    /// the threshold-triggered flush in `put`. Returns a handle the caller
    /// can abort, and should also flush once more on graceful shutdown.
    pub fn spawn_periodic_flush(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(120));
            loop {
                interval.tick().await;
                if let Err(e) = self.flush() {
                    warn!(error = %e, "periodic embedding cache flush failed");
                }
            }
        })
    }
}
