//! Local chunk store (C5): filesystem-backed parsed-chunk and
//! ingested-marker artifacts.
//!
//! Grounded in the teacher's `storage::lance_store::LanceStore` for method
//! surface and `tracing`/`anyhow::Context` conventions, restyled around
//! plain filesystem I/O instead of an embedded database.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::document::to_safe_name;

pub struct LocalChunkStore {
    parsed_dir: PathBuf,
    ingested_dir: PathBuf,
}

impl LocalChunkStore {
    pub fn new(parsed_dir: impl Into<PathBuf>, ingested_dir: impl Into<PathBuf>) -> Self {
        Self {
            parsed_dir: parsed_dir.into(),
            ingested_dir: ingested_dir.into(),
        }
    }

    fn chunk_path(&self, url: &str, index: u32, hash: &str) -> PathBuf {
        let short_hash = &hash[..12.min(hash.len())];
        self.parsed_dir
            .join(format!("{}_{}_{}.txt", to_safe_name(url), index, short_hash))
    }

    fn marker_path(&self, hash: &str) -> PathBuf {
        self.ingested_dir.join(hash)
    }

    /// Persists chunk text under `parsed/`. Creates parent directories on
    /// the write path, per §4.5 "all writes create parent directories on
    /// exit paths". Malformed UTF-8 is impossible for a `&str` argument, so
    /// callers are responsible for lossy-decoding bytes before calling this.
    pub async fn save_chunk_text(&self, url: &str, index: u32, text: &str, hash: &str) -> Result<PathBuf> {
        let path = self.chunk_path(url, index, hash);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating parsed dir {}", parent.display()))?;
        }
        tokio::fs::write(&path, text)
            .await
            .with_context(|| format!("writing chunk file {}", path.display()))?;
        debug!(path = %path.display(), "saved chunk text");
        Ok(path)
    }

    pub async fn is_hash_ingested(&self, hash: &str) -> bool {
        tokio::fs::metadata(self.marker_path(hash)).await.is_ok()
    }

    /// Marks `hash` ingested. Must only be called after a successful vector
    /// store upsert acknowledgment (§4.7 ordering guarantee).
    pub async fn mark_hash_ingested(&self, hash: &str) -> Result<()> {
        let path = self.marker_path(hash);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating ingested dir {}", parent.display()))?;
        }
        tokio::fs::write(&path, b"")
            .await
            .with_context(|| format!("writing ingested marker {}", path.display()))?;
        Ok(())
    }

    /// Enumerates parsed files matching `safe(url) + "_<digits>_<12hex>.txt"`,
    /// for the audit service (C16).
    pub async fn parsed_files_for_url(&self, url: &str) -> Result<Vec<ParsedFileEntry>> {
        let prefix = to_safe_name(url);
        let mut entries = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.parsed_dir).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
            Err(e) => return Err(e).context("reading parsed dir"),
        };

        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(parsed) = parse_chunk_file_name(&name, &prefix) {
                let text = tokio::fs::read_to_string(entry.path())
                    .await
                    .unwrap_or_else(|_| String::from_utf8_lossy(&std::fs::read(entry.path()).unwrap_or_default()).into_owned());
                entries.push(ParsedFileEntry {
                    chunk_index: parsed.0,
                    short_hash: parsed.1,
                    text,
                });
            }
        }
        Ok(entries)
    }
}

#[derive(Debug, Clone)]
pub struct ParsedFileEntry {
    pub chunk_index: u32,
    pub short_hash: String,
    pub text: String,
}

fn parse_chunk_file_name(name: &str, prefix: &str) -> Option<(u32, String)> {
    let rest = name.strip_prefix(prefix)?.strip_prefix('_')?;
    let rest = rest.strip_suffix(".txt")?;
    let (index_str, hash) = rest.split_once('_')?;
    if hash.len() != 12 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let index: u32 = index_str.parse().ok()?;
    Some((index, hash.to_string()))
}

pub fn default_parsed_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("parsed")
}

pub fn default_ingested_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("ingested")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_and_check_ingested_roundtrip() {
        let dir = tempdir();
        let store = LocalChunkStore::new(dir.join("parsed"), dir.join("ingested"));
        let hash = "abcdef0123456789abcdef0123456789abcdef0123456789abcdef01234567";

        assert!(!store.is_hash_ingested(hash).await);
        store.save_chunk_text("http://x/a", 0, "hello world", hash).await.unwrap();
        store.mark_hash_ingested(hash).await.unwrap();
        assert!(store.is_hash_ingested(hash).await);
    }

    #[tokio::test]
    async fn parsed_files_for_url_matches_naming_convention() {
        let dir = tempdir();
        let store = LocalChunkStore::new(dir.join("parsed"), dir.join("ingested"));
        let hash = "abcdef0123456789abcdef0123456789abcdef0123456789abcdef01234567";
        store.save_chunk_text("http://x/a", 3, "hello", hash).await.unwrap();

        let entries = store.parsed_files_for_url("http://x/a").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].chunk_index, 3);
        assert_eq!(entries[0].text, "hello");
    }

    fn tempdir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("ragcore-test-{}", uuid::Uuid::new_v4()));
        dir
    }
}
