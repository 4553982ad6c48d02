//! Audit / reconciliation service (C16): compares the locally parsed chunk
//! set for a URL against what the vector store actually holds.
//!
//! No direct teacher analogue reconciles local artifacts against a remote
//! store; this module is new, grounded in the same `tracing`/`anyhow`
//! conventions as `store::local_store` and `store::vector_store`, which it
//! composes.

use std::collections::HashMap;

use anyhow::Result;
use qdrant_client::qdrant::{Condition, Filter};
use tracing::info;

use crate::hashing::chunk_hash;
use crate::routing::Collection;
use crate::store::{LocalChunkStore, VectorStoreClient};

const SAMPLE_CAP: usize = 20;

/// Reconciliation findings for one URL, per §4.15 step 3. Findings are data,
/// never thrown: callers read `ok` rather than matching an error variant.
#[derive(Debug, Clone, Default)]
pub struct AuditReport {
    pub expected_count: usize,
    pub actual_count: usize,
    pub missing_count: usize,
    pub extra_count: usize,
    pub duplicates: Vec<String>,
    pub ok: bool,
    pub missing_sample: Vec<String>,
    pub extra_sample: Vec<String>,
}

pub struct AuditService {
    local: LocalChunkStore,
    store: VectorStoreClient,
    collections: Vec<Collection>,
}

impl AuditService {
    pub fn new(local: LocalChunkStore, store: VectorStoreClient, collections: Vec<Collection>) -> Self {
        Self { local, store, collections }
    }

    /// Runs §4.15's algorithm: recompute local hashes, scroll the store for
    /// `payload.url == url` across every configured collection, and diff the
    /// two hash multisets.
    pub async fn audit_by_url(&self, url: &str) -> Result<AuditReport> {
        let parsed = self.local.parsed_files_for_url(url).await?;
        let mut expected_hashes = Vec::with_capacity(parsed.len());
        for entry in &parsed {
            let hash = chunk_hash(url, entry.chunk_index, &entry.text)?;
            expected_hashes.push(hash);
        }

        let filter = Filter::must([Condition::matches("url", url.to_string())]);
        let mut actual_hashes = Vec::new();
        for collection in &self.collections {
            let points = self.store.scroll(collection.as_str(), filter.clone(), 2048).await?;
            for point in points {
                if let Some(hash) = point.payload.get("hash").and_then(|v| v.as_str()) {
                    actual_hashes.push(hash.to_string());
                }
            }
        }

        let report = diff_hashes(&expected_hashes, &actual_hashes);
        info!(
            url,
            expected = report.expected_count,
            actual = report.actual_count,
            missing = report.missing_count,
            extra = report.extra_count,
            ok = report.ok,
            "audit complete"
        );
        Ok(report)
    }
}

fn diff_hashes(expected: &[String], actual: &[String]) -> AuditReport {
    let mut expected_counts: HashMap<&str, usize> = HashMap::new();
    for h in expected {
        *expected_counts.entry(h.as_str()).or_insert(0) += 1;
    }
    let mut actual_counts: HashMap<&str, usize> = HashMap::new();
    for h in actual {
        *actual_counts.entry(h.as_str()).or_insert(0) += 1;
    }

    let mut missing = Vec::new();
    for (hash, &expected_n) in &expected_counts {
        let actual_n = actual_counts.get(hash).copied().unwrap_or(0);
        if actual_n < expected_n {
            missing.push(hash.to_string());
        }
    }

    let mut extra = Vec::new();
    let mut duplicates = Vec::new();
    for (hash, &actual_n) in &actual_counts {
        let expected_n = expected_counts.get(hash).copied().unwrap_or(0);
        if expected_n == 0 && actual_n > 0 {
            extra.push(hash.to_string());
        }
        if actual_n > 1 {
            duplicates.push(hash.to_string());
        }
    }

    let missing_count = missing.len();
    let extra_count = extra.len();
    missing.sort();
    extra.sort();
    duplicates.sort();

    AuditReport {
        expected_count: expected.len(),
        actual_count: actual.len(),
        missing_count,
        extra_count,
        ok: missing_count == 0 && duplicates.is_empty(),
        missing_sample: missing.into_iter().take(SAMPLE_CAP).collect(),
        extra_sample: extra.into_iter().take(SAMPLE_CAP).collect(),
        duplicates,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_sets_are_ok() {
        let report = diff_hashes(&["h1".to_string(), "h2".to_string()], &["h1".to_string(), "h2".to_string()]);
        assert!(report.ok);
        assert_eq!(report.missing_count, 0);
        assert_eq!(report.extra_count, 0);
    }

    #[test]
    fn missing_hash_fails_audit() {
        // local {h1,h2,h3} vs store {h1,h1,h2}
        let expected = vec!["h1".to_string(), "h2".to_string(), "h3".to_string()];
        let actual = vec!["h1".to_string(), "h1".to_string(), "h2".to_string()];
        let report = diff_hashes(&expected, &actual);
        assert_eq!(report.expected_count, 3);
        assert_eq!(report.actual_count, 3);
        assert_eq!(report.missing_count, 1);
        assert_eq!(report.missing_sample, vec!["h3".to_string()]);
        assert_eq!(report.extra_count, 0);
        assert_eq!(report.duplicates, vec!["h1".to_string()]);
        assert!(!report.ok);
    }

    #[test]
    fn extra_hash_is_reported_but_non_fatal_alone() {
        let expected = vec!["h1".to_string()];
        let actual = vec!["h1".to_string(), "h2".to_string()];
        let report = diff_hashes(&expected, &actual);
        assert_eq!(report.extra_count, 1);
        assert_eq!(report.extra_sample, vec!["h2".to_string()]);
        assert!(report.ok);
    }

    #[test]
    fn sample_lists_cap_at_twenty() {
        let expected: Vec<String> = (0..30).map(|i| format!("h{i}")).collect();
        let actual: Vec<String> = Vec::new();
        let report = diff_hashes(&expected, &actual);
        assert_eq!(report.missing_count, 30);
        assert_eq!(report.missing_sample.len(), SAMPLE_CAP);
    }
}
