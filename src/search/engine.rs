//! Hybrid search fan-out (C9): per-collection dense+sparse prefetch with
//! server-side RRF fusion, fanned out concurrently across collections, with
//! per-collection timeouts and strict/partial-failure handling.
//!
//! Grounded in the teacher's `rag_engine::RAGEngine::search_single_query`
//! for the overall fan-out/merge orchestration shape, adapted from a
//! single-table vector+FTS search into an N-collection vector-store fan-out.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use qdrant_client::qdrant::{Condition, Filter};
use uuid::Uuid;

use crate::document::{project_payload, DocumentPayload};
use crate::errors::{CollectionSearchFailure, FailureKind, HybridSearchError};
use crate::sparse::{sparse_encode, SparseVector};
use crate::store::vector_store::VectorStoreClient;

#[derive(Debug, Clone, Default)]
pub struct RetrievalConstraint {
    pub doc_version: Option<String>,
    pub source_kind: Option<String>,
    pub doc_type: Option<String>,
    pub source_name: Option<String>,
}

impl RetrievalConstraint {
    fn to_filter(&self) -> Option<Filter> {
        let mut conditions = Vec::new();
        if let Some(v) = &self.doc_version {
            conditions.push(Condition::matches("doc_version", v.clone()));
        }
        if let Some(v) = &self.source_kind {
            conditions.push(Condition::matches("source_kind", v.clone()));
        }
        if let Some(v) = &self.doc_type {
            conditions.push(Condition::matches("doc_type", v.clone()));
        }
        if let Some(v) = &self.source_name {
            conditions.push(Condition::matches("source_name", v.clone()));
        }
        if conditions.is_empty() {
            None
        } else {
            Some(Filter::must(conditions))
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetrievedDocument {
    pub id: Uuid,
    pub score: f32,
    pub collection: String,
    pub payload: DocumentPayload,
}

#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    pub documents: Vec<RetrievedDocument>,
    pub notices: Vec<CollectionSearchFailure>,
}

/// Core + dynamically discovered collections fanned out to on each query.
/// §9's open question 2 (refresh cadence) is resolved here: discovery is
/// re-run once per `search()` call rather than on a background timer.
pub struct CollectionSet {
    core: Vec<String>,
    discovery: Option<Arc<dyn CollectionDiscovery>>,
}

#[async_trait::async_trait]
pub trait CollectionDiscovery: Send + Sync {
    async fn discover(&self) -> Vec<String>;
}

impl CollectionSet {
    pub fn new(core: Vec<String>) -> Self {
        Self { core, discovery: None }
    }

    pub fn with_discovery(mut self, discovery: Arc<dyn CollectionDiscovery>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    async fn resolve(&self) -> Vec<String> {
        let mut collections = self.core.clone();
        if let Some(discovery) = &self.discovery {
            for extra in discovery.discover().await {
                if !collections.contains(&extra) {
                    collections.push(extra);
                }
            }
        }
        collections
    }
}

pub struct HybridSearchEngine {
    store: Arc<VectorStoreClient>,
    collections: CollectionSet,
    prefetch_limit: u64,
    rrf_k: u64,
    per_collection_timeout: Duration,
    fail_on_partial_search_error: bool,
}

impl HybridSearchEngine {
    pub fn new(
        store: Arc<VectorStoreClient>,
        collections: CollectionSet,
        prefetch_limit: u64,
        rrf_k: u64,
        per_collection_timeout: Duration,
        fail_on_partial_search_error: bool,
    ) -> Self {
        Self {
            store,
            collections,
            prefetch_limit,
            rrf_k,
            per_collection_timeout,
            fail_on_partial_search_error,
        }
    }

    /// Runs the hybrid search described in §4.8: encode, fan out, merge by
    /// point-id keeping the higher score on collision, truncate to `top_k`.
    pub async fn search(
        &self,
        dense: Vec<f32>,
        query_text: &str,
        top_k: u64,
        constraint: &RetrievalConstraint,
    ) -> Result<SearchOutcome, HybridSearchError> {
        let sparse: SparseVector = sparse_encode(query_text);
        let filter = constraint.to_filter();
        let collections = self.collections.resolve().await;

        let mut tasks = Vec::with_capacity(collections.len());
        for collection in &collections {
            let store = Arc::clone(&self.store);
            let collection = collection.clone();
            let dense = dense.clone();
            let sparse = sparse.clone();
            let filter = filter.clone();
            let timeout = self.per_collection_timeout;
            let prefetch_limit = self.prefetch_limit;
            let rrf_k = self.rrf_k;
            tasks.push(tokio::spawn(async move {
                let result = store
                    .query(&collection, &dense, &sparse, filter, prefetch_limit, rrf_k, top_k, timeout)
                    .await;
                (collection, result)
            }));
        }

        let mut merged: HashMap<Uuid, RetrievedDocument> = HashMap::new();
        let mut notices = Vec::new();

        for task in tasks {
            match task.await {
                Ok((collection, Ok(points))) => {
                    for point in points {
                        let payload = project_payload(&point.payload);
                        let candidate = RetrievedDocument {
                            id: point.id,
                            score: point.score,
                            collection: collection.clone(),
                            payload,
                        };
                        merged
                            .entry(point.id)
                            .and_modify(|existing| {
                                if candidate.score > existing.score {
                                    *existing = candidate.clone();
                                }
                            })
                            .or_insert(candidate);
                    }
                }
                Ok((collection, Err(e))) => {
                    notices.push(CollectionSearchFailure::new(collection, FailureKind::Execution, e.to_string()));
                }
                Err(join_error) => {
                    notices.push(CollectionSearchFailure::new("<unknown>", FailureKind::Interrupted, join_error.to_string()));
                }
            }
        }

        if self.fail_on_partial_search_error && !notices.is_empty() {
            return Err(HybridSearchError::HybridSearchPartialFailure(notices.len()));
        }

        let mut documents: Vec<RetrievedDocument> = merged.into_values().collect();
        documents.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        documents.truncate(top_k as usize);

        Ok(SearchOutcome { documents, notices })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constraint_with_no_fields_has_no_filter() {
        assert!(RetrievalConstraint::default().to_filter().is_none());
    }

    #[test]
    fn constraint_with_a_field_builds_a_filter() {
        let constraint = RetrievalConstraint { doc_version: Some("21".to_string()), ..Default::default() };
        assert!(constraint.to_filter().is_some());
    }

    #[test]
    fn merge_keeps_higher_scored_duplicate() {
        // Mirrors scenario 4: two collections return the same point-id with
        // fused scores 0.8 and 0.7; the surviving document keeps 0.8.
        let id = Uuid::new_v4();
        let mut merged: HashMap<Uuid, RetrievedDocument> = HashMap::new();
        let low = RetrievedDocument { id, score: 0.7, collection: "a".to_string(), payload: empty_payload() };
        let high = RetrievedDocument { id, score: 0.8, collection: "b".to_string(), payload: empty_payload() };

        merged.insert(id, low);
        merged
            .entry(id)
            .and_modify(|existing| {
                if high.score > existing.score {
                    *existing = high.clone();
                }
            })
            .or_insert(high);

        let winner = merged.get(&id).unwrap();
        assert_eq!(winner.score, 0.8);
        assert_eq!(winner.collection, "b");
    }

    fn empty_payload() -> DocumentPayload {
        project_payload(&HashMap::new())
    }
}
