//! Ingest pipeline (C8): orchestrates C1–C7 plus the vector-store upsert,
//! with hash-based dedup and a force-reingest bypass.
//!
//! Grounded in the teacher's `rag_engine::RAGEngine` orchestration style
//! (facade composing narrower components, `anyhow::Context` at the
//! boundary) but built around this crate's chunk/hash/document/route
//! pipeline rather than the teacher's monolithic ingest path.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::chunking::chunk as chunk_text;
use crate::document::{Chunk, Document, DocumentFactory, DocumentMetadata};
use crate::embeddings::cache::{cache_key, EmbeddingCache};
use crate::embeddings::EmbeddingClient;
use crate::errors::IngestError;
use crate::pdf::PdfPage;
use crate::routing::{route, Collection};
use crate::sparse::sparse_encode;
use crate::store::{LocalChunkStore, VectorStoreClient};

const DEFAULT_MAX_TOKENS: usize = 900;
const DEFAULT_OVERLAP_TOKENS: usize = 150;

/// The result of chunking + dedup-checking a source, before vectorization.
/// `documents` here are the not-yet-upserted chunks; `upsert` is the
/// separate step that vectorizes, routes, and writes them.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub documents: Vec<Chunk>,
    pub total_chunks: usize,
    pub skipped_chunks: usize,
}

pub struct IngestPipeline {
    local: LocalChunkStore,
    store: VectorStoreClient,
    embeddings: Arc<dyn EmbeddingClient>,
    cache: Option<Arc<EmbeddingCache>>,
    max_tokens: usize,
    overlap_tokens: usize,
}

impl IngestPipeline {
    pub fn new(
        local: LocalChunkStore,
        store: VectorStoreClient,
        embeddings: Arc<dyn EmbeddingClient>,
        cache: Option<Arc<EmbeddingCache>>,
    ) -> Self {
        Self {
            local,
            store,
            embeddings,
            cache,
            max_tokens: DEFAULT_MAX_TOKENS,
            overlap_tokens: DEFAULT_OVERLAP_TOKENS,
        }
    }

    /// Chunks plain text with the default 900/150 token window, skipping any
    /// chunk already marked ingested.
    pub async fn process_and_store(&self, text: &str, url: &str, title: &str, package: Option<String>) -> Result<IngestOutcome, IngestError> {
        self.process_and_store_inner(text, url, title, package, false).await
    }

    /// Same as `process_and_store` but ignores ingest markers, used after a
    /// prior-vector deletion for a changed source.
    pub async fn process_and_store_force(&self, text: &str, url: &str, title: &str, package: Option<String>) -> Result<IngestOutcome, IngestError> {
        self.process_and_store_inner(text, url, title, package, true).await
    }

    async fn process_and_store_inner(
        &self,
        text: &str,
        url: &str,
        title: &str,
        package: Option<String>,
        force: bool,
    ) -> Result<IngestOutcome, IngestError> {
        let pieces = chunk_text(text, self.max_tokens, self.overlap_tokens);
        let inputs = pieces.into_iter().enumerate().map(|(i, t)| (i as u32, t, None, None)).collect();
        self.build_outcome(inputs, url, title, package, force).await
    }

    /// Chunks a PDF's extracted pages, each page independently (900/0, no
    /// cross-page overlap), tagging every resulting chunk with its source
    /// page number.
    pub async fn process_pdf_and_store_with_pages(
        &self,
        pages: &[PdfPage],
        url: &str,
        title: &str,
        package: Option<String>,
    ) -> Result<IngestOutcome, IngestError> {
        self.process_pdf_inner(pages, url, title, package, false).await
    }

    pub async fn process_pdf_and_store_with_pages_force(
        &self,
        pages: &[PdfPage],
        url: &str,
        title: &str,
        package: Option<String>,
    ) -> Result<IngestOutcome, IngestError> {
        self.process_pdf_inner(pages, url, title, package, true).await
    }

    async fn process_pdf_inner(
        &self,
        pages: &[PdfPage],
        url: &str,
        title: &str,
        package: Option<String>,
        force: bool,
    ) -> Result<IngestOutcome, IngestError> {
        let mut inputs = Vec::new();
        let mut index = 0u32;
        for page in pages {
            let pieces = chunk_text(&page.text, self.max_tokens, 0);
            for piece in pieces {
                inputs.push((index, piece, Some(page.page_number as i64), Some(page.page_number as i64)));
                index += 1;
            }
        }
        self.build_outcome(inputs, url, title, package, force).await
    }

    async fn build_outcome(
        &self,
        inputs: Vec<(u32, String, Option<i64>, Option<i64>)>,
        url: &str,
        title: &str,
        package: Option<String>,
        force: bool,
    ) -> Result<IngestOutcome, IngestError> {
        let total_chunks = inputs.len();
        let mut documents = Vec::with_capacity(total_chunks);
        let mut skipped_chunks = 0;

        for (index, text, page_start, page_end) in inputs {
            let mut chunk = Chunk::new(url, title, package.clone(), index, text).map_err(IngestError::Store)?;
            chunk.page_start = page_start;
            chunk.page_end = page_end;

            if !force && self.local.is_hash_ingested(&chunk.hash).await {
                skipped_chunks += 1;
                continue;
            }

            self.local
                .save_chunk_text(url, index, &chunk.text, &chunk.hash)
                .await
                .map_err(IngestError::Store)?;
            documents.push(chunk);
        }

        info!(url, total_chunks, skipped_chunks, "chunked and staged source for upsert");
        Ok(IngestOutcome { documents, total_chunks, skipped_chunks })
    }

    /// Vectorizes (dense via C4, with cache lookups; sparse via C3), builds
    /// each document's typed payload, routes it to a collection via C7, and
    /// upserts per collection. `mark_hash_ingested` runs only after its
    /// collection's upsert is acknowledged, per §4.7's ordering guarantee.
    pub async fn upsert(
        &self,
        chunks: &[Chunk],
        metadata: &DocumentMetadata,
        doc_set: &str,
        doc_path: &str,
        doc_type: &str,
    ) -> Result<(), IngestError> {
        if chunks.is_empty() {
            return Ok(());
        }

        let metadata_fingerprint = format!("{metadata:?}");
        let dense_vectors = self.dense_vectors_with_cache(chunks, &metadata_fingerprint).await?;

        let mut by_collection: HashMap<Collection, Vec<(Document, String)>> = HashMap::new();
        for (chunk, dense) in chunks.iter().zip(dense_vectors.into_iter()) {
            let sparse = sparse_encode(&chunk.text);
            let document = DocumentFactory::build(chunk, dense, sparse, metadata.clone());
            let collection = route(doc_set, doc_path, doc_type, &chunk.source_url);
            by_collection.entry(collection).or_default().push((document, chunk.hash.clone()));
        }

        for (collection, docs_with_hash) in by_collection {
            self.store.ensure_collection(collection.as_str()).await.map_err(IngestError::Store)?;
            let documents: Vec<Document> = docs_with_hash.iter().map(|(d, _)| d.clone()).collect();
            self.store
                .upsert(collection.as_str(), &documents)
                .await
                .map_err(IngestError::Store)?;

            for (_, hash) in &docs_with_hash {
                if let Err(e) = self.local.mark_hash_ingested(hash).await {
                    warn!(hash, error = %e, "upsert acknowledged but marking ingested failed, will retry next run");
                }
            }
        }

        Ok(())
    }

    async fn dense_vectors_with_cache(&self, chunks: &[Chunk], metadata_fingerprint: &str) -> Result<Vec<Vec<f32>>, IngestError> {
        let mut dense_vectors: Vec<Option<Vec<f32>>> = vec![None; chunks.len()];
        let mut keys = Vec::with_capacity(chunks.len());
        let mut miss_indices = Vec::new();
        let mut miss_texts = Vec::new();

        for (i, chunk) in chunks.iter().enumerate() {
            let key = cache_key(&chunk.text, metadata_fingerprint);
            if let Some(cache) = &self.cache {
                if let Some(vector) = cache.get(&key) {
                    dense_vectors[i] = Some(vector);
                    keys.push(key);
                    continue;
                }
            }
            miss_indices.push(i);
            miss_texts.push(chunk.text.clone());
            keys.push(key);
        }

        if !miss_texts.is_empty() {
            let embedded = self.embeddings.embed(&miss_texts).await?;
            for (slot, vector) in miss_indices.into_iter().zip(embedded) {
                if let Some(cache) = &self.cache {
                    cache.put(keys[slot].clone(), vector.clone());
                }
                dense_vectors[slot] = Some(vector);
            }
        }

        Ok(dense_vectors.into_iter().map(|v| v.unwrap_or_default()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedEmbeddingClient {
        dimension: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingClient for FixedEmbeddingClient {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, crate::errors::EmbeddingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts.iter().map(|_| vec![0.1; self.dimension]).collect())
        }

        fn dimension(&self) -> usize {
            self.dimension
        }
    }

    fn temp_dir(label: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("ragcore-ingest-{label}-{}", uuid::Uuid::new_v4()))
    }

    fn pipeline(embeddings: Arc<dyn EmbeddingClient>) -> IngestPipeline {
        let dir = temp_dir("local");
        let local = LocalChunkStore::new(dir.join("parsed"), dir.join("ingested"));
        let config = crate::store::VectorStoreConfig {
            host: "localhost".to_string(),
            grpc_port: 6334,
            use_tls: false,
            api_key: None,
            dense_vector_name: "dense".to_string(),
            sparse_vector_name: "sparse".to_string(),
            dense_dim: 4,
        };
        let store = VectorStoreClient::connect(config).expect("static config always connects lazily");
        IngestPipeline::new(local, store, embeddings, None)
    }

    #[tokio::test]
    async fn process_and_store_chunks_and_persists() {
        let embeddings: Arc<dyn EmbeddingClient> = Arc::new(FixedEmbeddingClient { dimension: 4, calls: AtomicUsize::new(0) });
        let pipeline = pipeline(embeddings);
        let text: String = (0..2100).map(|i| format!("w{i} ")).collect();

        let outcome = pipeline.process_and_store(&text, "http://x/doc", "t", None).await.unwrap();
        assert_eq!(outcome.total_chunks, 3);
        assert_eq!(outcome.skipped_chunks, 0);
        assert_eq!(outcome.documents.len(), 3);
    }

    #[tokio::test]
    async fn second_run_skips_already_ingested_chunks() {
        let embeddings: Arc<dyn EmbeddingClient> = Arc::new(FixedEmbeddingClient { dimension: 4, calls: AtomicUsize::new(0) });
        let pipeline = pipeline(embeddings);
        let text: String = (0..2100).map(|i| format!("w{i} ")).collect();

        let first = pipeline.process_and_store(&text, "http://x/doc", "t", None).await.unwrap();
        for chunk in &first.documents {
            pipeline.local.mark_hash_ingested(&chunk.hash).await.unwrap();
        }

        let second = pipeline.process_and_store(&text, "http://x/doc", "t", None).await.unwrap();
        assert_eq!(second.total_chunks, 3);
        assert_eq!(second.skipped_chunks, 3);
        assert!(second.documents.is_empty());
    }

    #[tokio::test]
    async fn force_variant_ignores_markers() {
        let embeddings: Arc<dyn EmbeddingClient> = Arc::new(FixedEmbeddingClient { dimension: 4, calls: AtomicUsize::new(0) });
        let pipeline = pipeline(embeddings);
        let text = "hello world";

        let first = pipeline.process_and_store(text, "http://x/doc", "t", None).await.unwrap();
        for chunk in &first.documents {
            pipeline.local.mark_hash_ingested(&chunk.hash).await.unwrap();
        }

        let forced = pipeline.process_and_store_force(text, "http://x/doc", "t", None).await.unwrap();
        assert_eq!(forced.skipped_chunks, 0);
        assert_eq!(forced.documents.len(), 1);
    }

    #[tokio::test]
    async fn pdf_chunks_tag_page_numbers() {
        let embeddings: Arc<dyn EmbeddingClient> = Arc::new(FixedEmbeddingClient { dimension: 4, calls: AtomicUsize::new(0) });
        let pipeline = pipeline(embeddings);
        let pages = vec![
            PdfPage { page_number: 1, text: "first page text".to_string() },
            PdfPage { page_number: 2, text: "second page text".to_string() },
        ];

        let outcome = pipeline.process_pdf_and_store_with_pages(&pages, "http://x/doc.pdf", "t", None).await.unwrap();
        assert_eq!(outcome.documents.len(), 2);
        assert_eq!(outcome.documents[0].page_start, Some(1));
        assert_eq!(outcome.documents[1].page_start, Some(2));
    }
}
