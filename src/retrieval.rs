//! Retrieval facade (C11): version-aware querying, fan-out dedup, rerank,
//! and citation shaping on top of C9/C10.
//!
//! Grounded in the teacher's `rag_engine::RAGEngine::search_comprehensive`
//! for the overall query→search→dedupe→rerank shape; the dedup rule itself
//! is simpler and deterministic (hash-then-url) rather than the teacher's
//! Jaccard-similarity snippet comparison, per §4.9.

use std::collections::HashSet;
use std::sync::Arc;

use regex::Regex;
use tracing::warn;

use crate::document::DocumentPayload;
use crate::embeddings::EmbeddingClient;
use crate::errors::HybridSearchError;
use crate::reranking::CrossEncoderReranker;
use crate::search::engine::{HybridSearchEngine, RetrievalConstraint, RetrievedDocument};

const CITATION_SNIPPET_CAP: usize = 500;

/// `{url, title, metadata_json, snippet≤500}`, per §3's "Citation" type.
#[derive(Debug, Clone)]
pub struct Citation {
    pub url: String,
    pub title: String,
    pub metadata_json: String,
    pub snippet: String,
}

#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub document: RetrievedDocument,
    pub truncated: bool,
    pub original_length: Option<usize>,
}

struct VersionHint {
    raw: String,
    doc_version: String,
}

/// Extracts a coarse `{java|jdk|python} <version>` hint from free text, per
/// §4.9 step 1. Returns `None` when no recognizable version token appears.
fn extract_version_hint(query: &str) -> Option<VersionHint> {
    let pattern = Regex::new(r"(?i)\b(?:java|jdk|python)\s*([0-9]+(?:\.[0-9]+){0,2})\b").expect("static pattern is valid");
    let captures = pattern.captures(query)?;
    let doc_version = captures.get(1)?.as_str().to_string();
    let raw = captures.get(0)?.as_str().to_string();
    Some(VersionHint { raw, doc_version })
}

pub struct RetrievalFacade {
    embeddings: Arc<dyn EmbeddingClient>,
    search: Arc<HybridSearchEngine>,
    reranker: Option<Arc<CrossEncoderReranker>>,
    search_top_k: u64,
    search_return_k: usize,
}

impl RetrievalFacade {
    pub fn new(
        embeddings: Arc<dyn EmbeddingClient>,
        search: Arc<HybridSearchEngine>,
        reranker: Option<Arc<CrossEncoderReranker>>,
        search_top_k: u64,
        search_return_k: usize,
    ) -> Self {
        Self { embeddings, search, reranker, search_top_k, search_return_k }
    }

    /// Runs §4.9's full pipeline: version boost, fan-out search, version
    /// filtering, hash/url dedup, and rerank to `search_return_k`.
    pub async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedDocument>, HybridSearchError> {
        let hint = extract_version_hint(query);
        let boosted_query = match &hint {
            Some(h) => format!("{query} {}", h.raw),
            None => query.to_string(),
        };

        let dense = self
            .embeddings
            .embed(&[boosted_query.clone()])
            .await
            .map_err(|_| HybridSearchError::HybridSearchPartialFailure(0))?
            .into_iter()
            .next()
            .unwrap_or_default();

        let outcome = self.search.search(dense, &boosted_query, self.search_top_k, &RetrievalConstraint::default()).await?;
        let mut documents = outcome.documents;

        if let Some(hint) = &hint {
            let matching: Vec<RetrievedDocument> = documents
                .iter()
                .filter(|d| d.payload.doc_version.as_deref() == Some(hint.doc_version.as_str()))
                .cloned()
                .collect();
            if !matching.is_empty() {
                documents = matching;
            }
        }

        documents = dedupe(documents);
        Ok(self.rerank(query, documents))
    }

    /// `retrieve` followed by a per-document text truncation: keeps the
    /// longest prefix ending at a sentence or newline boundary within
    /// `max_chars_per_doc`, tagging truncated documents per §4.9.
    pub async fn retrieve_with_limit(&self, query: &str, max_docs: usize, max_chars_per_doc: usize) -> Result<Vec<RetrievedChunk>, HybridSearchError> {
        let documents = self.retrieve(query).await?;
        Ok(documents
            .into_iter()
            .take(max_docs)
            .map(|mut document| {
                let original_length = document.payload.doc_content.len();
                if original_length > max_chars_per_doc {
                    document.payload.doc_content = truncate_at_boundary(&document.payload.doc_content, max_chars_per_doc);
                    RetrievedChunk { document, truncated: true, original_length: Some(original_length) }
                } else {
                    RetrievedChunk { document, truncated: false, original_length: None }
                }
            })
            .collect())
    }

    fn rerank(&self, query: &str, documents: Vec<RetrievedDocument>) -> Vec<RetrievedDocument> {
        let Some(reranker) = &self.reranker else {
            let mut documents = documents;
            documents.truncate(self.search_return_k);
            return documents;
        };

        let candidates: Vec<(String, String)> = documents.iter().map(|d| (d.id.to_string(), d.payload.doc_content.clone())).collect();
        match reranker.rerank(query, &candidates, self.search_return_k) {
            Ok(scored) => {
                let mut by_id: std::collections::HashMap<String, RetrievedDocument> =
                    documents.into_iter().map(|d| (d.id.to_string(), d)).collect();
                scored.into_iter().filter_map(|(id, _)| by_id.remove(&id)).collect()
            }
            Err(e) => {
                warn!(error = %e, "cross-encoder reranker unavailable, falling back to fused-score order");
                let mut documents = documents;
                documents.truncate(self.search_return_k);
                documents
            }
        }
    }
}

/// Dedupes by `hash` (first occurrence wins), then by `url` among any
/// remaining entries whose hash is blank, per §4.9 step 5.
fn dedupe(documents: Vec<RetrievedDocument>) -> Vec<RetrievedDocument> {
    let mut seen_hashes = HashSet::new();
    let mut seen_urls = HashSet::new();
    let mut out = Vec::with_capacity(documents.len());

    for document in documents {
        if !document.payload.hash.is_empty() {
            if seen_hashes.insert(document.payload.hash.clone()) {
                out.push(document);
            }
        } else if seen_urls.insert(document.payload.url.clone()) {
            out.push(document);
        }
    }
    out
}

/// Truncates `text` to the last sentence or newline boundary at or before
/// `max_chars`, falling back to a hard cut if no boundary is found.
fn truncate_at_boundary(text: &str, max_chars: usize) -> String {
    if text.len() <= max_chars {
        return text.to_string();
    }
    let cut = text
        .char_indices()
        .map(|(i, _)| i)
        .take_while(|&i| i <= max_chars)
        .last()
        .unwrap_or(0);
    let window = &text[..cut];
    let boundary = window.rfind(['.', '\n']).map(|i| i + 1).unwrap_or(cut);
    window[..boundary].to_string()
}

/// Builds §3's Citation shape: canonicalized URL, Javadoc nested-type/member
/// anchor refinement, and a 500-char snippet with ellipsis.
pub fn build_citation(document: &RetrievedDocument) -> Citation {
    let url = refine_javadoc_url(&canonicalize_url(&document.payload.url), &document.payload.doc_content);
    let snippet = trim_snippet(&document.payload.doc_content);
    Citation {
        url,
        title: document.payload.title.clone(),
        metadata_json: metadata_json(&document.payload),
        snippet,
    }
}

fn canonicalize_url(url: &str) -> String {
    let trimmed = url.trim();
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    }
}

/// Appends a `#ClassName.member` fragment for Javadoc URLs when the chunk
/// text contains a recognizable class/member declaration, per §3's
/// "refined with nested-type and member-anchor fragments" rule.
fn refine_javadoc_url(url: &str, doc_content: &str) -> String {
    if !url.contains("javadoc") && !url.ends_with(".html") {
        return url.to_string();
    }
    let class_pattern = Regex::new(r"(?m)^\s*(?:public|protected)?\s*(?:final\s+|abstract\s+)?(?:class|interface|enum)\s+(\w+)").expect("static pattern is valid");
    let member_pattern = Regex::new(r"(?m)^\s*(?:public|protected)\s+[\w<>\[\], ]+\s+(\w+)\(").expect("static pattern is valid");

    let class_name = class_pattern.captures(doc_content).and_then(|c| c.get(1)).map(|m| m.as_str());
    let member_name = member_pattern.captures(doc_content).and_then(|c| c.get(1)).map(|m| m.as_str());

    match (class_name, member_name) {
        (Some(class), Some(member)) => format!("{url}#{class}.{member}"),
        (Some(class), None) => format!("{url}#{class}"),
        _ => url.to_string(),
    }
}

fn trim_snippet(text: &str) -> String {
    if text.chars().count() <= CITATION_SNIPPET_CAP {
        return text.to_string();
    }
    let truncated: String = text.chars().take(CITATION_SNIPPET_CAP).collect();
    format!("{truncated}...")
}

fn metadata_json(payload: &DocumentPayload) -> String {
    serde_json::to_string(payload).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use uuid::Uuid;

    fn doc(hash: &str, url: &str, score: f32) -> RetrievedDocument {
        RetrievedDocument {
            id: Uuid::new_v4(),
            score,
            collection: "books".to_string(),
            payload: crate::document::project_payload(&{
                let mut m = HashMap::new();
                m.insert("hash".to_string(), serde_json::json!(hash));
                m.insert("url".to_string(), serde_json::json!(url));
                m.insert("title".to_string(), serde_json::json!("t"));
                m.insert("doc_content".to_string(), serde_json::json!("body"));
                m
            }),
        }
    }

    #[test]
    fn version_hint_extracts_java_version() {
        let hint = extract_version_hint("how do records work in Java 21?").unwrap();
        assert_eq!(hint.doc_version, "21");
    }

    #[test]
    fn no_version_hint_when_absent() {
        assert!(extract_version_hint("how do records work?").is_none());
    }

    #[test]
    fn dedupe_keeps_first_by_hash() {
        let docs = vec![doc("h1", "u1", 0.9), doc("h1", "u2", 0.5)];
        let deduped = dedupe(docs);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].payload.url, "u1");
    }

    #[test]
    fn dedupe_falls_back_to_url_when_hash_blank() {
        let docs = vec![doc("", "u1", 0.9), doc("", "u1", 0.5), doc("", "u2", 0.5)];
        let deduped = dedupe(docs);
        assert_eq!(deduped.len(), 2);
    }

    #[test]
    fn truncate_at_boundary_prefers_sentence_end() {
        let text = "First sentence. Second sentence that runs long and gets cut off here.";
        let truncated = truncate_at_boundary(text, 20);
        assert_eq!(truncated, "First sentence.");
    }

    #[test]
    fn truncate_at_boundary_does_not_panic_inside_a_multibyte_char() {
        let text = "caf\u{e9} terrace with a very long description of the view ".repeat(3);
        // byte 3 lands inside the 2-byte 'é' scalar; this must not panic.
        let truncated = truncate_at_boundary(&text, 3);
        assert!(text.starts_with(&truncated));
    }

    #[test]
    fn citation_snippet_is_capped_with_ellipsis() {
        let long_content = "a".repeat(600);
        let mut payload = HashMap::new();
        payload.insert("doc_content".to_string(), serde_json::json!(long_content));
        payload.insert("url".to_string(), serde_json::json!("http://x/docs"));
        payload.insert("title".to_string(), serde_json::json!("t"));
        payload.insert("hash".to_string(), serde_json::json!("h"));
        let document = RetrievedDocument {
            id: Uuid::new_v4(),
            score: 1.0,
            collection: "docs".to_string(),
            payload: crate::document::project_payload(&payload),
        };
        let citation = build_citation(&document);
        assert_eq!(citation.snippet.len(), CITATION_SNIPPET_CAP + 3);
        assert!(citation.snippet.ends_with("..."));
    }

    #[test]
    fn bare_url_is_canonicalized_to_https() {
        assert_eq!(canonicalize_url("example.com/a"), "https://example.com/a");
    }
}
