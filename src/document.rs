//! Document factory (C6): projects a chunk into the closed store-bound
//! payload schema, dropping blank string fields and clamping integers to
//! the 32-bit range, matching §3's "Document record" contract.
//!
//! Grounded in the teacher's `types::ChunkRecord`/`Citation` field layout,
//! restructured to the payload's closed key set.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::hashing::{chunk_hash, point_id};
use crate::sparse::SparseVector;

#[derive(Debug, Clone)]
pub struct Chunk {
    pub source_url: String,
    pub title: String,
    pub package: Option<String>,
    pub chunk_index: u32,
    pub text: String,
    pub page_start: Option<i64>,
    pub page_end: Option<i64>,
    pub hash: String,
}

impl Chunk {
    pub fn new(
        source_url: impl Into<String>,
        title: impl Into<String>,
        package: Option<String>,
        chunk_index: u32,
        text: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let source_url = source_url.into();
        let text = text.into();
        let hash = chunk_hash(&source_url, chunk_index, &text)?;
        Ok(Self {
            source_url,
            title: title.into(),
            package,
            chunk_index,
            text,
            page_start: None,
            page_end: None,
            hash,
        })
    }

    /// Safe on-disk filename: `<safe_name>_<chunk_index>_<hash[:12]>.txt`.
    pub fn file_name(&self) -> String {
        format!(
            "{}_{}_{}.txt",
            to_safe_name(&self.source_url),
            self.chunk_index,
            &self.hash[..12.min(self.hash.len())]
        )
    }
}

/// Substitutes any character outside `[A-Za-z0-9._-]` with `_`.
pub fn to_safe_name(url: &str) -> String {
    url.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Closed payload schema written alongside a point's vectors. Unknown
/// fields never reach this struct because construction only happens
/// through `DocumentFactory::build`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentPayload {
    pub doc_content: String,
    pub url: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,
    pub hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_set: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_description: Option<String>,
    pub chunk_index: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_start: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_end: Option<i32>,
}

/// A fully-assembled store-bound document: identity, vectors, payload.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: Uuid,
    pub dense: Vec<f32>,
    pub sparse: SparseVector,
    pub payload: DocumentPayload,
}

/// Drops a string field if blank (after trim), per §3 "String fields must
/// be non-blank to be written".
fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

/// Clamps an integer to the 32-bit range on read, per §3.
fn clamp_i32(value: i64) -> i32 {
    value.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

#[derive(Debug, Clone, Default)]
pub struct DocumentMetadata {
    pub package: Option<String>,
    pub doc_set: Option<String>,
    pub doc_path: Option<String>,
    pub source_name: Option<String>,
    pub source_kind: Option<String>,
    pub doc_version: Option<String>,
    pub doc_type: Option<String>,
    pub file_path: Option<String>,
    pub language: Option<String>,
    pub repo_url: Option<String>,
    pub repo_owner: Option<String>,
    pub repo_name: Option<String>,
    pub repo_key: Option<String>,
    pub repo_branch: Option<String>,
    pub commit_hash: Option<String>,
    pub license: Option<String>,
    pub repo_description: Option<String>,
}

pub struct DocumentFactory;

impl DocumentFactory {
    /// Projects a chunk + its computed vectors into a closed-payload
    /// `Document`, dropping blank strings and clamping integer fields.
    pub fn build(
        chunk: &Chunk,
        dense: Vec<f32>,
        sparse: SparseVector,
        metadata: DocumentMetadata,
    ) -> Document {
        let payload = DocumentPayload {
            doc_content: chunk.text.clone(),
            url: chunk.source_url.clone(),
            title: chunk.title.clone(),
            package: non_blank(chunk.package.clone().or(metadata.package)),
            hash: chunk.hash.clone(),
            doc_set: non_blank(metadata.doc_set),
            doc_path: non_blank(metadata.doc_path),
            source_name: non_blank(metadata.source_name),
            source_kind: non_blank(metadata.source_kind),
            doc_version: non_blank(metadata.doc_version),
            doc_type: non_blank(metadata.doc_type),
            file_path: non_blank(metadata.file_path),
            language: non_blank(metadata.language),
            repo_url: non_blank(metadata.repo_url),
            repo_owner: non_blank(metadata.repo_owner),
            repo_name: non_blank(metadata.repo_name),
            repo_key: non_blank(metadata.repo_key),
            repo_branch: non_blank(metadata.repo_branch),
            commit_hash: non_blank(metadata.commit_hash),
            license: non_blank(metadata.license),
            repo_description: non_blank(metadata.repo_description),
            chunk_index: clamp_i32(chunk.chunk_index as i64),
            page_start: chunk.page_start.map(clamp_i32),
            page_end: chunk.page_end.map(clamp_i32),
        };

        Document {
            id: point_id(&chunk.hash),
            dense,
            sparse,
            payload,
        }
    }
}

/// Projects a raw payload map (as returned by the vector store) back into
/// the closed `DocumentPayload` schema: unknown fields are dropped, integer
/// fields are clamped to the 32-bit range, matching §3's read-time contract.
pub fn project_payload(raw: &std::collections::HashMap<String, serde_json::Value>) -> DocumentPayload {
    use serde_json::Value;

    let str_field = |key: &str| -> String {
        raw.get(key).and_then(Value::as_str).unwrap_or_default().to_string()
    };
    let opt_str_field = |key: &str| -> Option<String> { non_blank(raw.get(key).and_then(Value::as_str).map(str::to_string)) };
    let int_field = |key: &str| -> i32 { raw.get(key).and_then(Value::as_i64).map(clamp_i32).unwrap_or(0) };
    let opt_int_field = |key: &str| -> Option<i32> { raw.get(key).and_then(Value::as_i64).map(clamp_i32) };

    DocumentPayload {
        doc_content: str_field("doc_content"),
        url: str_field("url"),
        title: str_field("title"),
        package: opt_str_field("package"),
        hash: str_field("hash"),
        doc_set: opt_str_field("doc_set"),
        doc_path: opt_str_field("doc_path"),
        source_name: opt_str_field("source_name"),
        source_kind: opt_str_field("source_kind"),
        doc_version: opt_str_field("doc_version"),
        doc_type: opt_str_field("doc_type"),
        file_path: opt_str_field("file_path"),
        language: opt_str_field("language"),
        repo_url: opt_str_field("repo_url"),
        repo_owner: opt_str_field("repo_owner"),
        repo_name: opt_str_field("repo_name"),
        repo_key: opt_str_field("repo_key"),
        repo_branch: opt_str_field("repo_branch"),
        commit_hash: opt_str_field("commit_hash"),
        license: opt_str_field("license"),
        repo_description: opt_str_field("repo_description"),
        chunk_index: int_field("chunk_index"),
        page_start: opt_int_field("page_start"),
        page_end: opt_int_field("page_end"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_name_substitutes_unsafe_chars() {
        assert_eq!(to_safe_name("http://x/a?b=c"), "http___x_a_b_c");
    }

    #[test]
    fn file_name_has_expected_shape() {
        let chunk = Chunk::new("http://x/a", "t", None, 7, "hello").unwrap();
        let name = chunk.file_name();
        assert!(name.starts_with("http___x_a_7_"));
        assert!(name.ends_with(".txt"));
    }

    #[test]
    fn blank_strings_are_dropped_from_payload() {
        let chunk = Chunk::new("http://x/a", "t", None, 0, "hello").unwrap();
        let doc = DocumentFactory::build(
            &chunk,
            vec![0.0],
            SparseVector::default(),
            DocumentMetadata {
                doc_set: Some("   ".to_string()),
                ..Default::default()
            },
        );
        assert!(doc.payload.doc_set.is_none());
    }

    #[test]
    fn chunk_index_clamps_to_i32() {
        let chunk = Chunk::new("http://x/a", "t", None, u32::MAX, "hello").unwrap();
        let doc = DocumentFactory::build(
            &chunk,
            vec![],
            SparseVector::default(),
            DocumentMetadata::default(),
        );
        assert_eq!(doc.payload.chunk_index, i32::MAX);
    }

    #[test]
    fn project_payload_drops_unknown_fields_and_clamps_ints() {
        let mut raw = std::collections::HashMap::new();
        raw.insert("url".to_string(), serde_json::json!("http://x"));
        raw.insert("title".to_string(), serde_json::json!("t"));
        raw.insert("hash".to_string(), serde_json::json!("h"));
        raw.insert("doc_content".to_string(), serde_json::json!("c"));
        raw.insert("chunk_index".to_string(), serde_json::json!(i64::from(i32::MAX) + 100));
        raw.insert("totally_unknown_field".to_string(), serde_json::json!("ignored"));

        let payload = project_payload(&raw);
        assert_eq!(payload.url, "http://x");
        assert_eq!(payload.chunk_index, i32::MAX);
    }

    #[test]
    fn point_id_is_deterministic_from_hash() {
        let chunk1 = Chunk::new("http://x/a", "t", None, 0, "hello").unwrap();
        let chunk2 = Chunk::new("http://x/a", "t", None, 0, "hello").unwrap();
        assert_eq!(point_id(&chunk1.hash), point_id(&chunk2.hash));
    }
}
