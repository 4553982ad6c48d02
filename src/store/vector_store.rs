//! Vector store wire client: named dense/sparse vectors, prefetch+RRF
//! query fusion, scroll API (§6). gRPC backs the hot-path upsert/query;
//! REST backs scroll/health, via the fixed port mapping.
//!
//! Grounded in the teacher's `storage::lance_store::LanceStore` for
//! orchestration style (method surface, `tracing`, `anyhow::Context`) and in
//! `other_examples/…Garvis…rag-mod.rs.rs`'s gRPC/REST client split for the
//! general shape of a Qdrant-backed store; the wire-level request shapes
//! follow §6 of the spec directly.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use qdrant_client::qdrant::{
    Condition, CreateCollectionBuilder, Distance, Filter, NamedVectors, PointStruct,
    PrefetchQueryBuilder, Query, QueryPointsBuilder, ScrollPointsBuilder, SearchParamsBuilder,
    SparseIndexParamsBuilder, SparseVectorParamsBuilder, UpsertPointsBuilder, Value as QdrantValue,
    Vector, VectorParamsBuilder, VectorsConfigBuilder, WithPayloadSelector,
};
use qdrant_client::Qdrant;
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::document::Document;
use crate::sparse::SparseVector;

/// Maps a configured gRPC port to its REST counterpart, per the spec's
/// fixed mapping, falling back to 443 when TLS is enabled.
pub fn rest_port(grpc_port: u16, use_tls: bool) -> u16 {
    if use_tls {
        return 443;
    }
    match grpc_port {
        6334 => 6333,
        8086 => 8087,
        other => other,
    }
}

#[derive(Debug, Clone)]
pub struct VectorStoreConfig {
    pub host: String,
    pub grpc_port: u16,
    pub use_tls: bool,
    pub api_key: Option<String>,
    pub dense_vector_name: String,
    pub sparse_vector_name: String,
    pub dense_dim: u64,
}

#[derive(Debug, Clone)]
pub struct ScoredPoint {
    pub id: Uuid,
    pub score: f32,
    pub payload: HashMap<String, JsonValue>,
}

#[derive(Debug, Clone)]
pub struct ScrolledPoint {
    pub id: Uuid,
    pub payload: HashMap<String, JsonValue>,
}

pub struct VectorStoreClient {
    client: Qdrant,
    config: VectorStoreConfig,
}

impl VectorStoreClient {
    pub fn connect(config: VectorStoreConfig) -> Result<Self> {
        let scheme = if config.use_tls { "https" } else { "http" };
        let url = format!("{scheme}://{}:{}", config.host, config.grpc_port);
        let mut builder = Qdrant::from_url(&url);
        if let Some(key) = &config.api_key {
            builder = builder.api_key(key.clone());
        }
        let client = builder.build().context("connecting to vector store")?;
        Ok(Self { client, config })
    }

    pub fn rest_base_url(&self) -> String {
        let scheme = if self.config.use_tls { "https" } else { "http" };
        format!(
            "{scheme}://{}:{}",
            self.config.host,
            rest_port(self.config.grpc_port, self.config.use_tls)
        )
    }

    /// Creates `collection` with named `dense`/`sparse` vector configs if it
    /// does not already exist. Idempotent.
    pub async fn ensure_collection(&self, collection: &str) -> Result<()> {
        let mut vectors_config = VectorsConfigBuilder::default();
        vectors_config.add_named_vector_params(
            &self.config.dense_vector_name,
            VectorParamsBuilder::new(self.config.dense_dim, Distance::Cosine).build(),
        );

        let create = CreateCollectionBuilder::new(collection)
            .vectors_config(vectors_config)
            .sparse_vectors_config(qdrant_client::qdrant::SparseVectorsConfigBuilder::default().add_named_vector_params(
                &self.config.sparse_vector_name,
                SparseVectorParamsBuilder::default().index(SparseIndexParamsBuilder::default()),
            ));

        match self.client.create_collection(create).await {
            Ok(_) => {
                info!(collection, "created collection");
                Ok(())
            }
            Err(e) => {
                // Idempotent: a pre-existing collection is not an error.
                debug!(collection, error = %e, "create_collection returned an error, assuming it already exists");
                Ok(())
            }
        }
    }

    /// Upserts a batch of documents with named dense/sparse vectors and
    /// their closed payload, per §6's `upsert` wire shape.
    pub async fn upsert(&self, collection: &str, documents: &[Document]) -> Result<()> {
        if documents.is_empty() {
            return Ok(());
        }

        let points: Vec<PointStruct> = documents
            .iter()
            .map(|doc| {
                let mut vectors = NamedVectors::default();
                vectors.insert(self.config.dense_vector_name.clone(), Vector::new_dense(doc.dense.clone()));
                if !doc.sparse.indices.is_empty() {
                    vectors.insert(
                        self.config.sparse_vector_name.clone(),
                        Vector::new_sparse(doc.sparse.indices.clone(), doc.sparse.values.clone()),
                    );
                }

                let payload_json = serde_json::to_value(&doc.payload).unwrap_or(JsonValue::Null);
                let payload: qdrant_client::Payload = payload_json.try_into().unwrap_or_default();

                PointStruct::new(doc.id.to_string(), vectors, payload)
            })
            .collect();

        self.client
            .upsert_points(UpsertPointsBuilder::new(collection, points))
            .await
            .with_context(|| format!("upserting {} points into {collection}", documents.len()))?;
        Ok(())
    }

    /// Runs the two-stage prefetch (dense + sparse) with RRF fusion query
    /// described in §4.8, with a per-call timeout.
    pub async fn query(
        &self,
        collection: &str,
        dense: &[f32],
        sparse: &SparseVector,
        filter: Option<Filter>,
        prefetch_limit: u64,
        rrf_k: u64,
        top_k: u64,
        timeout: Duration,
    ) -> Result<Vec<ScoredPoint>> {
        let mut dense_prefetch = PrefetchQueryBuilder::default()
            .query(Query::new_nearest(Vector::new_dense(dense.to_vec())))
            .using(self.config.dense_vector_name.clone())
            .limit(prefetch_limit);
        if let Some(f) = filter.clone() {
            dense_prefetch = dense_prefetch.filter(f);
        }

        let mut builder = QueryPointsBuilder::new(collection)
            .add_prefetch(dense_prefetch)
            .query(Query::new_fusion_rrf(rrf_k as usize))
            .with_payload(WithPayloadSelector::from(true))
            .limit(top_k)
            .params(SearchParamsBuilder::default());

        if !sparse.indices.is_empty() {
            let mut sparse_prefetch = PrefetchQueryBuilder::default()
                .query(Query::new_nearest(Vector::new_sparse(
                    sparse.indices.clone(),
                    sparse.values.clone(),
                )))
                .using(self.config.sparse_vector_name.clone())
                .limit(prefetch_limit);
            if let Some(f) = filter.clone() {
                sparse_prefetch = sparse_prefetch.filter(f);
            }
            builder = builder.add_prefetch(sparse_prefetch);
        }

        if let Some(f) = filter {
            builder = builder.filter(f);
        }

        let response = tokio::time::timeout(timeout, self.client.query(builder))
            .await
            .context("collection query timed out")?
            .with_context(|| format!("querying collection {collection}"))?;

        let points = response
            .result
            .into_iter()
            .filter_map(|point| {
                let id = point_uuid(&point.id)?;
                Some(ScoredPoint {
                    id,
                    score: point.score,
                    payload: point.payload.into_iter().map(|(k, v)| (k, qdrant_value_to_json(v))).collect(),
                })
            })
            .collect();

        Ok(points)
    }

    /// Server-side-filtered scroll, capped at `limit` (≤2048), per §4.15.
    pub async fn scroll(&self, collection: &str, filter: Filter, limit: u32) -> Result<Vec<ScrolledPoint>> {
        let limit = limit.min(2048);
        let request = ScrollPointsBuilder::new(collection)
            .filter(filter)
            .limit(limit)
            .with_payload(WithPayloadSelector::from(true));

        let response = self
            .client
            .scroll(request)
            .await
            .with_context(|| format!("scrolling collection {collection}"))?;

        if response.next_page_offset.is_some() && response.result.len() as u32 >= limit {
            warn!(collection, "scroll result may be truncated at the single-page limit");
        }

        Ok(response
            .result
            .into_iter()
            .filter_map(|point| {
                let id = point_uuid(&point.id)?;
                Some(ScrolledPoint {
                    id,
                    payload: point.payload.into_iter().map(|(k, v)| (k, qdrant_value_to_json(v))).collect(),
                })
            })
            .collect())
    }

    /// Deletes all points matching `payload.url == url`, used before a
    /// force-reingest (open question 3, resolved in DESIGN.md).
    pub async fn delete_by_url(&self, collection: &str, url: &str) -> Result<()> {
        let filter = Filter::must([Condition::matches("url", url.to_string())]);
        self.client
            .delete_points(
                qdrant_client::qdrant::DeletePointsBuilder::new(collection)
                    .points(qdrant_client::qdrant::PointsSelector::from(filter)),
            )
            .await
            .with_context(|| format!("deleting points with url={url} from {collection}"))?;
        Ok(())
    }
}

fn point_uuid(id: &Option<qdrant_client::qdrant::PointId>) -> Option<Uuid> {
    let id = id.as_ref()?;
    match &id.point_id_options {
        Some(qdrant_client::qdrant::point_id::PointIdOptions::Uuid(s)) => Uuid::parse_str(s).ok(),
        Some(qdrant_client::qdrant::point_id::PointIdOptions::Num(_)) => None,
        None => None,
    }
}

/// Converts a wire `Value` (qdrant's own protobuf `Value`/`Struct`/`ListValue`
/// triad, not `serde_json::Value`) into `serde_json::Value` by hand — the
/// proto type has no `Serialize` impl to borrow.
fn qdrant_value_to_json(value: QdrantValue) -> JsonValue {
    use qdrant_client::qdrant::value::Kind;

    match value.kind {
        Some(Kind::NullValue(_)) | None => JsonValue::Null,
        Some(Kind::BoolValue(b)) => JsonValue::Bool(b),
        Some(Kind::IntegerValue(i)) => JsonValue::Number(i.into()),
        Some(Kind::DoubleValue(d)) => serde_json::Number::from_f64(d).map(JsonValue::Number).unwrap_or(JsonValue::Null),
        Some(Kind::StringValue(s)) => JsonValue::String(s),
        Some(Kind::ListValue(list)) => JsonValue::Array(list.values.into_iter().map(qdrant_value_to_json).collect()),
        Some(Kind::StructValue(st)) => JsonValue::Object(st.fields.into_iter().map(|(k, v)| (k, qdrant_value_to_json(v))).collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rest_port_maps_known_grpc_ports() {
        assert_eq!(rest_port(6334, false), 6333);
        assert_eq!(rest_port(8086, false), 8087);
    }

    #[test]
    fn rest_port_uses_443_over_tls() {
        assert_eq!(rest_port(6334, true), 443);
    }

    #[test]
    fn rest_port_passes_through_unknown_ports() {
        assert_eq!(rest_port(9999, false), 9999);
    }
}
