pub mod audit;
pub mod chunking;
pub mod config;
pub mod document;
pub mod embeddings;
pub mod errors;
pub mod hashing;
pub mod health;
pub mod ingest;
pub mod pdf;
pub mod provider_router;
pub mod rate_limit;
pub mod reranking;
pub mod request_factory;
pub mod retrieval;
pub mod routing;
pub mod search;
pub mod sparse;
pub mod store;
pub mod streaming;
pub mod telemetry;

pub use config::RagCoreConfig;
pub use ingest::IngestPipeline;
pub use retrieval::{Citation, RetrievalFacade};
pub use streaming::{StreamChunk, StreamingEngine};

pub use anyhow::{Error, Result};
pub use uuid::Uuid;
