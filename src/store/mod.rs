pub mod local_store;
pub mod vector_store;

pub use local_store::{LocalChunkStore, ParsedFileEntry};
pub use vector_store::{ScoredPoint, ScrolledPoint, VectorStoreClient, VectorStoreConfig};
