pub mod engine;

pub use engine::{CollectionSet, HybridSearchEngine, SearchOutcome};
