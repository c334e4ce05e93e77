//! Semantic search over stored documents.
//!
//! # Architecture
//!
//! - `embeddings`: Embedder trait, fastembed model, model cache, batched generator
//! - `index`: In-memory vector index with exact distance ranking and metadata filters
//! - `storage`: Binary file I/O for collection and export files
//! - `store`: Persistent, locked, single-writer collection
//! - `service`: Document-level search façade

pub mod embeddings;
mod errors;
pub mod index;
mod service;
mod storage;
mod store;
#[cfg(test)]
pub mod testing;
mod types;

pub use embeddings::{EmbeddingGenerator, ModelCache, DEFAULT_MODEL};
pub use errors::SearchError;
pub use index::DistanceMetric;
pub use service::{SearchOptions, SemanticSearch, DEFAULT_LIMIT};
pub use store::{CollectionSpec, CollectionStats, UpsertItem, VectorStore};
pub use types::{
    BatchOutcome, Document, FailedItem, Metadata, MetadataFilter, MetadataValue, SearchHit,
};
