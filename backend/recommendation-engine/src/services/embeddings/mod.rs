/// Content embeddings - providers and the item vector index
pub mod index;
pub mod provider;

pub use index::{EmbeddingIndex, EMBEDDING_INDEX_FORMAT_VERSION};
pub use provider::{EmbeddingProvider, HashingEmbeddingProvider, RemoteEmbeddingProvider};
