pub mod chunker;
pub mod config;
pub mod documents;
pub mod embedding;
pub mod error;
pub mod index;
pub mod ledger;
pub mod manager;
pub mod store;
pub mod vector_ops;

pub use chunker::{chunk_document, Chunk, ChunkParams};
pub use config::RagConfig;
pub use documents::{DirectoryDocumentSource, DocumentSource, InMemoryDocumentSource, SourceDocument};
pub use embedding::{Embedder, HashingEmbedder, LazyEmbedder, OllamaEmbedder};
pub use error::{RagError, Result};
pub use index::{FlatL2Index, Neighbor};
pub use ledger::Ledger;
pub use manager::{format_context, IndexSummary, RagRegistry, RetrievedChunk};
pub use store::{FsIndexStore, IndexStore, MemoryIndexStore, UserIndexState};
