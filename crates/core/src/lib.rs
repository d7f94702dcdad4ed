pub mod answer;
pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod ingest;
pub mod lexical;
pub mod models;
pub mod normalizer;
pub mod orchestrator;
pub mod retriever;
pub mod store;
pub mod stores;
pub mod traits;

pub use answer::{Answer, AnswerGenerator, ChatClient, Provenance, RagChain};
pub use chunking::{ChunkingConfig, Window};
pub use config::Settings;
pub use embeddings::{
    CharacterNgramEmbedder, Embedder, EmbeddingProvider, HostedEmbedder, LocalEmbedder,
    LocalModelKind,
};
pub use error::{AnswerError, ConfigError, IngestError, ProviderError, SearchError};
pub use extractor::{inspect_pdf, LopdfExtractor, PageExtractor, PdfStats};
pub use ingest::{
    bundled_metadata, count_chunks, discover_pdf_files, index_corpus, index_pdf, rebuild_index,
    ChunkCount, IndexingReport, IngestionPipeline, SkippedPdf,
};
pub use lexical::Bm25Index;
pub use models::{ChunkMetadata, ChunkRecord, DefaultMetadata, IngestionOptions, RetrievalHit};
pub use normalizer::{normalize_whitespace, TextNormalizer};
pub use orchestrator::{AskCoordinator, AskOutcome};
pub use retriever::{ContextOptions, HybridRetriever, RetrievedContext};
pub use store::{IndexFiles, IndexSnapshot};
pub use stores::FlatVectorStore;
pub use traits::VectorIndex;
