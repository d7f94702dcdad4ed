use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown embedding provider: {0}")]
    UnknownProvider(String),

    #[error("unknown local embedding model: {0}")]
    UnknownModel(String),

    #[error("local model {0} requires the `fastembed` feature")]
    FeatureDisabled(String),

    #[error("missing api key for {0}")]
    MissingApiKey(&'static str),

    #[error("invalid value for {key}: {details}")]
    InvalidValue { key: &'static str, details: String },
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("embedding provider failed to initialize: {0}")]
    Init(String),

    #[error("embedding provider unavailable after failed initialization: {0}")]
    Failed(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("provider returned {actual} embeddings for {expected} inputs")]
    CountMismatch { expected: usize, actual: usize },

    #[error("local model error: {0}")]
    Local(String),
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("npy format error: {0}")]
    Npy(String),

    #[error(
        "index corrupted: embeddings={embeddings} documents={documents} metadata={metadata} rows"
    )]
    IndexCorruption {
        embeddings: usize,
        documents: usize,
        metadata: usize,
    },

    #[error("embedding dimension {actual} does not match index dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("search request failed: {0}")]
    Request(String),
}

#[derive(Debug, Error)]
pub enum AnswerError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
