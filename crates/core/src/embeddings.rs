use crate::config::{Settings, DEFAULT_HOSTED_MODEL, DEFAULT_LOCAL_MODEL};
use crate::error::{ConfigError, ProviderError};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use tracing::{info, warn};

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 128;

const LOCAL_BATCH_SIZE: usize = 16;

/// Maps a batch of texts to one vector per text, same order as the input.
/// Vectors need not be normalized.
pub trait Embedder {
    fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, ProviderError>;
}

/// Divides every component by the vector's L2 norm. Zero vectors stay zero.
pub fn l2_normalize(vector: &mut [f32]) {
    let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
    if magnitude > 0.0 {
        for value in vector.iter_mut() {
            *value /= magnitude;
        }
    }
}

/// Hashed character-trigram model. Deterministic and fully offline.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let chars: Vec<char> = text.to_lowercase().chars().collect();

        for window in chars.windows(3) {
            let mut hash = 1469598103934665603u64;
            for ch in window {
                let mut buffer = [0u8; 4];
                for byte in ch.encode_utf8(&mut buffer).bytes() {
                    hash ^= byte as u64;
                    hash = hash.wrapping_mul(1099511628211);
                }
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        l2_normalize(&mut vector);
        vector
    }
}

impl Embedder for CharacterNgramEmbedder {
    fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, ProviderError> {
        Ok(texts.iter().map(|text| self.embed_one(text)).collect())
    }
}

/// Backend lifecycle. A failed initialization is terminal: every later call
/// reports the original failure instead of retrying.
enum Lifecycle<T> {
    Uninitialized,
    Ready(T),
    Failed(String),
}

struct LazyBackend<T> {
    state: Mutex<Lifecycle<T>>,
}

impl<T> LazyBackend<T> {
    fn new() -> Self {
        Self {
            state: Mutex::new(Lifecycle::Uninitialized),
        }
    }

    fn with<R>(
        &self,
        init: impl FnOnce() -> Result<T, ProviderError>,
        call: impl FnOnce(&mut T) -> Result<R, ProviderError>,
    ) -> Result<R, ProviderError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        if let Lifecycle::Uninitialized = *state {
            *state = match init() {
                Ok(backend) => Lifecycle::Ready(backend),
                Err(error) => {
                    warn!(%error, "embedding backend initialization failed");
                    Lifecycle::Failed(error.to_string())
                }
            };
        }

        match &mut *state {
            Lifecycle::Ready(backend) => call(backend),
            Lifecycle::Failed(reason) => Err(ProviderError::Failed(reason.clone())),
            Lifecycle::Uninitialized => Err(ProviderError::Init(
                "backend left uninitialized".to_string(),
            )),
        }
    }

    fn is_ready(&self) -> bool {
        matches!(
            *self.state.lock().unwrap_or_else(PoisonError::into_inner),
            Lifecycle::Ready(_)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalModelKind {
    CharacterNgram,
    #[cfg(feature = "fastembed")]
    Sentence(SentenceModel),
}

#[cfg(feature = "fastembed")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SentenceModel {
    AllMiniLmL6V2,
    ParaphraseMultilingualMiniLmL12V2,
    BgeSmallEnV15,
}

impl LocalModelKind {
    pub fn parse(model: &str) -> Result<Self, ConfigError> {
        let lowered = model.trim().to_lowercase();
        let short = lowered.rsplit('/').next().unwrap_or_default();

        match short {
            "" | DEFAULT_LOCAL_MODEL | "ngram" => Ok(Self::CharacterNgram),
            "all-minilm-l6-v2" | "paraphrase-multilingual-minilm-l12-v2" | "bge-small-en-v1.5" => {
                Self::sentence(short)
            }
            _ => Err(ConfigError::UnknownModel(model.to_string())),
        }
    }

    #[cfg(feature = "fastembed")]
    fn sentence(name: &str) -> Result<Self, ConfigError> {
        let model = match name {
            "all-minilm-l6-v2" => SentenceModel::AllMiniLmL6V2,
            "paraphrase-multilingual-minilm-l12-v2" => {
                SentenceModel::ParaphraseMultilingualMiniLmL12V2
            }
            _ => SentenceModel::BgeSmallEnV15,
        };
        Ok(Self::Sentence(model))
    }

    #[cfg(not(feature = "fastembed"))]
    fn sentence(name: &str) -> Result<Self, ConfigError> {
        Err(ConfigError::FeatureDisabled(name.to_string()))
    }
}

enum LocalBackend {
    CharacterNgram(CharacterNgramEmbedder),
    #[cfg(feature = "fastembed")]
    Sentence(fastembed::TextEmbedding),
}

impl LocalBackend {
    fn load(kind: LocalModelKind) -> Result<Self, ProviderError> {
        match kind {
            LocalModelKind::CharacterNgram => {
                Ok(Self::CharacterNgram(CharacterNgramEmbedder::default()))
            }
            #[cfg(feature = "fastembed")]
            LocalModelKind::Sentence(model) => {
                let model = match model {
                    SentenceModel::AllMiniLmL6V2 => fastembed::EmbeddingModel::AllMiniLML6V2,
                    SentenceModel::ParaphraseMultilingualMiniLmL12V2 => {
                        fastembed::EmbeddingModel::ParaphraseMLMiniLML12V2
                    }
                    SentenceModel::BgeSmallEnV15 => fastembed::EmbeddingModel::BGESmallENV15,
                };
                let options =
                    fastembed::InitOptions::new(model).with_show_download_progress(false);
                fastembed::TextEmbedding::try_new(options)
                    .map(Self::Sentence)
                    .map_err(|error| ProviderError::Init(error.to_string()))
            }
        }
    }

    fn embed(&mut self, texts: &[&str]) -> Result<Vec<Vec<f32>>, ProviderError> {
        match self {
            Self::CharacterNgram(model) => model.embed(texts),
            #[cfg(feature = "fastembed")]
            Self::Sentence(model) => model
                .embed(texts.to_vec(), Some(LOCAL_BATCH_SIZE))
                .map_err(|error| ProviderError::Local(error.to_string())),
        }
    }
}

/// In-process embedding model, loaded on first use.
pub struct LocalEmbedder {
    kind: LocalModelKind,
    backend: LazyBackend<LocalBackend>,
}

impl LocalEmbedder {
    pub fn new(kind: LocalModelKind) -> Self {
        Self {
            kind,
            backend: LazyBackend::new(),
        }
    }

    pub fn kind(&self) -> LocalModelKind {
        self.kind
    }

    pub fn is_loaded(&self) -> bool {
        self.backend.is_ready()
    }
}

impl Embedder for LocalEmbedder {
    fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let kind = self.kind;
        self.backend.with(
            || {
                info!(model = ?kind, "loading local embedding model");
                LocalBackend::load(kind)
            },
            |backend| {
                let mut vectors = Vec::with_capacity(texts.len());
                for batch in texts.chunks(LOCAL_BATCH_SIZE) {
                    vectors.extend(backend.embed(batch)?);
                }
                Ok(vectors)
            },
        )
    }
}

/// OpenAI-compatible `/embeddings` endpoint. The HTTP client carrying the
/// credentials is built on first use.
pub struct HostedEmbedder {
    api_key: String,
    endpoint: String,
    model: String,
    client: LazyBackend<Client>,
}

impl HostedEmbedder {
    pub fn new(
        api_key: impl Into<String>,
        base_url: &str,
        model: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ConfigError::MissingApiKey("hosted embeddings"));
        }

        Ok(Self {
            api_key,
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            model: model.into(),
            client: LazyBackend::new(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_client(&self) -> Result<Client, ProviderError> {
        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Bearer {}", self.api_key.trim()))
            .map_err(|error| ProviderError::Init(format!("invalid api key: {error}")))?;
        headers.insert(AUTHORIZATION, auth);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        Ok(Client::builder().default_headers(headers).build()?)
    }
}

impl Embedder for HostedEmbedder {
    fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        self.client.with(
            || self.build_client(),
            |client| {
                let request = EmbeddingRequest {
                    model: &self.model,
                    input: texts,
                };
                let response = client.post(&self.endpoint).json(&request).send()?;
                let status = response.status();
                if !status.is_success() {
                    let body = response
                        .text()
                        .unwrap_or_else(|_| "<body unavailable>".to_string());
                    return Err(ProviderError::BackendResponse {
                        backend: self.endpoint.clone(),
                        details: format!("{status}: {body}"),
                    });
                }

                let parsed: EmbeddingResponse = response.json()?;
                parsed.into_vectors(texts.len())
            },
        )
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

impl EmbeddingResponse {
    fn into_vectors(mut self, expected: usize) -> Result<Vec<Vec<f32>>, ProviderError> {
        if self.data.len() != expected {
            return Err(ProviderError::CountMismatch {
                expected,
                actual: self.data.len(),
            });
        }
        self.data.sort_by_key(|entry| entry.index);
        Ok(self.data.into_iter().map(|entry| entry.embedding).collect())
    }
}

/// Embedding backend chosen once from configuration.
pub enum EmbeddingProvider {
    Local(LocalEmbedder),
    Hosted(HostedEmbedder),
}

impl EmbeddingProvider {
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        match settings.embedding_provider.trim().to_lowercase().as_str() {
            "local" => Ok(Self::Local(LocalEmbedder::new(LocalModelKind::parse(
                &settings.embedding_model,
            )?))),
            "openai" | "hosted" => {
                let model = match settings.embedding_model.trim() {
                    "" | DEFAULT_LOCAL_MODEL => DEFAULT_HOSTED_MODEL,
                    other => other,
                };
                Ok(Self::Hosted(HostedEmbedder::new(
                    settings.openai_api_key.clone(),
                    &settings.openai_base_url,
                    model,
                )?))
            }
            other => Err(ConfigError::UnknownProvider(other.to_string())),
        }
    }

    pub fn label(&self) -> String {
        match self {
            Self::Local(local) => format!("local ({:?})", local.kind()),
            Self::Hosted(hosted) => format!("hosted ({})", hosted.model()),
        }
    }
}

impl Embedder for EmbeddingProvider {
    fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, ProviderError> {
        match self {
            Self::Local(local) => local.embed(texts),
            Self::Hosted(hosted) => hosted.embed(texts),
        }
    }
}
