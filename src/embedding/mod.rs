//! Embedding backends and provider selection.
//!
//! Every backend implements [`hs_match_core::embedding::Embedder`]; the
//! engine only ever holds an `Arc<dyn Embedder>`.
//!
//! - **`hashing`**: [`HashingEmbedder`] from the core crate. Offline and
//!   deterministic, the default.
//! - **`openai`**: [`OpenAIEmbedder`] calls `POST /v1/embeddings`.
//! - **`ollama`**: [`OllamaEmbedder`] calls a local Ollama instance's `/api/embed`.
//! - **`local`**: `LocalEmbedder` runs a model in-process via fastembed
//!   (feature `local-embeddings-fastembed`).
//!
//! # Provider Selection
//!
//! ```rust
//! # use hs_match::config::EmbeddingConfig;
//! # use hs_match::embedding::create_embedder;
//! let config = EmbeddingConfig::default(); // provider = "hashing"
//! let embedder = create_embedder(&config).unwrap();
//! assert_eq!(embedder.dims(), 256);
//! ```
//!
//! # Failure Handling
//!
//! Backends make exactly one attempt per call. Connection failures and
//! non-2xx statuses surface as [`EmbedError::Unavailable`]; malformed bodies
//! as [`EmbedError::InvalidResponse`]. Retrying is left to the caller, and
//! the overall deadline is enforced by the engine, not here.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use hs_match_core::embedding::{Embedder, HashingEmbedder};
use hs_match_core::error::EmbedError;

use crate::config::EmbeddingConfig;

const OPENAI_DEFAULT_URL: &str = "https://api.openai.com/v1";
const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";

/// Create the [`Embedder`] selected by `config.provider`.
///
/// | Config Value | Backend |
/// |-------------|---------|
/// | `"hashing"` | [`HashingEmbedder`] |
/// | `"openai"` | [`OpenAIEmbedder`] |
/// | `"ollama"` | [`OllamaEmbedder`] |
/// | `"local"` | `LocalEmbedder` (feature `local-embeddings-fastembed`) |
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "hashing" => Ok(Arc::new(HashingEmbedder::new(
            config.dims.unwrap_or(HashingEmbedder::DEFAULT_DIMS),
        ))),
        "openai" => Ok(Arc::new(OpenAIEmbedder::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(LocalEmbedder::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!(
            "Local embedding provider requires: --features local-embeddings-fastembed"
        ),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

fn http_client(config: &EmbeddingConfig) -> Result<reqwest::Client> {
    // Per-request socket timeout; the engine applies the end-to-end deadline.
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(config.embedding_timeout_seconds.max(1)))
        .build()?)
}

async fn post_json(
    request: reqwest::RequestBuilder,
    backend: &str,
) -> Result<serde_json::Value, EmbedError> {
    let response = request
        .send()
        .await
        .map_err(|e| EmbedError::Unavailable(format!("{} request failed: {}", backend, e)))?;

    let status = response.status();
    if !status.is_success() {
        let body_text = response.text().await.unwrap_or_default();
        return Err(EmbedError::Unavailable(format!(
            "{} API error {}: {}",
            backend, status, body_text
        )));
    }

    response
        .json()
        .await
        .map_err(|e| EmbedError::InvalidResponse(format!("{} returned non-JSON body: {}", backend, e)))
}

fn parse_vector(value: &serde_json::Value, backend: &str) -> Result<Vec<f32>, EmbedError> {
    value
        .as_array()
        .ok_or_else(|| {
            EmbedError::InvalidResponse(format!("{} embedding is not an array", backend))
        })?
        .iter()
        .map(|v| {
            v.as_f64().map(|x| x as f32).ok_or_else(|| {
                EmbedError::InvalidResponse(format!("{} embedding has a non-numeric value", backend))
            })
        })
        .collect()
}

// ============ OpenAI ============

/// Embedder backed by the OpenAI embeddings API.
///
/// Reads the API key from `OPENAI_API_KEY`. `embedding.url` overrides the
/// API base (for compatible gateways).
pub struct OpenAIEmbedder {
    model: String,
    dims: usize,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAIEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let base_url = config
            .url
            .clone()
            .unwrap_or_else(|| OPENAI_DEFAULT_URL.to_string());

        Ok(Self {
            model,
            dims,
            base_url,
            api_key,
            client: http_client(config)?,
        })
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let request = self
            .client
            .post(format!("{}/embeddings", self.base_url.trim_end_matches('/')))
            .bearer_auth(&self.api_key)
            .json(&body);
        let json = post_json(request, "OpenAI").await?;
        parse_openai_response(&json)
    }
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, EmbedError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| EmbedError::InvalidResponse("OpenAI response: missing data array".into()))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let embedding = item.get("embedding").ok_or_else(|| {
            EmbedError::InvalidResponse("OpenAI response: missing embedding".into())
        })?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        indexed.push((index, parse_vector(embedding, "OpenAI")?));
    }
    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama ============

/// Embedder backed by a local Ollama instance (`POST /api/embed`).
pub struct OllamaEmbedder {
    model: String,
    dims: usize,
    url: String,
    client: reqwest::Client,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| OLLAMA_DEFAULT_URL.to_string());

        Ok(Self {
            model,
            dims,
            url,
            client: http_client(config)?,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let request = self
            .client
            .post(format!("{}/api/embed", self.url.trim_end_matches('/')))
            .json(&body);
        let json = post_json(request, "Ollama").await.map_err(|e| match e {
            EmbedError::Unavailable(msg) => EmbedError::Unavailable(format!(
                "{} (is Ollama running at {}?)",
                msg, self.url
            )),
            other => other,
        })?;
        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, EmbedError> {
    json.get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| {
            EmbedError::InvalidResponse("Ollama response: missing embeddings array".into())
        })?
        .iter()
        .map(|v| parse_vector(v, "Ollama"))
        .collect()
}

// ============ Local (fastembed) ============

/// In-process embedder running a fastembed model.
///
/// The model is downloaded from Hugging Face on first use and cached; after
/// that no network access is needed. Inference runs on the blocking pool.
#[cfg(feature = "local-embeddings-fastembed")]
pub struct LocalEmbedder {
    model_name: String,
    dims: usize,
    batch_size: usize,
    model: Arc<std::sync::Mutex<fastembed::TextEmbedding>>,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl LocalEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model_name, dims) = resolve_local_model(config);
        let fastembed_model = config_to_fastembed_model(&model_name)?;
        let model = fastembed::TextEmbedding::try_new(
            fastembed::InitOptions::new(fastembed_model).with_show_download_progress(false),
        )
        .map_err(|e| anyhow::anyhow!("Failed to initialize local embedding model: {}", e))?;

        Ok(Self {
            model_name,
            dims,
            batch_size: config.batch_size,
            model: Arc::new(std::sync::Mutex::new(model)),
        })
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl Embedder for LocalEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let model = Arc::clone(&self.model);
        let texts = texts.to_vec();
        let batch_size = self.batch_size;

        tokio::task::spawn_blocking(move || {
            let mut model = model.lock().unwrap_or_else(|p| p.into_inner());
            model
                .embed(texts, Some(batch_size))
                .map_err(|e| EmbedError::Unavailable(format!("Local embedding failed: {}", e)))
        })
        .await
        .map_err(|e| EmbedError::Unavailable(format!("Local embedding task failed: {}", e)))?
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
fn resolve_local_model(config: &EmbeddingConfig) -> (String, usize) {
    let model_name = config
        .model
        .clone()
        .unwrap_or_else(|| "all-minilm-l6-v2".to_string());

    let dims = config.dims.unwrap_or(match model_name.as_str() {
        "bge-base-en-v1.5" | "multilingual-e5-base" => 768,
        "bge-large-en-v1.5" | "multilingual-e5-large" => 1024,
        _ => 384,
    });

    (model_name, dims)
}

#[cfg(feature = "local-embeddings-fastembed")]
fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
        "multilingual-e5-large" => Ok(fastembed::EmbeddingModel::MultilingualE5Large),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             multilingual-e5-small, multilingual-e5-base, multilingual-e5-large",
            other
        ),
    }
}
