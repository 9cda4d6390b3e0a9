//! Embedder capability trait and vector utilities.
//!
//! Defines the [`Embedder`] trait that every embedding backend implements,
//! the [`HashingEmbedder`] backend that runs fully offline, and pure helpers
//! for similarity computation.
//!
//! Network and model-runtime backends (OpenAI, Ollama, fastembed) live in the
//! `hs-match` app crate; callers only ever see `Arc<dyn Embedder>`.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::EmbedError;

/// Maps normalized text to fixed-length vectors.
///
/// `dims()` is constant for the lifetime of the value. `embed` returns exactly
/// one vector of `dims()` values per input, in input order, or an error; it
/// never substitutes placeholder vectors for failed inputs.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Output dimensionality.
    fn dims(&self) -> usize;
    /// Embed a batch of texts.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;
}

/// Embed a single text, checked like any node batch.
pub async fn embed_one(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>, EmbedError> {
    let vectors = embedder.embed(&[text.to_string()]).await?;
    check_batch(&vectors, 1, embedder.dims())?;
    vectors
        .into_iter()
        .next()
        .ok_or_else(|| EmbedError::InvalidResponse("empty embedding response".to_string()))
}

/// Verify a backend response: one vector per input, each of `dims` finite
/// values with a non-zero norm.
///
/// A zero vector scores every node at exactly 0.5, so it is treated as a
/// backend failure rather than a ranking input.
pub fn check_batch(vectors: &[Vec<f32>], inputs: usize, dims: usize) -> Result<(), EmbedError> {
    if vectors.len() != inputs {
        return Err(EmbedError::InvalidResponse(format!(
            "expected {} vectors, got {}",
            inputs,
            vectors.len()
        )));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
        return Err(EmbedError::InvalidResponse(format!(
            "expected {} dims, got {}",
            dims,
            bad.len()
        )));
    }
    if vectors.iter().flatten().any(|x| !x.is_finite()) {
        return Err(EmbedError::InvalidResponse(
            "vector contains non-finite values".to_string(),
        ));
    }
    if let Some(pos) = vectors
        .iter()
        .position(|v| v.iter().map(|x| x * x).sum::<f32>().sqrt() <= f32::EPSILON)
    {
        return Err(EmbedError::InvalidResponse(format!(
            "vector {} has zero norm",
            pos
        )));
    }
    Ok(())
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`:
/// - `1.0` = identical direction
/// - `0.0` = orthogonal (unrelated)
/// - `-1.0` = opposite direction
///
/// Returns `0.0` for empty vectors or vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Map a cosine similarity onto the `[0, 1]` score range.
pub fn unit_score(cosine: f32) -> f64 {
    ((f64::from(cosine) + 1.0) / 2.0).clamp(0.0, 1.0)
}

/// Scale `v` to unit length in place. Zero vectors are left untouched.
pub fn normalize_l2(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Offline embedder based on signed feature hashing.
///
/// Each whole token and each character trigram of `#token#` is hashed with
/// SHA-256 into one of `dims` buckets with a ±1 sign, then the vector is
/// L2-normalized. Texts sharing words or word fragments land close together,
/// which is enough for lexical matching against tariff descriptions without
/// any model download. Output is identical across processes and platforms.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dims: usize,
    model_name: String,
}

impl HashingEmbedder {
    pub const DEFAULT_DIMS: usize = 256;

    const TOKEN_WEIGHT: f32 = 1.0;
    const TRIGRAM_WEIGHT: f32 = 0.5;

    pub fn new(dims: usize) -> Self {
        let dims = dims.max(1);
        Self {
            dims,
            model_name: format!("hashing-trigram-d{}", dims),
        }
    }

    /// Embed one text synchronously.
    pub fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut v = vec![0.0f32; self.dims];
        for token in text.split_whitespace() {
            self.add_feature(&mut v, token.as_bytes(), Self::TOKEN_WEIGHT);
            let padded: Vec<char> = format!("#{}#", token).chars().collect();
            for window in padded.windows(3) {
                let gram: String = window.iter().collect();
                self.add_feature(&mut v, gram.as_bytes(), Self::TRIGRAM_WEIGHT);
            }
        }
        if v.iter().all(|x| *x == 0.0) {
            return Err(EmbedError::InvalidResponse(format!(
                "text produced no features: {:?}",
                text
            )));
        }
        normalize_l2(&mut v);
        Ok(v)
    }

    fn add_feature(&self, v: &mut [f32], feature: &[u8], weight: f32) {
        let digest = Sha256::digest(feature);
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        let h = u64::from_le_bytes(bytes);
        let bucket = (h % self.dims as u64) as usize;
        let sign = if h >> 63 == 0 { 1.0 } else { -1.0 };
        v[bucket] += sign * weight;
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DIMS)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        texts.iter().map(|t| self.embed_text(t)).collect()
    }
}
