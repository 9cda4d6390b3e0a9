//! An immutable taxonomy paired with its precomputed node embeddings.
//!
//! Node descriptions are embedded once, when the snapshot is built, and
//! never per query. A snapshot is the unit the engine swaps on reload.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::embedding::{check_batch, Embedder};
use crate::error::{MatchError, TaxonomyIntegrityError};
use crate::index::{build_index, IndexKind, VectorIndex};
use crate::normalize::Normalizer;
use crate::taxonomy::Taxonomy;

/// Taxonomy + node vectors + candidate index.
pub struct TaxonomySnapshot {
    taxonomy: Taxonomy,
    embeddings: Vec<Vec<f32>>,
    index: Box<dyn VectorIndex>,
    model_name: String,
    dims: usize,
    built_at: DateTime<Utc>,
}

impl std::fmt::Debug for TaxonomySnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaxonomySnapshot")
            .field("nodes", &self.taxonomy.len())
            .field("version", &self.taxonomy.version())
            .field("index", &self.index.name())
            .field("model_name", &self.model_name)
            .field("dims", &self.dims)
            .field("built_at", &self.built_at)
            .finish()
    }
}

impl TaxonomySnapshot {
    /// Embed every node description with `embedder` and index the result.
    ///
    /// Descriptions go through the same `normalizer` as queries. A
    /// description that normalizes to nothing is embedded as its lowercased
    /// text, or its code when the description is blank.
    pub async fn build(
        taxonomy: Taxonomy,
        embedder: &dyn Embedder,
        normalizer: &Normalizer,
        index_kind: IndexKind,
        batch_size: usize,
    ) -> Result<Self, MatchError> {
        let texts: Vec<String> = taxonomy
            .all_nodes()
            .map(|n| {
                normalizer.normalize(&n.description).unwrap_or_else(|_| {
                    let fallback = n.description.trim().to_lowercase();
                    if fallback.is_empty() {
                        n.code.to_lowercase()
                    } else {
                        fallback
                    }
                })
            })
            .collect();

        let batch_size = batch_size.max(1);
        let mut embeddings = Vec::with_capacity(texts.len());
        for (i, batch) in texts.chunks(batch_size).enumerate() {
            let vectors = embedder.embed(batch).await?;
            check_batch(&vectors, batch.len(), embedder.dims())?;
            embeddings.extend(vectors);
            debug!(batch = i, embedded = embeddings.len(), total = texts.len(), "embedded taxonomy batch");
        }

        let snapshot = Self::from_parts(taxonomy, embeddings, index_kind, embedder.model_name())?;
        info!(
            nodes = snapshot.taxonomy.len(),
            version = snapshot.taxonomy.version().unwrap_or("-"),
            model = %snapshot.model_name,
            dims = snapshot.dims,
            index = snapshot.index.name(),
            "taxonomy snapshot built"
        );
        Ok(snapshot)
    }

    /// Assemble a snapshot from vectors computed elsewhere.
    ///
    /// `embeddings[i]` belongs to the i-th node of `taxonomy.all_nodes()`.
    pub fn from_parts(
        taxonomy: Taxonomy,
        embeddings: Vec<Vec<f32>>,
        index_kind: IndexKind,
        model_name: &str,
    ) -> Result<Self, MatchError> {
        if embeddings.len() != taxonomy.len() {
            return Err(TaxonomyIntegrityError::Malformed(format!(
                "{} embeddings for {} nodes",
                embeddings.len(),
                taxonomy.len()
            ))
            .into());
        }
        let dims = embeddings.first().map(Vec::len).unwrap_or(0);
        for (node, v) in taxonomy.all_nodes().zip(&embeddings) {
            if v.len() != dims {
                return Err(TaxonomyIntegrityError::DimensionMismatch {
                    code: node.code.clone(),
                    expected: dims,
                    actual: v.len(),
                }
                .into());
            }
        }

        let index = build_index(index_kind, &embeddings);
        Ok(Self {
            taxonomy,
            embeddings,
            index,
            model_name: model_name.to_string(),
            dims,
            built_at: Utc::now(),
        })
    }

    /// Same taxonomy and vectors behind a different index.
    pub fn with_index(&self, index_kind: IndexKind) -> Self {
        Self {
            taxonomy: self.taxonomy.clone(),
            embeddings: self.embeddings.clone(),
            index: build_index(index_kind, &self.embeddings),
            model_name: self.model_name.clone(),
            dims: self.dims,
            built_at: self.built_at,
        }
    }

    pub fn taxonomy(&self) -> &Taxonomy {
        &self.taxonomy
    }

    pub fn index(&self) -> &dyn VectorIndex {
        self.index.as_ref()
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    pub(crate) fn embedding_at(&self, idx: usize) -> &[f32] {
        &self.embeddings[idx]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;
    use crate::models::NodeRecord;

    fn taxonomy() -> Taxonomy {
        Taxonomy::load(vec![
            NodeRecord::new("A", "electronics", None),
            NodeRecord::new("A.1", "mobile phones", Some("A")),
            NodeRecord::new("B", "textiles", None),
            NodeRecord::new("C", "Other", None),
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn test_build_embeds_every_node() {
        let embedder = HashingEmbedder::new(32);
        let snap = TaxonomySnapshot::build(
            taxonomy(),
            &embedder,
            &Normalizer::default(),
            IndexKind::BruteForce,
            2,
        )
        .await
        .unwrap();
        assert_eq!(snap.taxonomy().len(), 4);
        assert_eq!(snap.dims(), 32);
        assert_eq!(snap.model_name(), "hashing-trigram-d32");
        for i in 0..4 {
            assert_eq!(snap.embedding_at(i).len(), 32);
        }
    }

    #[test]
    fn test_from_parts_checks_counts_and_dims() {
        let err = TaxonomySnapshot::from_parts(taxonomy(), vec![vec![1.0]], IndexKind::BruteForce, "m")
            .unwrap_err();
        assert!(matches!(err, MatchError::TaxonomyIntegrity(TaxonomyIntegrityError::Malformed(_))));

        let err = TaxonomySnapshot::from_parts(
            taxonomy(),
            vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0], vec![0.5, 0.5]],
            IndexKind::BruteForce,
            "m",
        )
        .unwrap_err();
        assert!(matches!(
            err,
            MatchError::TaxonomyIntegrity(TaxonomyIntegrityError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_with_index_keeps_vectors() {
        let snap = TaxonomySnapshot::from_parts(
            taxonomy(),
            vec![vec![1.0, 0.0], vec![0.9, 0.1], vec![0.0, 1.0], vec![0.5, 0.5]],
            IndexKind::BruteForce,
            "m",
        )
        .unwrap();
        let ivf = snap.with_index(IndexKind::Ivf { nlist: 2, nprobe: 1 });
        assert_eq!(ivf.index().name(), "ivf");
        assert_eq!(ivf.dims(), 2);
        assert_eq!(ivf.embedding_at(1), snap.embedding_at(1));
    }
}
