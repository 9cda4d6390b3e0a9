//! Ranking of taxonomy nodes against a query vector.
//!
//! # Scoring
//!
//! ```text
//! raw(n)       = (cosine(query, embedding(n)) + 1) / 2
//! effective(n) = min(1.0, raw(n) + boost)   if some ancestor a has raw(a) >= threshold
//!              = raw(n)                     otherwise
//! ```
//!
//! The boost is added once no matter how many ancestors qualify. The
//! explanation names the closest qualifying ancestor.
//!
//! # Ordering
//!
//! Effective score descending, then code ascending. Candidates below the
//! confidence floor are dropped before truncation to `top_k`, so a result
//! may be shorter than `top_k` (or empty).

use std::cmp::Ordering;

use crate::embedding::{cosine_similarity, unit_score};
use crate::error::MatchError;
use crate::models::{MatchCandidate, ScoreExplanation};
use crate::snapshot::TaxonomySnapshot;

/// Parameters for one ranking pass.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchParams {
    pub top_k: usize,
    pub min_confidence_floor: f64,
    pub hierarchical_boost_amount: f64,
    pub hierarchical_boost_threshold: f64,
}

impl Default for MatchParams {
    fn default() -> Self {
        Self {
            top_k: 10,
            min_confidence_floor: 0.5,
            hierarchical_boost_amount: 0.05,
            hierarchical_boost_threshold: 0.7,
        }
    }
}

/// Rank the snapshot's nodes against `query`.
pub fn rank(
    query: &[f32],
    snapshot: &TaxonomySnapshot,
    params: &MatchParams,
) -> Result<Vec<MatchCandidate>, MatchError> {
    let taxonomy = snapshot.taxonomy();
    if taxonomy.is_empty() {
        return Err(MatchError::EmptyTaxonomy);
    }
    if query.len() != snapshot.dims() {
        return Err(MatchError::EmbeddingUnavailable(format!(
            "query has {} dims, snapshot was embedded with {}",
            query.len(),
            snapshot.dims()
        )));
    }

    // Ancestors are scored on demand even when the index did not select them.
    let mut raw: Vec<Option<f64>> = vec![None; taxonomy.len()];
    let mut raw_at = |idx: usize| -> f64 {
        *raw[idx].get_or_insert_with(|| {
            unit_score(cosine_similarity(query, snapshot.embedding_at(idx)))
        })
    };

    let mut scored: Vec<MatchCandidate> = Vec::new();
    for idx in snapshot.index().candidates(query) {
        let raw_score = raw_at(idx);

        let boosted_by = taxonomy
            .ancestor_indices(idx)
            .into_iter()
            .rev()
            .find(|&a| raw_at(a) >= params.hierarchical_boost_threshold);

        let (score, boost) = match boosted_by {
            Some(_) => {
                let score = (raw_score + params.hierarchical_boost_amount).min(1.0);
                (score, score - raw_score)
            }
            None => (raw_score, 0.0),
        };

        if score < params.min_confidence_floor {
            continue;
        }

        let node = taxonomy.node_at(idx);
        scored.push(MatchCandidate {
            code: node.code.clone(),
            description: node.description.clone(),
            score,
            rank: 0,
            explain: Some(ScoreExplanation {
                raw_score,
                boost,
                boosted_by: boosted_by.map(|a| taxonomy.node_at(a).code.clone()),
                level: node.level,
            }),
        });
    }

    scored.sort_by(compare_candidates);
    scored.truncate(params.top_k);
    for (i, c) in scored.iter_mut().enumerate() {
        c.rank = i + 1;
    }
    Ok(scored)
}

/// Score descending, then code ascending.
pub fn compare_candidates(a: &MatchCandidate, b: &MatchCandidate) -> Ordering {
    b.score.total_cmp(&a.score).then_with(|| a.code.cmp(&b.code))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexKind;
    use crate::models::NodeRecord;
    use crate::taxonomy::Taxonomy;

    /// `A` electronics, `A.1` mobile phones, `B` textiles in a 3-d space
    /// where axis 0 is "electronic", axis 1 "phone", axis 2 "fabric".
    fn scenario() -> TaxonomySnapshot {
        let taxonomy = Taxonomy::load(vec![
            NodeRecord::new("A", "Electronics", None),
            NodeRecord::new("A.1", "Mobile phones", Some("A")),
            NodeRecord::new("B", "Textiles", None),
        ])
        .unwrap();
        TaxonomySnapshot::from_parts(
            taxonomy,
            vec![
                vec![1.0, 0.2, 0.0],
                vec![0.6, 1.0, 0.0],
                vec![0.0, 0.0, 1.0],
            ],
            IndexKind::BruteForce,
            "fixed",
        )
        .unwrap()
    }

    fn smartphone() -> Vec<f32> {
        vec![0.4, 1.0, 0.5]
    }

    #[test]
    fn test_child_boosted_and_ranked_above_unrelated_root() {
        let snap = scenario();
        let params = MatchParams {
            min_confidence_floor: 0.0,
            ..MatchParams::default()
        };
        let ranked = rank(&smartphone(), &snap, &params).unwrap();
        let codes: Vec<&str> = ranked.iter().map(|c| c.code.as_str()).collect();
        assert_eq!(codes, vec!["A.1", "A", "B"]);

        let phone = &ranked[0];
        let explain = phone.explain.as_ref().unwrap();
        assert!(phone.score > explain.raw_score);
        assert_eq!(explain.boosted_by.as_deref(), Some("A"));
        assert!((explain.boost - 0.05).abs() < 1e-9);

        // Roots have no ancestors to boost them.
        assert_eq!(ranked[1].explain.as_ref().unwrap().boost, 0.0);
        assert!(ranked[0].score > ranked[2].score);
    }

    #[test]
    fn test_ranks_are_one_based_and_contiguous() {
        let snap = scenario();
        let params = MatchParams {
            min_confidence_floor: 0.0,
            ..MatchParams::default()
        };
        let ranked = rank(&smartphone(), &snap, &params).unwrap();
        let ranks: Vec<usize> = ranked.iter().map(|c| c.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3]);
    }

    #[test]
    fn test_floor_filters_and_returns_short() {
        let snap = scenario();
        let params = MatchParams {
            top_k: 10,
            min_confidence_floor: 0.8,
            ..MatchParams::default()
        };
        let ranked = rank(&smartphone(), &snap, &params).unwrap();
        assert!(ranked.len() < 3);
        assert!(ranked.iter().all(|c| c.score >= 0.8));

        let none = rank(
            &smartphone(),
            &snap,
            &MatchParams {
                min_confidence_floor: 1.01,
                ..MatchParams::default()
            },
        )
        .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_truncates_to_top_k() {
        let snap = scenario();
        let params = MatchParams {
            top_k: 1,
            min_confidence_floor: 0.0,
            ..MatchParams::default()
        };
        let ranked = rank(&smartphone(), &snap, &params).unwrap();
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].code, "A.1");
    }

    #[test]
    fn test_boost_capped_at_one() {
        let taxonomy = Taxonomy::load(vec![
            NodeRecord::new("P", "parent", None),
            NodeRecord::new("P.1", "child", Some("P")),
        ])
        .unwrap();
        let snap = TaxonomySnapshot::from_parts(
            taxonomy,
            vec![vec![1.0, 0.0], vec![1.0, 0.0]],
            IndexKind::BruteForce,
            "fixed",
        )
        .unwrap();
        let params = MatchParams {
            hierarchical_boost_amount: 0.5,
            ..MatchParams::default()
        };
        let ranked = rank(&[1.0, 0.0], &snap, &params).unwrap();
        assert!(ranked.iter().all(|c| c.score <= 1.0));
        let child = ranked.iter().find(|c| c.code == "P.1").unwrap();
        assert!((child.score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_equal_scores_break_ties_by_code() {
        let taxonomy = Taxonomy::load(vec![
            NodeRecord::new("03", "fish", None),
            NodeRecord::new("01", "animals", None),
            NodeRecord::new("02", "meat", None),
        ])
        .unwrap();
        let snap = TaxonomySnapshot::from_parts(
            taxonomy,
            vec![vec![1.0, 0.0]; 3],
            IndexKind::BruteForce,
            "fixed",
        )
        .unwrap();
        let ranked = rank(&[1.0, 0.0], &snap, &MatchParams::default()).unwrap();
        let codes: Vec<&str> = ranked.iter().map(|c| c.code.as_str()).collect();
        assert_eq!(codes, vec!["01", "02", "03"]);
    }

    #[test]
    fn test_ordering_non_increasing() {
        let snap = scenario();
        let params = MatchParams {
            min_confidence_floor: 0.0,
            ..MatchParams::default()
        };
        for query in [vec![0.0, 0.0, 1.0], vec![1.0, 0.0, 0.0], vec![-1.0, 0.5, 0.5]] {
            let ranked = rank(&query, &snap, &params).unwrap();
            for pair in ranked.windows(2) {
                assert_ne!(compare_candidates(&pair[0], &pair[1]), Ordering::Greater);
            }
        }
    }

    #[test]
    fn test_empty_taxonomy_fails() {
        let snap =
            TaxonomySnapshot::from_parts(Taxonomy::default(), Vec::new(), IndexKind::BruteForce, "m")
                .unwrap();
        assert_eq!(
            rank(&[], &snap, &MatchParams::default()),
            Err(MatchError::EmptyTaxonomy)
        );
    }

    #[test]
    fn test_query_dimension_mismatch() {
        let snap = scenario();
        let err = rank(&[1.0, 0.0], &snap, &MatchParams::default()).unwrap_err();
        assert_eq!(err.code(), "embedding_unavailable");
    }
}
