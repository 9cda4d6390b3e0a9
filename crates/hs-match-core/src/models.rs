//! Core data types shared by the taxonomy store, ranker, and adapters.

use serde::{Deserialize, Serialize};

/// One entry of the HS taxonomy.
///
/// `children` are not stored here; they are derived from parent links and
/// served by [`Taxonomy::children`](crate::taxonomy::Taxonomy::children).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxonomyNode {
    /// Unique hierarchical code, e.g. `"85"`, `"8517"`, `"8517.13"`.
    pub code: String,
    /// Tariff description text.
    pub description: String,
    /// Parent code; `None` only for roots.
    pub parent_code: Option<String>,
    /// Depth in the forest, roots are `0`.
    pub level: u32,
}

/// A node as it appears in a taxonomy source, before validation.
///
/// `level` is optional: when present it must agree with the depth derived
/// from parent links.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub code: String,
    pub description: String,
    #[serde(default)]
    pub parent_code: Option<String>,
    #[serde(default)]
    pub level: Option<u32>,
}

impl NodeRecord {
    pub fn new(code: &str, description: &str, parent_code: Option<&str>) -> Self {
        Self {
            code: code.to_string(),
            description: description.to_string(),
            parent_code: parent_code.map(str::to_string),
            level: None,
        }
    }
}

/// A ranked classification candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub code: String,
    pub description: String,
    /// Effective score in `[0.0, 1.0]`, `1.0` = exact.
    pub score: f64,
    /// 1-based position in the ranked sequence.
    pub rank: usize,
    /// Scoring breakdown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explain: Option<ScoreExplanation>,
}

/// How a candidate's effective score was produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreExplanation {
    /// Cosine similarity mapped to `[0, 1]`.
    pub raw_score: f64,
    /// Hierarchical bonus actually added (after capping at 1.0).
    pub boost: f64,
    /// Closest ancestor that scored above the boost threshold.
    pub boosted_by: Option<String>,
    /// Depth of the node in the taxonomy.
    pub level: u32,
}
