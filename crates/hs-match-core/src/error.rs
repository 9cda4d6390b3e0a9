//! Typed errors surfaced by the matching engine.
//!
//! [`MatchError`] is the error half of the `classify` contract. Callers can
//! always tell "no taxonomy match found" (an empty `Ok` result) apart from
//! "the engine could not answer" (an `Err`).

use std::time::Duration;

use thiserror::Error;

/// Structural problems found while loading a taxonomy source.
///
/// Any of these makes the whole taxonomy unusable; the loader never returns
/// a partially valid taxonomy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaxonomyIntegrityError {
    #[error("node with empty code (description: {description:?})")]
    EmptyCode { description: String },

    #[error("duplicate code: {0}")]
    DuplicateCode(String),

    #[error("node {code} references nonexistent parent {parent}")]
    MissingParent { code: String, parent: String },

    #[error("cycle detected while walking ancestors of {0}")]
    Cycle(String),

    #[error("node {code} declares level {declared} but its depth is {actual}")]
    LevelMismatch {
        code: String,
        declared: u32,
        actual: u32,
    },

    #[error("node {code} has an embedding of {actual} dims, expected {expected}")]
    DimensionMismatch {
        code: String,
        expected: usize,
        actual: usize,
    },

    #[error("malformed taxonomy source: {0}")]
    Malformed(String),
}

/// Failures of an embedding backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EmbedError {
    /// The backing model could not be reached or loaded.
    #[error("embedding backend unavailable: {0}")]
    Unavailable(String),

    /// The backend answered, but not with one vector of the expected size per input.
    #[error("embedding backend returned an invalid response: {0}")]
    InvalidResponse(String),
}

/// Errors returned across the `classify` boundary.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MatchError {
    #[error("input is empty after normalization")]
    EmptyInput,

    #[error("top_k must be a positive integer, got {0}")]
    InvalidTopK(i64),

    #[error("embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("embedding timed out after {0:?}")]
    EmbeddingTimeout(Duration),

    #[error("taxonomy has no nodes")]
    EmptyTaxonomy,

    #[error("taxonomy integrity error: {0}")]
    TaxonomyIntegrity(#[from] TaxonomyIntegrityError),

    #[error("engine is shut down")]
    ShutDown,
}

impl From<EmbedError> for MatchError {
    fn from(err: EmbedError) -> Self {
        MatchError::EmbeddingUnavailable(err.to_string())
    }
}

impl MatchError {
    /// Machine-readable code used by the HTTP adapter and JSON output.
    pub fn code(&self) -> &'static str {
        match self {
            MatchError::EmptyInput => "empty_input",
            MatchError::InvalidTopK(_) => "invalid_top_k",
            MatchError::EmbeddingUnavailable(_) => "embedding_unavailable",
            MatchError::EmbeddingTimeout(_) => "embedding_timeout",
            MatchError::EmptyTaxonomy => "empty_taxonomy",
            MatchError::TaxonomyIntegrity(_) => "taxonomy_integrity",
            MatchError::ShutDown => "shut_down",
        }
    }

    /// Whether a caller may retry the same request later (with backoff).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MatchError::EmbeddingUnavailable(_) | MatchError::EmbeddingTimeout(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embed_error_maps_to_unavailable() {
        let err: MatchError = EmbedError::Unavailable("connection refused".into()).into();
        assert_eq!(err.code(), "embedding_unavailable");
        assert!(err.is_transient());
    }

    #[test]
    fn test_integrity_is_not_transient() {
        let err: MatchError = TaxonomyIntegrityError::DuplicateCode("01".into()).into();
        assert_eq!(err.code(), "taxonomy_integrity");
        assert!(!err.is_transient());
        assert!(err.to_string().contains("duplicate code: 01"));
    }
}
