//! # HS Match Core
//!
//! Runtime-agnostic logic for HS Match: the taxonomy store, text normalizer,
//! embedder trait with an offline hashing backend, vector indexes, embedded
//! taxonomy snapshots, and the ranking algorithm.
//!
//! This crate does no network or filesystem I/O and does not depend on
//! tokio. Configuration, network embedding backends, caching, and the
//! swappable engine live in the `hs-match` crate.

pub mod embedding;
pub mod error;
pub mod index;
pub mod matcher;
pub mod models;
pub mod normalize;
pub mod snapshot;
pub mod taxonomy;

pub use embedding::{Embedder, HashingEmbedder};
pub use error::{EmbedError, MatchError, TaxonomyIntegrityError};
pub use index::IndexKind;
pub use matcher::{rank, MatchParams};
pub use models::{MatchCandidate, NodeRecord, ScoreExplanation, TaxonomyNode};
pub use normalize::Normalizer;
pub use snapshot::TaxonomySnapshot;
pub use taxonomy::{SourceFormat, Taxonomy};
