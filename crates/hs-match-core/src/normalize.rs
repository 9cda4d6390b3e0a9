//! Deterministic text normalization for queries and node descriptions.
//!
//! The result cache keys on normalizer output, so [`Normalizer::normalize`]
//! must be a pure function of its input and the configured stop-term set.
//!
//! # Pipeline
//!
//! 1. Unicode NFKC + lowercase, repeated until stable (compatibility
//!    characters such as `㎒` decompose into uppercase letters, which then
//!    need another lowercase pass).
//! 2. Tokenize on every non-alphanumeric character.
//! 3. Drop stop terms.
//! 4. Join the remaining tokens with single spaces.
//!
//! Every output token is already folded, alphanumeric, and not a stop term,
//! so `normalize(normalize(t)) == normalize(t)`.
//!
//! # Example
//!
//! ```rust
//! use hs_match_core::normalize::Normalizer;
//!
//! let n = Normalizer::default();
//! assert_eq!(n.normalize("  Parts of MOBILE-Phones!  ").unwrap(), "mobile phones");
//! ```

use std::collections::BTreeSet;

use unicode_normalization::UnicodeNormalization;

use crate::error::MatchError;

/// Upper bound on fold passes; real text converges in one or two.
const MAX_FOLD_PASSES: usize = 4;

/// Generic English function words plus tariff boilerplate that carries no
/// classification signal ("not elsewhere specified or included").
pub const DEFAULT_STOP_TERMS: &[&str] = &[
    "a", "an", "and", "any", "are", "as", "at", "be", "by", "for", "from", "in", "including",
    "into", "is", "it", "its", "of", "on", "or", "other", "parts", "thereof", "the", "their",
    "to", "with", "whether", "not", "elsewhere", "specified", "included", "nes",
];

/// Normalizer with a fixed stop-term set.
#[derive(Debug, Clone)]
pub struct Normalizer {
    stop_terms: BTreeSet<String>,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(DEFAULT_STOP_TERMS.iter().copied())
    }
}

impl Normalizer {
    /// Build a normalizer. Stop terms go through the same folding and
    /// tokenization as input text, so `"Thereof"` and `"thereof"` are one term.
    pub fn new<I, S>(stop_terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let stop_terms = stop_terms
            .into_iter()
            .flat_map(|t| {
                tokens(&fold(t.as_ref()))
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .collect();
        Self { stop_terms }
    }

    /// A normalizer that keeps every token.
    pub fn without_stop_terms() -> Self {
        Self {
            stop_terms: BTreeSet::new(),
        }
    }

    pub fn stop_terms(&self) -> impl Iterator<Item = &str> + '_ {
        self.stop_terms.iter().map(String::as_str)
    }

    /// Normalize `raw`, failing with [`MatchError::EmptyInput`] when nothing
    /// survives.
    pub fn normalize(&self, raw: &str) -> Result<String, MatchError> {
        let folded = fold(raw);
        let kept: Vec<&str> = tokens(&folded)
            .filter(|t| !self.stop_terms.contains(*t))
            .collect();
        if kept.is_empty() {
            return Err(MatchError::EmptyInput);
        }
        Ok(kept.join(" "))
    }
}

fn fold(raw: &str) -> String {
    let mut current: String = raw.nfkc().collect::<String>().to_lowercase();
    for _ in 0..MAX_FOLD_PASSES {
        let next = current.nfkc().collect::<String>().to_lowercase();
        if next == current {
            break;
        }
        current = next;
    }
    current
}

fn tokens(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
}
