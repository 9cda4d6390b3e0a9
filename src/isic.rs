//! ISIC industry code → HS code mapping.
//!
//! The map file is a JSON object from ISIC code to a list of HS codes:
//!
//! ```json
//! { "2630": ["8517130000", "8517620000", "8525"] }
//! ```
//!
//! For each ISIC code the loader also derives the distinct 2-digit HS
//! chapters and 4-digit HS headings of its list. Those are what a
//! classification hint is checked against; the hint never alters scores.
//!
//! [`final_codes`] picks the codes to report from a ranked list: candidates
//! inside the hinted headings, else inside the hinted chapters, else the
//! top-ranked candidate.

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use hs_match_core::models::MatchCandidate;

/// The HS codes mapped to one ISIC code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IsicMapping {
    pub isic: String,
    /// Every HS code listed for this ISIC code, distinct and sorted.
    pub total: Vec<String>,
    /// Distinct 2-digit chapters, sorted.
    pub hs02: Vec<String>,
    /// Distinct 4-digit headings, sorted.
    pub hs04: Vec<String>,
}

/// Whether one candidate falls inside an ISIC code's HS footprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IsicFlag {
    pub code: String,
    pub in_chapter: bool,
    pub in_heading: bool,
}

#[derive(Debug, Clone, Default)]
pub struct IsicMap {
    mappings: BTreeMap<String, IsicMapping>,
}

impl IsicMap {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read ISIC map: {}", path.display()))?;
        Self::from_json_str(&content)
            .with_context(|| format!("Failed to parse ISIC map: {}", path.display()))
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let raw: BTreeMap<String, Vec<String>> = serde_json::from_str(json)?;
        let mappings = raw
            .into_iter()
            .map(|(isic, codes)| {
                let isic = isic.trim().to_string();
                let mapping = IsicMapping::new(&isic, codes);
                (isic, mapping)
            })
            .collect();
        Ok(Self { mappings })
    }

    pub fn lookup(&self, isic: &str) -> Option<&IsicMapping> {
        self.mappings.get(isic.trim())
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}

impl IsicMapping {
    fn new(isic: &str, codes: Vec<String>) -> Self {
        let total: Vec<String> = codes
            .into_iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let prefixes = |len: usize| -> Vec<String> {
            total
                .iter()
                .map(|c| digits(c))
                .filter(|d| d.len() >= len)
                .map(|d| d[..len].to_string())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect()
        };
        let hs02 = prefixes(2);
        let hs04 = prefixes(4);

        Self {
            isic: isic.to_string(),
            total,
            hs02,
            hs04,
        }
    }

    /// Flag each candidate by whether its chapter and heading are mapped.
    pub fn flag(&self, candidates: &[MatchCandidate]) -> Vec<IsicFlag> {
        candidates
            .iter()
            .map(|c| {
                let d = digits(&c.code);
                let in_prefixes = |set: &[String], len: usize| {
                    d.len() >= len && set.iter().any(|p| p.as_str() == &d[..len])
                };
                IsicFlag {
                    code: c.code.clone(),
                    in_chapter: in_prefixes(&self.hs02, 2),
                    in_heading: in_prefixes(&self.hs04, 4),
                }
            })
            .collect()
    }
}

/// Preferred codes for a ranked list, given the ISIC flags (if any) for the
/// same candidates.
///
/// Rank order is kept. An empty ranking yields no codes.
pub fn final_codes(candidates: &[MatchCandidate], flags: Option<&[IsicFlag]>) -> Vec<String> {
    let top = || -> Vec<String> { candidates.iter().take(1).map(|c| c.code.clone()).collect() };
    let Some(flags) = flags else {
        return top();
    };
    let pick = |keep: fn(&IsicFlag) -> bool| -> Vec<String> {
        flags.iter().filter(|f| keep(f)).map(|f| f.code.clone()).collect()
    };

    let in_heading = pick(|f| f.in_heading);
    if !in_heading.is_empty() {
        return in_heading;
    }
    let in_chapter = pick(|f| f.in_chapter);
    if !in_chapter.is_empty() {
        return in_chapter;
    }
    top()
}

fn digits(code: &str) -> String {
    code.chars().filter(char::is_ascii_digit).collect()
}
