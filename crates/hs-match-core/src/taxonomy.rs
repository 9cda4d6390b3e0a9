//! Taxonomy store: loads, validates, and indexes the HS code forest.
//!
//! The forest is kept as a flat `Vec` of nodes sorted by code, a
//! `code → position` index, a parent-position vector, and a children index
//! built once at load time. There are no back-pointers; every relation is a
//! lookup into an immutable vector, so a loaded [`Taxonomy`] can be shared
//! across threads behind an `Arc` without any locking.
//!
//! # Validation
//!
//! [`Taxonomy::load`] rejects the whole source when:
//!
//! | Problem | Error |
//! |---------|-------|
//! | blank code | [`TaxonomyIntegrityError::EmptyCode`] |
//! | the same code twice | [`TaxonomyIntegrityError::DuplicateCode`] |
//! | parent code not in the source | [`TaxonomyIntegrityError::MissingParent`] |
//! | ancestor walk longer than the node count | [`TaxonomyIntegrityError::Cycle`] |
//! | declared level ≠ derived depth | [`TaxonomyIntegrityError::LevelMismatch`] |
//!
//! # Source formats
//!
//! - [`SourceFormat::Records`]: explicit `{code, description, parent_code, level?}`
//!   records, either as a bare JSON array or wrapped in `{"version", "nodes"}`.
//! - [`SourceFormat::HsFlat`]: `{code, description}` entries whose parents are
//!   derived from HS digit boundaries (2, 4, 6, 8, 10).

use std::collections::HashMap;

use serde::Deserialize;

use crate::error::TaxonomyIntegrityError;
use crate::models::{NodeRecord, TaxonomyNode};

/// HS digit boundaries: chapter, heading, subheading, national splits.
const HS_PREFIX_LENGTHS: [usize; 4] = [8, 6, 4, 2];

/// Layout of a taxonomy source document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceFormat {
    Records,
    HsFlat,
}

impl std::str::FromStr for SourceFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "records" => Ok(SourceFormat::Records),
            "hs-flat" => Ok(SourceFormat::HsFlat),
            other => Err(format!(
                "Unknown taxonomy format: '{}'. Must be records or hs-flat.",
                other
            )),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SourceDocument<T> {
    Versioned {
        #[serde(default)]
        version: Option<String>,
        nodes: Vec<T>,
    },
    Bare(Vec<T>),
}

impl<T> SourceDocument<T> {
    fn into_parts(self) -> (Option<String>, Vec<T>) {
        match self {
            SourceDocument::Versioned { version, nodes } => (version, nodes),
            SourceDocument::Bare(nodes) => (None, nodes),
        }
    }
}

/// A flat HS entry whose parent is derived from its code.
#[derive(Debug, Clone, Deserialize)]
pub struct FlatEntry {
    pub code: String,
    pub description: String,
}

/// Immutable, validated HS taxonomy.
#[derive(Debug, Clone, Default)]
pub struct Taxonomy {
    nodes: Vec<TaxonomyNode>,
    by_code: HashMap<String, usize>,
    parents: Vec<Option<usize>>,
    children: Vec<Vec<usize>>,
    roots: Vec<usize>,
    version: Option<String>,
}

impl Taxonomy {
    /// Validate `records` and build the indexed forest.
    pub fn load(records: Vec<NodeRecord>) -> Result<Self, TaxonomyIntegrityError> {
        Self::load_versioned(None, records)
    }

    /// Like [`Taxonomy::load`], tagging the result with the source artifact version.
    pub fn load_versioned(
        version: Option<String>,
        mut records: Vec<NodeRecord>,
    ) -> Result<Self, TaxonomyIntegrityError> {
        for r in &mut records {
            r.code = r.code.trim().to_string();
            r.parent_code = r
                .parent_code
                .take()
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty());
            if r.code.is_empty() {
                return Err(TaxonomyIntegrityError::EmptyCode {
                    description: r.description.clone(),
                });
            }
        }

        records.sort_by(|a, b| a.code.cmp(&b.code));

        let mut by_code: HashMap<String, usize> = HashMap::with_capacity(records.len());
        for (i, r) in records.iter().enumerate() {
            if by_code.insert(r.code.clone(), i).is_some() {
                return Err(TaxonomyIntegrityError::DuplicateCode(r.code.clone()));
            }
        }

        let mut parents: Vec<Option<usize>> = Vec::with_capacity(records.len());
        for r in &records {
            let parent = match &r.parent_code {
                Some(p) => Some(*by_code.get(p).ok_or_else(|| {
                    TaxonomyIntegrityError::MissingParent {
                        code: r.code.clone(),
                        parent: p.clone(),
                    }
                })?),
                None => None,
            };
            parents.push(parent);
        }

        let depths = compute_depths(&records, &parents)?;

        let mut children: Vec<Vec<usize>> = vec![Vec::new(); records.len()];
        let mut roots = Vec::new();
        for (i, parent) in parents.iter().enumerate() {
            match parent {
                Some(p) => children[*p].push(i),
                None => roots.push(i),
            }
        }

        let mut nodes = Vec::with_capacity(records.len());
        for (r, depth) in records.into_iter().zip(depths) {
            if let Some(declared) = r.level {
                if declared != depth {
                    return Err(TaxonomyIntegrityError::LevelMismatch {
                        code: r.code,
                        declared,
                        actual: depth,
                    });
                }
            }
            nodes.push(TaxonomyNode {
                code: r.code,
                description: r.description,
                parent_code: r.parent_code,
                level: depth,
            });
        }

        Ok(Self {
            nodes,
            by_code,
            parents,
            children,
            roots,
            version,
        })
    }

    /// Parse a JSON source document in the given format and load it.
    pub fn from_json_str(json: &str, format: SourceFormat) -> Result<Self, TaxonomyIntegrityError> {
        match format {
            SourceFormat::Records => {
                let doc: SourceDocument<NodeRecord> = serde_json::from_str(json)
                    .map_err(|e| TaxonomyIntegrityError::Malformed(e.to_string()))?;
                let (version, records) = doc.into_parts();
                Self::load_versioned(version, records)
            }
            SourceFormat::HsFlat => {
                let doc: SourceDocument<FlatEntry> = serde_json::from_str(json)
                    .map_err(|e| TaxonomyIntegrityError::Malformed(e.to_string()))?;
                let (version, entries) = doc.into_parts();
                Self::load_versioned(version, records_from_hs_codes(entries)?)
            }
        }
    }

    pub fn lookup(&self, code: &str) -> Option<&TaxonomyNode> {
        self.by_code.get(code).map(|&i| &self.nodes[i])
    }

    /// Ancestors of `code`, ordered from the root down to the immediate parent.
    ///
    /// Returns `None` for unknown codes and an empty vector for roots.
    pub fn ancestors(&self, code: &str) -> Option<Vec<&TaxonomyNode>> {
        let idx = *self.by_code.get(code)?;
        Some(
            self.ancestor_indices(idx)
                .into_iter()
                .map(|i| &self.nodes[i])
                .collect(),
        )
    }

    /// Direct children of `code`, in code order.
    pub fn children(&self, code: &str) -> Option<Vec<&TaxonomyNode>> {
        let idx = *self.by_code.get(code)?;
        Some(self.children[idx].iter().map(|&i| &self.nodes[i]).collect())
    }

    /// Every node in code order. Each call starts a fresh pass.
    pub fn all_nodes(&self) -> impl Iterator<Item = &TaxonomyNode> + '_ {
        self.nodes.iter()
    }

    pub fn roots(&self) -> impl Iterator<Item = &TaxonomyNode> + '_ {
        self.roots.iter().map(|&i| &self.nodes[i])
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Deepest level present, or `None` for an empty taxonomy.
    pub fn max_level(&self) -> Option<u32> {
        self.nodes.iter().map(|n| n.level).max()
    }

    pub(crate) fn node_at(&self, idx: usize) -> &TaxonomyNode {
        &self.nodes[idx]
    }

    /// Ancestor positions ordered root → immediate parent.
    pub(crate) fn ancestor_indices(&self, idx: usize) -> Vec<usize> {
        let mut out = Vec::new();
        let mut cur = self.parents[idx];
        while let Some(p) = cur {
            out.push(p);
            cur = self.parents[p];
        }
        out.reverse();
        out
    }
}

/// Depth of every node, detecting cycles with a bounded ancestor walk.
///
/// A walk that takes more steps than there are nodes must revisit a node.
/// Depths already known are reused, so the total work stays linear for
/// well-formed forests.
fn compute_depths(
    records: &[NodeRecord],
    parents: &[Option<usize>],
) -> Result<Vec<u32>, TaxonomyIntegrityError> {
    let n = records.len();
    let mut depths: Vec<Option<u32>> = vec![None; n];

    for start in 0..n {
        if depths[start].is_some() {
            continue;
        }
        let mut path = Vec::new();
        let mut cur = start;
        let base = loop {
            if let Some(d) = depths[cur] {
                break d + 1;
            }
            path.push(cur);
            if path.len() > n {
                return Err(TaxonomyIntegrityError::Cycle(records[start].code.clone()));
            }
            match parents[cur] {
                Some(p) => cur = p,
                None => break 0,
            }
        };
        // `path` runs from `start` up to the topmost unresolved ancestor.
        for (offset, &idx) in path.iter().rev().enumerate() {
            depths[idx] = Some(base + offset as u32);
        }
    }

    Ok(depths.into_iter().map(|d| d.unwrap_or(0)).collect())
}

/// Derive parent links for flat HS codes.
///
/// The parent of a code is the longest existing proper prefix at an HS digit
/// boundary. Dots are ignored for prefix matching (`"0101.21"` ≡ `"010121"`)
/// but the original spelling is kept as the node code.
pub fn records_from_hs_codes(
    entries: Vec<FlatEntry>,
) -> Result<Vec<NodeRecord>, TaxonomyIntegrityError> {
    let mut by_digits: HashMap<String, String> = HashMap::with_capacity(entries.len());
    let mut digit_keys = Vec::with_capacity(entries.len());

    for e in &entries {
        let code = e.code.trim();
        let digits: String = code.chars().filter(|c| *c != '.').collect();
        if digits.is_empty() {
            return Err(TaxonomyIntegrityError::EmptyCode {
                description: e.description.clone(),
            });
        }
        if !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(TaxonomyIntegrityError::Malformed(format!(
                "HS code must be numeric: {}",
                code
            )));
        }
        if by_digits.insert(digits.clone(), code.to_string()).is_some() {
            return Err(TaxonomyIntegrityError::DuplicateCode(code.to_string()));
        }
        digit_keys.push(digits);
    }

    let records = entries
        .into_iter()
        .zip(digit_keys)
        .map(|(e, digits)| {
            let parent = HS_PREFIX_LENGTHS
                .iter()
                .filter(|&&len| len < digits.len())
                .find_map(|&len| by_digits.get(&digits[..len]).cloned());
            NodeRecord {
                code: e.code.trim().to_string(),
                description: e.description,
                parent_code: parent,
                level: None,
            }
        })
        .collect();

    Ok(records)
}
