//! Candidate selection for the ranker.
//!
//! A [`VectorIndex`] narrows the set of taxonomy nodes the ranker scores.
//! [`BruteForceIndex`] returns every node and is the correctness baseline.
//! [`IvfIndex`] is an inverted-file index: node vectors are partitioned
//! around `nlist` centroids and a query only visits the members of its
//! `nprobe` closest lists. Scores are always computed exactly by the
//! ranker, so an index can only lose candidates, never distort them.
//!
//! # IVF construction
//!
//! 1. Seed centroids with `nlist` evenly spaced vectors (positions
//!    `i * n / nlist`), so builds are reproducible.
//! 2. Run a fixed number of spherical k-means passes: assign each vector to
//!    its most similar centroid (ties → lower list), recompute centroids as
//!    normalized means. Empty lists keep their previous centroid.
//! 3. Store the final assignment as posting lists.

use crate::embedding::{cosine_similarity, normalize_l2};
use crate::models::MatchCandidate;

/// Spherical k-means passes run at build time.
const KMEANS_PASSES: usize = 6;

/// Which index a snapshot is built with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IndexKind {
    #[default]
    BruteForce,
    Ivf { nlist: usize, nprobe: usize },
}

/// Candidate generator over a fixed set of node vectors.
pub trait VectorIndex: Send + Sync {
    /// Short identifier for logs and stats.
    fn name(&self) -> &'static str;

    /// Positions (into the vectors the index was built from) worth scoring
    /// for `query`, in ascending order.
    fn candidates(&self, query: &[f32]) -> Vec<usize>;
}

/// Build the index described by `kind` over `vectors`.
pub fn build_index(kind: IndexKind, vectors: &[Vec<f32>]) -> Box<dyn VectorIndex> {
    match kind {
        IndexKind::BruteForce => Box::new(BruteForceIndex::new(vectors.len())),
        IndexKind::Ivf { nlist, nprobe } => Box::new(IvfIndex::build(vectors, nlist, nprobe)),
    }
}

/// Exact baseline: every node is a candidate.
#[derive(Debug, Clone)]
pub struct BruteForceIndex {
    len: usize,
}

impl BruteForceIndex {
    pub fn new(len: usize) -> Self {
        Self { len }
    }
}

impl VectorIndex for BruteForceIndex {
    fn name(&self) -> &'static str {
        "brute-force"
    }

    fn candidates(&self, _query: &[f32]) -> Vec<usize> {
        (0..self.len).collect()
    }
}

/// Inverted-file approximate index.
#[derive(Debug, Clone)]
pub struct IvfIndex {
    centroids: Vec<Vec<f32>>,
    lists: Vec<Vec<usize>>,
    nprobe: usize,
}

impl IvfIndex {
    pub fn build(vectors: &[Vec<f32>], nlist: usize, nprobe: usize) -> Self {
        let n = vectors.len();
        let nlist = nlist.clamp(1, n.max(1));
        let nprobe = nprobe.clamp(1, nlist);

        if n == 0 {
            return Self {
                centroids: Vec::new(),
                lists: Vec::new(),
                nprobe,
            };
        }

        let mut centroids: Vec<Vec<f32>> = (0..nlist)
            .map(|i| {
                let mut c = vectors[i * n / nlist].clone();
                normalize_l2(&mut c);
                c
            })
            .collect();

        let mut assignment = assign(vectors, &centroids);
        for _ in 0..KMEANS_PASSES {
            let dims = centroids[0].len();
            let mut sums = vec![vec![0.0f32; dims]; nlist];
            let mut counts = vec![0usize; nlist];
            for (v, &list) in vectors.iter().zip(&assignment) {
                if v.len() != dims {
                    continue;
                }
                for (s, x) in sums[list].iter_mut().zip(v) {
                    *s += x;
                }
                counts[list] += 1;
            }
            for (list, mut sum) in sums.into_iter().enumerate() {
                if counts[list] > 0 {
                    normalize_l2(&mut sum);
                    centroids[list] = sum;
                }
            }
            let next = assign(vectors, &centroids);
            if next == assignment {
                break;
            }
            assignment = next;
        }

        let mut lists = vec![Vec::new(); nlist];
        for (pos, &list) in assignment.iter().enumerate() {
            lists[list].push(pos);
        }

        Self {
            centroids,
            lists,
            nprobe,
        }
    }

    pub fn nlist(&self) -> usize {
        self.lists.len()
    }

    pub fn nprobe(&self) -> usize {
        self.nprobe
    }
}

impl VectorIndex for IvfIndex {
    fn name(&self) -> &'static str {
        "ivf"
    }

    fn candidates(&self, query: &[f32]) -> Vec<usize> {
        let mut ranked: Vec<(usize, f32)> = self
            .centroids
            .iter()
            .enumerate()
            .map(|(i, c)| (i, cosine_similarity(query, c)))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

        let mut out: Vec<usize> = ranked
            .iter()
            .take(self.nprobe)
            .flat_map(|(list, _)| self.lists[*list].iter().copied())
            .collect();
        out.sort_unstable();
        out
    }
}

fn assign(vectors: &[Vec<f32>], centroids: &[Vec<f32>]) -> Vec<usize> {
    vectors
        .iter()
        .map(|v| {
            let mut best = 0;
            let mut best_sim = f32::NEG_INFINITY;
            for (i, c) in centroids.iter().enumerate() {
                let sim = cosine_similarity(v, c);
                if sim > best_sim {
                    best = i;
                    best_sim = sim;
                }
            }
            best
        })
        .collect()
}

/// Fraction of `reference` codes also present in `approximate`.
///
/// Order is ignored. An empty reference counts as full overlap.
pub fn top_k_overlap(reference: &[MatchCandidate], approximate: &[MatchCandidate]) -> f64 {
    if reference.is_empty() {
        return 1.0;
    }
    let hits = reference
        .iter()
        .filter(|r| approximate.iter().any(|a| a.code == r.code))
        .count();
    hits as f64 / reference.len() as f64
}
