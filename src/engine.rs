//! The classification engine.
//!
//! [`Engine`] owns the embedder, the normalizer, and the current
//! [`Snapshot`]: an embedded taxonomy, its optional ISIC map, and the result
//! cache for that taxonomy. The snapshot sits behind
//! `RwLock<Arc<Snapshot>>`; the lock is held only long enough to clone or
//! replace the `Arc`, so requests never wait on each other or on a reload.
//!
//! # Request flow
//!
//! ```text
//! raw text ─▶ resolve top_k ─▶ normalize ─▶ cache.get_or_compute(normalized)
//!                                              │ miss
//!                                              ▼
//!                                 embed (under timeout) ─▶ rank(max_top_k)
//!                                              │
//!                        truncate to top_k ◀───┘
//! ```
//!
//! Rankings are cached at `max_top_k` depth and truncated per request, so
//! two requests differing only in `top_k` share one cache entry.
//!
//! # Reload
//!
//! A reload builds a complete new snapshot (embedding every node) off to the
//! side and swaps it in. Requests already running keep the `Arc` they
//! started with and finish against the old taxonomy. A failed reload leaves
//! the old snapshot serving.
//!
//! After [`Engine::shutdown`] no reload can swap a snapshot back in; a
//! reload that was already building is discarded with
//! [`MatchError::ShutDown`].

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use hs_match_core::embedding::{embed_one, Embedder};
use hs_match_core::error::MatchError;
use hs_match_core::index::IndexKind;
use hs_match_core::matcher::{rank, MatchParams};
use hs_match_core::models::MatchCandidate;
use hs_match_core::normalize::Normalizer;
use hs_match_core::snapshot::TaxonomySnapshot;
use hs_match_core::taxonomy::{SourceFormat, Taxonomy};

use crate::cache::{CacheStats, ResultCache};
use crate::config::{CacheConfig, Config, MatchingConfig, TopKPolicy};
use crate::embedding::create_embedder;
use crate::isic::{final_codes, IsicFlag, IsicMap, IsicMapping};

/// Engine settings that do not change across reloads.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub matching: MatchingConfig,
    pub cache: CacheConfig,
    pub index_kind: IndexKind,
    pub batch_size: usize,
    pub embedding_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            matching: MatchingConfig::default(),
            cache: CacheConfig::default(),
            index_kind: IndexKind::BruteForce,
            batch_size: 64,
            embedding_timeout: Duration::from_secs(10),
        }
    }
}

impl EngineOptions {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            matching: config.matching.clone(),
            cache: config.cache.clone(),
            index_kind: config.index.index_kind()?,
            batch_size: config.embedding.batch_size,
            embedding_timeout: config.embedding.timeout(),
        })
    }
}

/// Where [`Engine::reload`] re-reads the taxonomy from.
#[derive(Debug, Clone)]
pub struct TaxonomySource {
    pub path: PathBuf,
    pub format: SourceFormat,
    pub isic_map_path: Option<PathBuf>,
}

impl TaxonomySource {
    /// Read and validate the taxonomy and the ISIC map.
    pub fn read(&self) -> Result<(Taxonomy, Option<IsicMap>)> {
        let json = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read taxonomy: {}", self.path.display()))?;
        let taxonomy = Taxonomy::from_json_str(&json, self.format)
            .with_context(|| format!("Invalid taxonomy: {}", self.path.display()))?;
        let isic = self
            .isic_map_path
            .as_deref()
            .map(IsicMap::load)
            .transpose()?;
        Ok((taxonomy, isic))
    }
}

/// Everything a request is answered from. Immutable apart from its cache.
pub struct Snapshot {
    embedded: TaxonomySnapshot,
    isic: Option<IsicMap>,
    cache: ResultCache,
    generation: u64,
}

impl Snapshot {
    pub fn taxonomy(&self) -> &Taxonomy {
        self.embedded.taxonomy()
    }

    pub fn embedded(&self) -> &TaxonomySnapshot {
        &self.embedded
    }

    pub fn isic(&self) -> Option<&IsicMap> {
        self.isic.as_ref()
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// Incremented by every successful reload; the initial snapshot is 0.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Per-request options for [`Engine::classify_with`].
#[derive(Debug, Clone, Default)]
pub struct ClassifyOptions {
    pub top_k: Option<i64>,
    /// ISIC industry hint; annotates results, never reorders them.
    pub isic: Option<String>,
    /// Keep the score breakdown on each candidate.
    pub explain: bool,
}

/// A full classification answer.
#[derive(Debug, Clone, Serialize)]
pub struct Classification {
    pub query: String,
    pub normalized: String,
    pub candidates: Vec<MatchCandidate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub isic: Option<IsicMapping>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub isic_flags: Option<Vec<IsicFlag>>,
    /// Codes to report: ISIC heading matches, else chapter matches, else
    /// the top candidate.
    pub final_codes: Vec<String>,
    pub taxonomy_version: Option<String>,
    pub generation: u64,
}

/// Counters and metadata for `hsm serve`'s `/stats`.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub nodes: usize,
    pub roots: usize,
    pub max_level: Option<u32>,
    pub taxonomy_version: Option<String>,
    pub generation: u64,
    pub reloads: u64,
    pub failed_reloads: u64,
    pub model: String,
    pub dims: usize,
    pub index: &'static str,
    pub built_at: DateTime<Utc>,
    pub isic_codes: usize,
    pub cache: CacheStats,
}

pub struct Engine {
    options: EngineOptions,
    embedder: Arc<dyn Embedder>,
    normalizer: Normalizer,
    source: Option<TaxonomySource>,
    current: RwLock<Arc<Snapshot>>,
    reload_lock: tokio::sync::Mutex<()>,
    reloads: AtomicU64,
    failed_reloads: AtomicU64,
    shut_down: AtomicBool,
}

impl Engine {
    /// Build an engine from an in-memory taxonomy.
    pub async fn new(
        options: EngineOptions,
        embedder: Arc<dyn Embedder>,
        normalizer: Normalizer,
        taxonomy: Taxonomy,
        isic: Option<IsicMap>,
    ) -> Result<Self, MatchError> {
        let snapshot = build_snapshot(&options, embedder.as_ref(), &normalizer, taxonomy, isic, 0)
            .await?;
        Ok(Self {
            options,
            embedder,
            normalizer,
            source: None,
            current: RwLock::new(Arc::new(snapshot)),
            reload_lock: tokio::sync::Mutex::new(()),
            reloads: AtomicU64::new(0),
            failed_reloads: AtomicU64::new(0),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Build an engine from a loaded configuration file.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let options = EngineOptions::from_config(config)?;
        let embedder = create_embedder(&config.embedding)?;
        let normalizer = config.normalizer.build();
        let source = TaxonomySource {
            path: config.taxonomy.path.clone(),
            format: config.taxonomy.format,
            isic_map_path: config.taxonomy.isic_map_path.clone(),
        };
        let (taxonomy, isic) = source.read()?;

        let mut engine = Self::new(options, embedder, normalizer, taxonomy, isic)
            .await
            .context("Failed to build taxonomy snapshot")?;
        engine.source = Some(source);
        Ok(engine)
    }

    /// The snapshot new requests are answered from.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        let guard = self.current.read().unwrap_or_else(|p| p.into_inner());
        Arc::clone(&guard)
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    /// Classify `raw` and return the ranked candidates.
    pub async fn classify(
        &self,
        raw: &str,
        top_k: Option<i64>,
    ) -> Result<Vec<MatchCandidate>, MatchError> {
        let options = ClassifyOptions {
            top_k,
            ..ClassifyOptions::default()
        };
        Ok(self.classify_with(raw, &options).await?.candidates)
    }

    pub async fn classify_with(
        &self,
        raw: &str,
        options: &ClassifyOptions,
    ) -> Result<Classification, MatchError> {
        let top_k = self.resolve_top_k(options.top_k)?;
        let normalized = self.normalizer.normalize(raw)?;
        let snapshot = self.snapshot();

        let started = Instant::now();
        let entry = snapshot
            .cache
            .get_or_compute(&normalized, || self.compute(&snapshot, &normalized))
            .await?;

        let mut candidates: Vec<MatchCandidate> =
            entry.candidates.iter().take(top_k).cloned().collect();
        if !options.explain {
            for c in &mut candidates {
                c.explain = None;
            }
        }

        let isic = options
            .isic
            .as_deref()
            .and_then(|code| snapshot.isic.as_ref().and_then(|m| m.lookup(code)))
            .cloned();
        if options.isic.is_some() && isic.is_none() {
            debug!(isic = options.isic.as_deref().unwrap_or(""), "unknown ISIC hint ignored");
        }
        let isic_flags = isic.as_ref().map(|m| m.flag(&candidates));
        let final_codes = final_codes(&candidates, isic_flags.as_deref());

        debug!(
            query = %normalized,
            returned = candidates.len(),
            top_k,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "classified"
        );

        Ok(Classification {
            query: raw.to_string(),
            normalized,
            candidates,
            isic,
            isic_flags,
            final_codes,
            taxonomy_version: snapshot.taxonomy().version().map(str::to_string),
            generation: snapshot.generation,
        })
    }

    fn resolve_top_k(&self, requested: Option<i64>) -> Result<usize, MatchError> {
        let m = &self.options.matching;
        let k = match requested {
            None => m.top_k_default,
            Some(k) if k <= 0 => match m.top_k_policy {
                TopKPolicy::Reject => return Err(MatchError::InvalidTopK(k)),
                TopKPolicy::Clamp => 1,
            },
            Some(k) => usize::try_from(k).unwrap_or(usize::MAX),
        };
        Ok(k.min(m.max_top_k))
    }

    async fn compute(
        &self,
        snapshot: &Snapshot,
        normalized: &str,
    ) -> Result<Vec<MatchCandidate>, MatchError> {
        let timeout = self.options.embedding_timeout;
        let query = tokio::time::timeout(timeout, embed_one(self.embedder.as_ref(), normalized))
            .await
            .map_err(|_| {
                warn!(timeout_ms = timeout.as_millis() as u64, "embedding timed out");
                MatchError::EmbeddingTimeout(timeout)
            })?
            .map_err(|e| {
                warn!(error = %e, "embedding failed");
                MatchError::from(e)
            })?;

        let m = &self.options.matching;
        let params = MatchParams {
            top_k: m.max_top_k,
            min_confidence_floor: m.min_confidence_floor,
            hierarchical_boost_amount: m.hierarchical_boost_amount,
            hierarchical_boost_threshold: m.hierarchical_boost_threshold,
        };
        rank(&query, &snapshot.embedded, &params)
    }

    /// Re-read the configured taxonomy source and swap it in.
    pub async fn reload(&self) -> Result<Arc<Snapshot>> {
        let source = self
            .source
            .as_ref()
            .context("Engine was built without a taxonomy source; nothing to reload")?;
        let (taxonomy, isic) = match source.read() {
            Ok(parts) => parts,
            Err(e) => {
                self.failed_reloads.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "reload failed; keeping current taxonomy");
                return Err(e);
            }
        };
        Ok(self.reload_with(taxonomy, isic).await?)
    }

    /// Embed `taxonomy` into a new snapshot and swap it in.
    pub async fn reload_with(
        &self,
        taxonomy: Taxonomy,
        isic: Option<IsicMap>,
    ) -> Result<Arc<Snapshot>, MatchError> {
        let _serial = self.reload_lock.lock().await;
        if self.is_shut_down() {
            return Err(MatchError::ShutDown);
        }
        let generation = self.snapshot().generation + 1;
        let started = Instant::now();

        let built = build_snapshot(
            &self.options,
            self.embedder.as_ref(),
            &self.normalizer,
            taxonomy,
            isic,
            generation,
        )
        .await;
        let snapshot = match built {
            Ok(s) => Arc::new(s),
            Err(e) => {
                self.failed_reloads.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "reload failed; keeping current taxonomy");
                return Err(e);
            }
        };

        {
            // Checked under the write lock so shutdown cannot slip in between.
            let mut guard = self.current.write().unwrap_or_else(|p| p.into_inner());
            if self.is_shut_down() {
                info!(generation, "engine shut down during reload; discarding new snapshot");
                return Err(MatchError::ShutDown);
            }
            *guard = Arc::clone(&snapshot);
        }
        self.reloads.fetch_add(1, Ordering::Relaxed);
        info!(
            generation,
            nodes = snapshot.taxonomy().len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "taxonomy reloaded"
        );
        Ok(snapshot)
    }

    pub async fn stats(&self) -> EngineStats {
        let snapshot = self.snapshot();
        let taxonomy = snapshot.taxonomy();
        EngineStats {
            nodes: taxonomy.len(),
            roots: taxonomy.roots().count(),
            max_level: taxonomy.max_level(),
            taxonomy_version: taxonomy.version().map(str::to_string),
            generation: snapshot.generation,
            reloads: self.reloads.load(Ordering::Relaxed),
            failed_reloads: self.failed_reloads.load(Ordering::Relaxed),
            model: snapshot.embedded.model_name().to_string(),
            dims: snapshot.embedded.dims(),
            index: snapshot.embedded.index().name(),
            built_at: snapshot.embedded.built_at(),
            isic_codes: snapshot.isic.as_ref().map(IsicMap::len).unwrap_or(0),
            cache: snapshot.cache.stats().await,
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Drop the taxonomy and its cache. Terminal: later reloads fail with
    /// [`MatchError::ShutDown`].
    ///
    /// Requests still holding the old snapshot finish normally; later
    /// requests fail with [`MatchError::EmptyTaxonomy`].
    pub fn shutdown(&self) {
        let generation = self.snapshot().generation + 1;
        let empty = Snapshot {
            embedded: match TaxonomySnapshot::from_parts(
                Taxonomy::default(),
                Vec::new(),
                IndexKind::BruteForce,
                self.embedder.model_name(),
            ) {
                Ok(s) => s,
                Err(e) => {
                    warn!(error = %e, "could not build empty snapshot");
                    return;
                }
            },
            isic: None,
            cache: ResultCache::disabled(),
            generation,
        };
        let mut guard = self.current.write().unwrap_or_else(|p| p.into_inner());
        self.shut_down.store(true, Ordering::SeqCst);
        *guard = Arc::new(empty);
        info!("engine shut down");
    }
}

async fn build_snapshot(
    options: &EngineOptions,
    embedder: &dyn Embedder,
    normalizer: &Normalizer,
    taxonomy: Taxonomy,
    isic: Option<IsicMap>,
    generation: u64,
) -> Result<Snapshot, MatchError> {
    let embedded = TaxonomySnapshot::build(
        taxonomy,
        embedder,
        normalizer,
        options.index_kind,
        options.batch_size,
    )
    .await?;
    Ok(Snapshot {
        embedded,
        isic,
        cache: ResultCache::new(&options.cache),
        generation,
    })
}
