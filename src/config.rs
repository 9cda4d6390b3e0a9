use anyhow::{Context, Result};
use hs_match_core::index::IndexKind;
use hs_match_core::normalize::Normalizer;
use hs_match_core::taxonomy::SourceFormat;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub taxonomy: TaxonomyConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub normalizer: NormalizerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TaxonomyConfig {
    pub path: PathBuf,
    #[serde(default = "default_format")]
    pub format: SourceFormat,
    #[serde(default)]
    pub isic_map_path: Option<PathBuf>,
}

fn default_format() -> SourceFormat {
    SourceFormat::Records
}

/// What to do with a request whose `top_k` is zero or negative.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TopKPolicy {
    #[default]
    Reject,
    Clamp,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MatchingConfig {
    #[serde(default = "default_top_k")]
    pub top_k_default: usize,
    #[serde(default = "default_max_top_k")]
    pub max_top_k: usize,
    #[serde(default)]
    pub top_k_policy: TopKPolicy,
    #[serde(default = "default_floor")]
    pub min_confidence_floor: f64,
    #[serde(default = "default_boost_amount")]
    pub hierarchical_boost_amount: f64,
    #[serde(default = "default_boost_threshold")]
    pub hierarchical_boost_threshold: f64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            top_k_default: default_top_k(),
            max_top_k: default_max_top_k(),
            top_k_policy: TopKPolicy::default(),
            min_confidence_floor: default_floor(),
            hierarchical_boost_amount: default_boost_amount(),
            hierarchical_boost_threshold: default_boost_threshold(),
        }
    }
}

fn default_top_k() -> usize {
    10
}
fn default_max_top_k() -> usize {
    50
}
fn default_floor() -> f64 {
    0.5
}
fn default_boost_amount() -> f64 {
    0.05
}
fn default_boost_threshold() -> f64 {
    0.7
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_kind")]
    pub kind: String,
    #[serde(default = "default_nlist")]
    pub nlist: usize,
    #[serde(default = "default_nprobe")]
    pub nprobe: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            kind: default_index_kind(),
            nlist: default_nlist(),
            nprobe: default_nprobe(),
        }
    }
}

fn default_index_kind() -> String {
    "brute-force".to_string()
}
fn default_nlist() -> usize {
    64
}
fn default_nprobe() -> usize {
    8
}

impl IndexConfig {
    pub fn index_kind(&self) -> Result<IndexKind> {
        match self.kind.as_str() {
            "brute-force" => Ok(IndexKind::BruteForce),
            "ivf" => Ok(IndexKind::Ivf {
                nlist: self.nlist,
                nprobe: self.nprobe,
            }),
            other => anyhow::bail!(
                "Unknown index kind: '{}'. Must be brute-force or ivf.",
                other
            ),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct NormalizerConfig {
    /// Replaces the built-in stop-term list when set.
    #[serde(default)]
    pub stop_terms: Option<Vec<String>>,
}

impl NormalizerConfig {
    pub fn build(&self) -> Normalizer {
        match &self.stop_terms {
            Some(terms) => Normalizer::new(terms),
            None => Normalizer::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: u64,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_max_entries: default_cache_max_entries(),
            cache_ttl_seconds: default_cache_ttl(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_cache_max_entries() -> u64 {
    10_000
}
fn default_cache_ttl() -> u64 {
    3600
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_embedding_timeout")]
    pub embedding_timeout_seconds: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            embedding_timeout_seconds: default_embedding_timeout(),
        }
    }
}

fn default_provider() -> String {
    "hashing".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_embedding_timeout() -> u64 {
    10
}

impl EmbeddingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.embedding_timeout_seconds)
    }

    fn is_remote(&self) -> bool {
        matches!(self.provider.as_str(), "openai" | "ollama")
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Relative data paths missing from the working directory are resolved
    // against the directory above the config file (config/hsm.toml -> .).
    let base = path
        .parent()
        .and_then(Path::parent)
        .map(Path::to_path_buf)
        .unwrap_or_default();
    config.taxonomy.path = resolve(&base, &config.taxonomy.path);
    if let Some(isic) = config.taxonomy.isic_map_path.take() {
        config.taxonomy.isic_map_path = Some(resolve(&base, &isic));
    }

    validate(&config)?;
    Ok(config)
}

fn resolve(base: &Path, p: &Path) -> PathBuf {
    if p.is_absolute() || p.exists() {
        p.to_path_buf()
    } else {
        base.join(p)
    }
}

fn validate(config: &Config) -> Result<()> {
    // Validate matching
    let m = &config.matching;
    if m.top_k_default == 0 {
        anyhow::bail!("matching.top_k_default must be >= 1");
    }
    if m.max_top_k < m.top_k_default {
        anyhow::bail!("matching.max_top_k must be >= matching.top_k_default");
    }
    for (name, value) in [
        ("min_confidence_floor", m.min_confidence_floor),
        ("hierarchical_boost_amount", m.hierarchical_boost_amount),
        ("hierarchical_boost_threshold", m.hierarchical_boost_threshold),
    ] {
        if !(0.0..=1.0).contains(&value) {
            anyhow::bail!("matching.{} must be in [0.0, 1.0]", name);
        }
    }

    // Validate index
    config.index.index_kind()?;
    if config.index.kind == "ivf" && (config.index.nlist == 0 || config.index.nprobe == 0) {
        anyhow::bail!("index.nlist and index.nprobe must be > 0 for the ivf index");
    }

    // Validate cache
    if config.cache.enabled && config.cache.cache_max_entries == 0 {
        anyhow::bail!("cache.cache_max_entries must be > 0 when the cache is enabled");
    }
    if config.cache.enabled && config.cache.cache_ttl_seconds == 0 {
        anyhow::bail!("cache.cache_ttl_seconds must be > 0 when the cache is enabled");
    }

    // Validate embedding
    let e = &config.embedding;
    if e.embedding_timeout_seconds == 0 {
        anyhow::bail!("embedding.embedding_timeout_seconds must be > 0");
    }
    if e.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }
    if e.dims == Some(0) {
        anyhow::bail!("embedding.dims must be > 0");
    }
    if e.is_remote() {
        if e.dims.is_none() {
            anyhow::bail!("embedding.dims must be set when provider is '{}'", e.provider);
        }
        if e.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                e.provider
            );
        }
    }

    match e.provider.as_str() {
        "hashing" | "openai" | "ollama" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be hashing, openai, ollama, or local.",
            other
        ),
    }

    // Validate server
    config
        .server
        .bind
        .parse::<SocketAddr>()
        .with_context(|| format!("server.bind is not a socket address: {}", config.server.bind))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("hsm.toml");
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "[taxonomy]\npath = \"/data/taxonomy.json\"\n");
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.taxonomy.format, SourceFormat::Records);
        assert_eq!(cfg.matching.top_k_default, 10);
        assert_eq!(cfg.matching.top_k_policy, TopKPolicy::Reject);
        assert_eq!(cfg.index.index_kind().unwrap(), IndexKind::BruteForce);
        assert!(cfg.cache.enabled);
        assert_eq!(cfg.embedding.provider, "hashing");
        assert_eq!(cfg.server.bind, "127.0.0.1:7341");
    }

    #[test]
    fn test_full_config() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            r#"
[taxonomy]
path = "/data/hs.json"
format = "hs-flat"

[matching]
top_k_policy = "clamp"
min_confidence_floor = 0.4

[index]
kind = "ivf"
nlist = 16
nprobe = 4

[normalizer]
stop_terms = ["the"]

[cache]
enabled = false
"#,
        );
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.taxonomy.format, SourceFormat::HsFlat);
        assert_eq!(cfg.matching.top_k_policy, TopKPolicy::Clamp);
        assert_eq!(
            cfg.index.index_kind().unwrap(),
            IndexKind::Ivf { nlist: 16, nprobe: 4 }
        );
        assert!(!cfg.cache.enabled);
        let n = cfg.normalizer.build();
        assert_eq!(n.normalize("the parts").unwrap(), "parts");
    }

    #[test]
    fn test_rejects_out_of_range_floor() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "[taxonomy]\npath = \"t.json\"\n[matching]\nmin_confidence_floor = 1.5\n",
        );
        let err = load_config(&path).unwrap_err().to_string();
        assert!(err.contains("min_confidence_floor"), "{}", err);
    }

    #[test]
    fn test_remote_provider_requires_model_and_dims() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "[taxonomy]\npath = \"t.json\"\n[embedding]\nprovider = \"openai\"\n",
        );
        let err = load_config(&path).unwrap_err().to_string();
        assert!(err.contains("embedding.dims"), "{}", err);
    }

    #[test]
    fn test_unknown_provider_and_index() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "[taxonomy]\npath = \"t.json\"\n[embedding]\nprovider = \"magic\"\n",
        );
        assert!(load_config(&path).is_err());

        let path = write(&dir, "[taxonomy]\npath = \"t.json\"\n[index]\nkind = \"hnsw\"\n");
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_relative_paths_resolve_next_to_config_dir() {
        let dir = TempDir::new().unwrap();
        let config_dir = dir.path().join("config");
        fs::create_dir_all(&config_dir).unwrap();
        let path = config_dir.join("hsm.toml");
        fs::write(
            &path,
            "[taxonomy]\npath = \"data/nowhere-else.json\"\nisic_map_path = \"data/isic.json\"\n",
        )
        .unwrap();
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.taxonomy.path, dir.path().join("data/nowhere-else.json"));
        assert_eq!(
            cfg.taxonomy.isic_map_path,
            Some(dir.path().join("data/isic.json"))
        );
    }
}
