//! Layered configuration for the search engine.
//!
//! Sources, later wins:
//! - built-in defaults
//! - `settings.toml` (next to the index root, or passed explicitly)
//! - environment variables prefixed with `CS_`, double underscore for
//!   nesting: `CS_INDEXING__MAX_FILE_SIZE=2000000`, `CS_CACHE__TTL_SECS=60`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Root directory holding per-workspace index directories.
    #[serde(default = "default_index_root")]
    pub index_root: PathBuf,

    #[serde(default)]
    pub indexing: IndexingConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub resources: ResourceConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct IndexingConfig {
    /// Parallel file workers for the initial crawl.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Files larger than this are skipped.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Directory names never descended into.
    #[serde(default = "default_excluded_dirs")]
    pub excluded_dirs: Vec<String>,

    /// Path to the external symbol extractor binary.
    #[serde(default = "default_extractor")]
    pub extractor: PathBuf,

    /// Watcher coalescing window in milliseconds.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Bounded capacity of the watcher work queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Retry cap for paths whose tier writes diverged.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SearchConfig {
    /// Default token budget when the caller does not declare one.
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: usize,

    /// Hard ceiling on hits fetched from the text tier per query.
    #[serde(default = "default_max_hits")]
    pub max_hits: usize,

    /// Context lines captured on either side of a match.
    #[serde(default = "default_context_lines")]
    pub context_lines: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmbeddingConfig {
    /// Enable the vector tier when the service is reachable.
    #[serde(default)]
    pub enabled: bool,

    /// Base URL of the embedding service.
    #[serde(default = "default_embedding_url")]
    pub url: String,

    /// Expected vector dimension.
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Per-call timeout in milliseconds.
    #[serde(default = "default_embed_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CacheConfig {
    /// Default TTL for cached responses, seconds.
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,

    /// Approximate memory bound in bytes.
    #[serde(default = "default_cache_bytes")]
    pub max_bytes: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ResourceConfig {
    /// Blob expiry, seconds.
    #[serde(default = "default_resource_ttl")]
    pub ttl_secs: u64,

    /// Budget for a resource-store write before it is abandoned, ms.
    #[serde(default = "default_resource_timeout_ms")]
    pub write_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Default level when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-module overrides, e.g. `indexer = "debug"`.
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

fn default_index_root() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("codesearch")
}
fn default_workers() -> usize {
    num_cpus::get().clamp(2, 8)
}
fn default_max_file_size() -> u64 {
    1_048_576
}
fn default_excluded_dirs() -> Vec<String> {
    [
        ".git", ".hg", ".svn", "node_modules", "target", "bin", "obj", "build", "dist", "out",
        ".idea", ".vs", ".vscode", "__pycache__", ".venv", "venv", "packages", "vendor",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_extractor() -> PathBuf {
    PathBuf::from("extract")
}
fn default_debounce_ms() -> u64 {
    250
}
fn default_queue_capacity() -> usize {
    1024
}
fn default_max_retries() -> u32 {
    5
}
fn default_max_tokens() -> usize {
    8000
}
fn default_max_hits() -> usize {
    500
}
fn default_context_lines() -> usize {
    2
}
fn default_embedding_url() -> String {
    "http://127.0.0.1:8321".to_string()
}
fn default_dimension() -> usize {
    384
}
fn default_embed_timeout_ms() -> u64 {
    2_000
}
fn default_cache_ttl() -> u64 {
    300
}
fn default_cache_bytes() -> usize {
    32 * 1024 * 1024
}
fn default_resource_ttl() -> u64 {
    3_600
}
fn default_resource_timeout_ms() -> u64 {
    500
}
fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            index_root: default_index_root(),
            indexing: IndexingConfig::default(),
            search: SearchConfig::default(),
            embedding: EmbeddingConfig::default(),
            cache: CacheConfig::default(),
            resources: ResourceConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_file_size: default_max_file_size(),
            excluded_dirs: default_excluded_dirs(),
            extractor: default_extractor(),
            debounce_ms: default_debounce_ms(),
            queue_capacity: default_queue_capacity(),
            max_retries: default_max_retries(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_max_tokens: default_max_tokens(),
            max_hits: default_max_hits(),
            context_lines: default_context_lines(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_embedding_url(),
            dimension: default_dimension(),
            timeout_ms: default_embed_timeout_ms(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl(),
            max_bytes: default_cache_bytes(),
        }
    }
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_resource_ttl(),
            write_timeout_ms: default_resource_timeout_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl Settings {
    /// Load from defaults, the given TOML file (if it exists) and `CS_` env.
    pub fn load_from(path: impl AsRef<std::path::Path>) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("CS_").map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
            .extract()
    }

    /// Load using the conventional `settings.toml` next to the index root.
    pub fn load() -> Result<Self, figment::Error> {
        let path = default_index_root().join("settings.toml");
        Self::load_from(path)
    }

    /// Write the current settings as pretty TOML.
    pub fn save(&self, path: impl AsRef<std::path::Path>) -> anyhow::Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_are_sane() {
        let s = Settings::default();
        assert!(s.indexing.workers >= 2);
        assert_eq!(s.indexing.debounce_ms, 250);
        assert!(s.indexing.excluded_dirs.iter().any(|d| d == "node_modules"));
        assert!(!s.embedding.enabled);
    }

    #[test]
    fn toml_layer_overrides_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(
            &path,
            r#"
[indexing]
max_file_size = 2048
debounce_ms = 100

[search]
default_max_tokens = 4000

[cache]
ttl_secs = 60
"#,
        )
        .unwrap();

        let s = Settings::load_from(&path).unwrap();
        assert_eq!(s.indexing.max_file_size, 2048);
        assert_eq!(s.indexing.debounce_ms, 100);
        assert_eq!(s.search.default_max_tokens, 4000);
        assert_eq!(s.cache.ttl_secs, 60);
        // untouched defaults survive
        assert_eq!(s.indexing.max_retries, 5);
    }

    #[test]
    fn save_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.toml");
        let mut s = Settings::default();
        s.search.max_hits = 123;
        s.save(&path).unwrap();
        let loaded = Settings::load_from(&path).unwrap();
        assert_eq!(loaded.search.max_hits, 123);
    }
}
