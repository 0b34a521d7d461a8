//! Indexer: initial crawl and per-file upserts across all three tiers.
//!
//! The structured store is the source of truth; the text and vector tiers
//! are rebuildable projections. A file's writes happen under a per-path
//! lock so at most one upsert or delete is in flight per path. If a
//! projection write fails after the structured store committed, the path
//! is marked stale and retried with exponential backoff; queries keep
//! running against the last consistent snapshot.

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::embedding::{EmbeddingClient, symbol_embedding_text};
use crate::error::IndexerResult;
use crate::indexing::extractor::SymbolExtractor;
use crate::indexing::walker::{WorkspaceWalker, eligibility};
use crate::storage::{StructuredStore, TextDocument, TextIndex};
use crate::types::{FileRecord, Identifier, Symbol, SymbolEmbedding};
use crate::workspace::WorkspaceLayout;

/// Outcome for a single file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexOutcome {
    Indexed,
    /// Content hash unchanged; nothing written.
    Cached,
    Skipped(&'static str),
    Removed,
}

/// Crawl statistics.
#[derive(Debug, Clone, Default)]
pub struct IndexStats {
    pub files_indexed: usize,
    pub files_cached: usize,
    pub files_skipped: usize,
    pub files_failed: usize,
    pub symbols: usize,
    pub identifiers: usize,
    pub elapsed_ms: u64,
}

/// Base delay for stale-path retries; doubles per attempt.
const RETRY_BASE: Duration = Duration::from_secs(2);
/// Backoff ceiling.
const RETRY_CAP: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
struct RetryState {
    attempts: u32,
    next_attempt: Instant,
    reason: String,
}

/// Per-workspace indexer.
pub struct Indexer {
    settings: Arc<Settings>,
    layout: WorkspaceLayout,
    store: Arc<StructuredStore>,
    text: Arc<TextIndex>,
    extractor: Arc<dyn SymbolExtractor>,
    embedder: Option<Arc<dyn EmbeddingClient>>,
    runtime: Option<tokio::runtime::Handle>,
    path_locks: DashMap<String, Arc<parking_lot::Mutex<()>>>,
    stale: DashMap<String, RetryState>,
    extractor_failures: AtomicUsize,
}

impl Indexer {
    pub fn new(
        settings: Arc<Settings>,
        layout: WorkspaceLayout,
        store: Arc<StructuredStore>,
        text: Arc<TextIndex>,
        extractor: Arc<dyn SymbolExtractor>,
    ) -> Self {
        Self {
            settings,
            layout,
            store,
            text,
            extractor,
            embedder: None,
            runtime: None,
            path_locks: DashMap::new(),
            stale: DashMap::new(),
            extractor_failures: AtomicUsize::new(0),
        }
    }

    /// Enable the vector tier. The runtime handle lets the synchronous
    /// upsert path call the async embedding client from blocking threads.
    pub fn with_embedder(
        mut self,
        embedder: Arc<dyn EmbeddingClient>,
        runtime: tokio::runtime::Handle,
    ) -> Self {
        self.embedder = Some(embedder);
        self.runtime = Some(runtime);
        self
    }

    pub fn layout(&self) -> &WorkspaceLayout {
        &self.layout
    }

    /// Full crawl of the workspace. Unchanged files (by content hash) are
    /// skipped unless `force` is set.
    pub fn index_workspace(
        &self,
        force: bool,
        max_files: Option<usize>,
        cancel: Option<&CancellationToken>,
        mut on_file: impl FnMut(&Path),
    ) -> IndexerResult<IndexStats> {
        let start = Instant::now();
        let walker = WorkspaceWalker::new(self.settings.clone());
        let mut files = walker.walk(&self.layout.canonical_path);
        if let Some(max) = max_files {
            files.truncate(max);
        }
        info!(
            "indexing {} files under {}",
            files.len(),
            self.layout.canonical_path.display()
        );

        let mut stats = IndexStats::default();
        self.text.start_batch()?;
        for file in &files {
            if cancel.is_some_and(|c| c.is_cancelled()) {
                break;
            }
            on_file(file);
            match self.index_file(file, force) {
                Ok(IndexOutcome::Indexed) => stats.files_indexed += 1,
                Ok(IndexOutcome::Cached) => stats.files_cached += 1,
                Ok(_) => stats.files_skipped += 1,
                Err(e) => {
                    warn!("failed to index {}: {e}", file.display());
                    stats.files_failed += 1;
                }
            }
        }
        self.text.commit_batch()?;

        stats.symbols = self.store.symbol_count().unwrap_or(0);
        stats.identifiers = self.store.identifier_count().unwrap_or(0);
        stats.elapsed_ms = start.elapsed().as_millis() as u64;
        info!(
            "crawl done: {} indexed, {} cached, {} failed in {}ms",
            stats.files_indexed, stats.files_cached, stats.files_failed, stats.elapsed_ms
        );
        Ok(stats)
    }

    /// Index one file. Serialized per path; cross-path calls may proceed
    /// in parallel.
    pub fn index_file(&self, abs_path: &Path, force: bool) -> IndexerResult<IndexOutcome> {
        let Some(rel) = self.layout.relative_unix_path(abs_path) else {
            return Ok(IndexOutcome::Skipped("outside workspace"));
        };
        let lock = self.path_lock(&rel);
        let _guard = lock.lock();

        if eligibility(abs_path, self.settings.indexing.max_file_size).is_err() {
            return Ok(IndexOutcome::Skipped("ineligible"));
        }
        let content = std::fs::read_to_string(abs_path).map_err(|e| {
            crate::error::IndexerError::FileRead {
                path: abs_path.to_path_buf(),
                source: e,
            }
        })?;
        let hash = content_hash(&content);

        if !force && self.store.file_hash(&rel).ok().flatten().as_deref() == Some(hash.as_str()) {
            return Ok(IndexOutcome::Cached);
        }

        let meta = std::fs::metadata(abs_path).ok();
        let last_modified = meta
            .as_ref()
            .and_then(|m| m.modified().ok())
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or_else(now_epoch);

        let (mut symbols, mut identifiers) = match self.extractor.extract(abs_path) {
            Ok(ex) => (ex.symbols, ex.identifiers),
            Err(e) => {
                // degraded: the file stays text-searchable without symbols
                self.extractor_failures.fetch_add(1, Ordering::Relaxed);
                debug!("extractor degraded for {rel}: {e}");
                (Vec::new(), Vec::new())
            }
        };
        rewrite_records(&mut symbols, &mut identifiers, &rel, &hash, &content);

        let embeddings = self.embed_symbols(&symbols);

        let record = FileRecord {
            path: rel.clone(),
            language: language_for(&rel),
            hash,
            size: content.len() as i64,
            last_modified,
            last_indexed: now_epoch(),
            content: Some(content.clone()),
            symbol_count: symbols.len() as i64,
        };

        self.store
            .upsert_file(&record, &symbols, &identifiers, embeddings.as_deref())?;

        let doc = TextDocument {
            path: rel.clone(),
            content,
            type_names: symbols.iter().map(|s| s.name.clone()).collect(),
            last_modified: last_modified.max(0) as u64,
        };
        if let Err(e) = self.text.upsert_document(&doc) {
            // structured store committed; projection diverged
            self.mark_stale(&rel, format!("text index write failed: {e}"));
            return Ok(IndexOutcome::Indexed);
        }

        self.stale.remove(&rel);
        Ok(IndexOutcome::Indexed)
    }

    /// Remove a file from every tier.
    pub fn remove_file(&self, abs_path: &Path) -> IndexerResult<IndexOutcome> {
        let Some(rel) = self.layout.relative_unix_path(abs_path) else {
            return Ok(IndexOutcome::Skipped("outside workspace"));
        };
        let lock = self.path_lock(&rel);
        let _guard = lock.lock();

        self.store.delete_file(&rel)?;
        if let Err(e) = self.text.delete_document(&rel) {
            self.mark_stale(&rel, format!("text index delete failed: {e}"));
        } else {
            self.stale.remove(&rel);
        }
        debug!("removed {rel}");
        Ok(IndexOutcome::Removed)
    }

    /// Retry stale paths whose backoff has elapsed. Returns how many were
    /// repaired.
    pub fn retry_stale(&self) -> usize {
        let now = Instant::now();
        let due: Vec<(String, RetryState)> = self
            .stale
            .iter()
            .filter(|e| e.value().next_attempt <= now)
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        let mut repaired = 0;
        for (rel, state) in due {
            if state.attempts >= self.settings.indexing.max_retries {
                continue;
            }
            let abs = self.layout.absolute_path(&rel);
            let result = if abs.is_file() {
                self.index_file(&abs, true).map(|_| ())
            } else {
                self.remove_file(&abs).map(|_| ())
            };
            match result {
                Ok(()) if !self.stale.contains_key(&rel) => {
                    repaired += 1;
                }
                _ => {
                    let attempts = state.attempts + 1;
                    let backoff = RETRY_BASE
                        .checked_mul(1 << attempts.min(8))
                        .unwrap_or(RETRY_CAP)
                        .min(RETRY_CAP);
                    self.stale.insert(
                        rel.clone(),
                        RetryState {
                            attempts,
                            next_attempt: now + backoff,
                            reason: state.reason.clone(),
                        },
                    );
                    if attempts >= self.settings.indexing.max_retries {
                        warn!("index inconsistency for {rel}: {} (giving up)", state.reason);
                    }
                }
            }
        }
        repaired
    }

    /// Paths currently marked inconsistent, for diagnostics.
    pub fn stale_paths(&self) -> Vec<String> {
        self.stale.iter().map(|e| e.key().clone()).collect()
    }

    /// Files the extractor could not process in this session.
    pub fn extractor_failure_count(&self) -> usize {
        self.extractor_failures.load(Ordering::Relaxed)
    }

    fn mark_stale(&self, rel: &str, reason: String) {
        warn!("marking {rel} stale: {reason}");
        self.stale.insert(
            rel.to_string(),
            RetryState {
                attempts: 0,
                next_attempt: Instant::now() + RETRY_BASE,
                reason,
            },
        );
    }

    fn path_lock(&self, rel: &str) -> Arc<parking_lot::Mutex<()>> {
        self.path_locks
            .entry(rel.to_string())
            .or_insert_with(|| Arc::new(parking_lot::Mutex::new(())))
            .clone()
    }

    /// Embed symbols if the vector tier is enabled. Any failure logs and
    /// returns None; the file upsert proceeds without embeddings.
    fn embed_symbols(&self, symbols: &[Symbol]) -> Option<Vec<SymbolEmbedding>> {
        let embedder = self.embedder.as_ref()?;
        let runtime = self.runtime.as_ref()?;
        if symbols.is_empty() {
            return Some(Vec::new());
        }
        let result = runtime.block_on(async {
            let mut out = Vec::with_capacity(symbols.len());
            for s in symbols {
                let text = symbol_embedding_text(
                    &s.kind,
                    &s.name,
                    s.signature.as_deref(),
                    s.doc_comment.as_deref(),
                );
                let vector = embedder.embed(&text).await?;
                out.push(SymbolEmbedding {
                    symbol_id: s.id.clone(),
                    vector,
                });
            }
            Ok::<_, crate::error::ToolError>(out)
        });
        match result {
            Ok(embeddings) => Some(embeddings),
            Err(e) => {
                warn!("embedding generation failed, continuing without vectors: {e}");
                None
            }
        }
    }
}

/// Point extracted records at the stored relative path, stamp the content
/// hash, and fill missing identifier contexts from the source line.
fn rewrite_records(
    symbols: &mut [Symbol],
    identifiers: &mut [Identifier],
    rel: &str,
    hash: &str,
    content: &str,
) {
    let lines: Vec<&str> = content.lines().collect();
    for s in symbols.iter_mut() {
        s.file_path = rel.to_string();
        s.file_hash = hash.to_string();
    }
    for i in identifiers.iter_mut() {
        i.file_path = rel.to_string();
        if i.code_context.is_none() {
            let idx = i.start_line.saturating_sub(1) as usize;
            if let Some(line) = lines.get(idx) {
                i.code_context = Some(line.trim_end().to_string());
            }
        }
    }
}

fn content_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

fn now_epoch() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Language tag from the file extension; unrecognized extensions keep the
/// extension itself as the tag.
fn language_for(path: &str) -> String {
    let ext = path.rsplit('.').next().unwrap_or("").to_lowercase();
    match ext.as_str() {
        "rs" => "rust",
        "py" | "pyi" => "python",
        "ts" | "tsx" => "typescript",
        "js" | "jsx" => "javascript",
        "go" => "go",
        "java" => "java",
        "kt" | "kts" => "kotlin",
        "cs" => "csharp",
        "c" | "h" => "c",
        "cpp" | "cc" | "hpp" => "cpp",
        "rb" => "ruby",
        "php" => "php",
        "swift" => "swift",
        "md" => "markdown",
        "txt" => "text",
        other => return other.to_string(),
    }
    .to_string()
}
