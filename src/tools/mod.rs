//! Query orchestrator: one handler per tool.
//!
//! Every handler follows the same shape: resolve the workspace engine,
//! consult the response cache, run the query across the storage tiers,
//! and hand results to the response builder. Failures become
//! `success=false` envelopes; nothing raises across the tool boundary.

pub mod file_search;
pub mod references;
pub mod refactor;
pub mod similar;
pub mod symbols;
pub mod text_search;

use dashmap::DashMap;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::Settings;
use crate::embedding::{EmbeddingClient, HttpEmbeddingClient};
use crate::error::{ToolError, ToolResult};
use crate::indexing::{CliExtractor, Indexer, NullExtractor, SymbolExtractor};
use crate::response::builder::MIN_VIABLE_BUDGET;
use crate::response::{
    BuildContext, ResponseBuilder, ResponseCache, ResponseMode, ResourceStore, ToolResponse,
};
use crate::storage::{StructuredStore, TextIndex};
use crate::workspace::WorkspaceLayout;

/// Parameters shared by every tool.
#[derive(Debug, Clone, Deserialize)]
pub struct CommonParams {
    pub workspace: String,
    #[serde(default)]
    pub max_tokens: Option<usize>,
    #[serde(default)]
    pub response_mode: Option<ResponseMode>,
    #[serde(default)]
    pub no_cache: bool,
    #[serde(default = "default_store_full")]
    pub store_full_results: bool,
}

fn default_store_full() -> bool {
    true
}

/// One workspace's full query stack.
pub struct SearchEngine {
    pub(crate) settings: Arc<Settings>,
    pub(crate) layout: WorkspaceLayout,
    pub(crate) store: Arc<StructuredStore>,
    pub(crate) text: Arc<TextIndex>,
    pub(crate) indexer: Arc<Indexer>,
    pub(crate) cache: Arc<ResponseCache>,
    pub(crate) resources: Arc<ResourceStore>,
    pub(crate) builder: ResponseBuilder,
    pub(crate) embedder: Option<Arc<dyn EmbeddingClient>>,
}

impl SearchEngine {
    /// Open the engine for a workspace, creating index directories if
    /// needed. Call sites that require an existing index check
    /// `index_ready` first.
    pub fn open(settings: Arc<Settings>, workspace: &Path) -> ToolResult<Self> {
        let layout = WorkspaceLayout::resolve(&settings.index_root, workspace)?;
        layout.ensure_dirs().map_err(|e| ToolError::Internal(e.to_string()))?;

        let store = Arc::new(StructuredStore::open(&layout.db_path)?);
        let text = Arc::new(TextIndex::open(&layout.text_index_dir)?);
        let extractor: Arc<dyn SymbolExtractor> =
            if settings.indexing.extractor.as_os_str().is_empty() {
                Arc::new(NullExtractor)
            } else {
                Arc::new(CliExtractor::new(settings.indexing.extractor.clone()))
            };

        // vector tier is optional: it needs both the embedding service
        // config and a running async runtime for the HTTP client
        let embedder: Option<Arc<dyn EmbeddingClient>> = if settings.embedding.enabled {
            match HttpEmbeddingClient::new(&settings.embedding) {
                Ok(client) => Some(Arc::new(client)),
                Err(e) => {
                    tracing::warn!("embedding client unavailable, vector tier disabled: {e}");
                    None
                }
            }
        } else {
            None
        };

        let mut indexer = Indexer::new(
            settings.clone(),
            layout.clone(),
            store.clone(),
            text.clone(),
            extractor,
        );
        if let (Some(embedder), Ok(handle)) = (
            embedder.clone(),
            tokio::runtime::Handle::try_current(),
        ) {
            indexer = indexer.with_embedder(embedder, handle);
        }
        let indexer = Arc::new(indexer);
        let cache = Arc::new(ResponseCache::new(&settings.cache));
        let resources = Arc::new(ResourceStore::new(&layout.index_dir, &settings.resources));
        let builder = ResponseBuilder::new(Some(resources.clone()));

        Ok(Self {
            settings,
            layout,
            store,
            text,
            indexer,
            cache,
            resources,
            builder,
            embedder,
        })
    }

    pub fn indexer(&self) -> Arc<Indexer> {
        self.indexer.clone()
    }

    /// Direct handle to the structured store, for diagnostics and tests.
    pub fn store(&self) -> Arc<StructuredStore> {
        self.store.clone()
    }

    /// Direct handle to the text index, for diagnostics and tests.
    pub fn text_index(&self) -> Arc<TextIndex> {
        self.text.clone()
    }

    pub fn cache(&self) -> Arc<ResponseCache> {
        self.cache.clone()
    }

    pub fn resources(&self) -> Arc<ResourceStore> {
        self.resources.clone()
    }

    /// Whether this workspace has been indexed at least once.
    pub fn index_ready(&self) -> bool {
        self.store.file_count().map(|n| n > 0).unwrap_or(false)
    }

    pub(crate) fn require_index(&self) -> ToolResult<()> {
        if self.index_ready() {
            Ok(())
        } else {
            Err(ToolError::IndexMissing {
                workspace: self.layout.canonical_path.display().to_string(),
            })
        }
    }

    /// Resolve the effective token budget for a request.
    pub(crate) fn budget(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.settings.search.default_max_tokens)
            .max(MIN_VIABLE_BUDGET)
    }

    pub(crate) fn build_context(
        &self,
        tool: &str,
        common: &CommonParams,
        query: Option<String>,
        started: Instant,
    ) -> BuildContext {
        BuildContext {
            tool: tool.to_string(),
            mode: common.response_mode.unwrap_or_default(),
            token_limit: self.budget(common.max_tokens),
            store_full_results: common.store_full_results,
            query,
            elapsed_ms: started.elapsed().as_millis() as u64,
        }
    }

    /// Crawl (or re-crawl) the workspace and report index statistics.
    pub fn index_workspace(
        &self,
        common: &CommonParams,
        force: bool,
        cancel: &CancellationToken,
    ) -> ToolResult<ToolResponse> {
        let started = Instant::now();
        let stats = self
            .indexer
            .index_workspace(force, None, Some(cancel), |_| {})?;
        if cancel.is_cancelled() {
            return Err(ToolError::Cancelled);
        }
        self.cache.invalidate_all();

        let files = self.store.file_count()?;
        let stale = self.indexer.stale_paths();
        let mut extension_data = BTreeMap::new();
        extension_data.insert("workspaceHash".to_string(), json!(self.layout.hash));
        if !stale.is_empty() {
            extension_data.insert("stalePaths".to_string(), json!(stale));
        }
        if self.indexer.extractor_failure_count() > 0 {
            extension_data.insert(
                "extractorFailures".to_string(),
                json!(self.indexer.extractor_failure_count()),
            );
        }
        extension_data.insert(
            "semanticEnabled".to_string(),
            json!(self.embedder.is_some()),
        );

        let item = json!({
            "filesIndexed": stats.files_indexed,
            "filesCached": stats.files_cached,
            "filesSkipped": stats.files_skipped,
            "filesFailed": stats.files_failed,
            "totalFiles": files,
            "symbols": stats.symbols,
            "identifiers": stats.identifiers,
            "elapsedMs": stats.elapsed_ms,
        });
        let summary = format!(
            "Indexed {} files ({} unchanged) with {} symbols and {} identifiers",
            stats.files_indexed, stats.files_cached, stats.symbols, stats.identifiers
        );
        let ctx = self.build_context("index_workspace", common, None, started);
        Ok(self.builder.build(summary, vec![item], extension_data, &ctx))
    }
}

pub(crate) fn ensure_not_cancelled(cancel: &CancellationToken) -> ToolResult<()> {
    if cancel.is_cancelled() {
        Err(ToolError::Cancelled)
    } else {
        Ok(())
    }
}

/// Registry of engines, one per workspace hash. The MCP server and the
/// embedded CLI share this.
pub struct Engines {
    settings: Arc<Settings>,
    engines: DashMap<String, Arc<SearchEngine>>,
}

impl Engines {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self {
            settings,
            engines: DashMap::new(),
        }
    }

    pub fn settings(&self) -> Arc<Settings> {
        self.settings.clone()
    }

    pub fn get_or_open(&self, workspace: &str) -> ToolResult<Arc<SearchEngine>> {
        let path = Path::new(workspace);
        let layout = WorkspaceLayout::resolve(&self.settings.index_root, path)?;
        if let Some(engine) = self.engines.get(&layout.hash) {
            return Ok(engine.clone());
        }
        let engine = Arc::new(SearchEngine::open(self.settings.clone(), path)?);
        self.engines.insert(layout.hash, engine.clone());
        Ok(engine)
    }

    /// Run one tool end to end. Cache consultation, error folding and
    /// response caching all happen here so handlers stay plain.
    pub fn dispatch(&self, tool: &str, params: Value, cancel: &CancellationToken) -> ToolResponse {
        let started = Instant::now();
        let limit_fallback = self.settings.search.default_max_tokens;

        let common: CommonParams = match serde_json::from_value(params.clone()) {
            Ok(c) => c,
            Err(e) => {
                let err = ToolError::InvalidQuery {
                    reason: format!("bad parameters: {e}"),
                };
                return ToolResponse::from_error(&err, limit_fallback, 0);
            }
        };

        let engine = match self.get_or_open(&common.workspace) {
            Ok(e) => e,
            Err(e) => return ToolResponse::from_error(&e, limit_fallback, 0),
        };

        // write-path tools are never served from or stored to the cache
        let cacheable = !matches!(
            tool,
            "index_workspace" | "search_and_replace" | "smart_refactor"
        );
        let cache_key = ResponseCache::key(tool, &params);
        if cacheable && !common.no_cache {
            if let Some(mut hit) = engine.cache.get(&cache_key) {
                debug!("cache hit for {tool}");
                hit.data
                    .extension_data
                    .insert("cacheHit".to_string(), json!(true));
                return hit;
            }
        }

        let result = self.run_tool(&engine, tool, &common, &params, cancel);
        match result {
            Ok(response) => {
                if cacheable && !common.no_cache {
                    engine
                        .cache
                        .put(cache_key, response.clone(), response.data.count);
                }
                response
            }
            Err(e) => {
                let elapsed = started.elapsed().as_millis() as u64;
                ToolResponse::from_error(&e, engine.budget(common.max_tokens), elapsed)
            }
        }
    }

    fn run_tool(
        &self,
        engine: &SearchEngine,
        tool: &str,
        common: &CommonParams,
        params: &Value,
        cancel: &CancellationToken,
    ) -> ToolResult<ToolResponse> {
        ensure_not_cancelled(cancel)?;
        match tool {
            "index_workspace" => {
                let force = params.get("force").and_then(Value::as_bool).unwrap_or(false);
                engine.index_workspace(common, force, cancel)
            }
            "text_search" => text_search::run(engine, common, params, cancel),
            "file_search" => file_search::run_file_search(engine, common, params, cancel),
            "directory_search" => file_search::run_directory_search(engine, common, params, cancel),
            "recent_files" => file_search::run_recent_files(engine, common, params, cancel),
            "symbol_search" => symbols::run_symbol_search(engine, common, params, cancel),
            "goto_definition" => symbols::run_goto_definition(engine, common, params, cancel),
            "find_references" => references::run_find_references(engine, common, params, cancel),
            "trace_call_path" => references::run_trace_call_path(engine, common, params, cancel),
            "similar_files" => similar::run(engine, common, params, cancel),
            "search_and_replace" => refactor::run_search_and_replace(engine, common, params, cancel),
            "smart_refactor" => refactor::run_smart_refactor(engine, common, params, cancel),
            other => Err(ToolError::InvalidQuery {
                reason: format!("unknown tool: {other}"),
            }),
        }
    }
}

/// Extract a typed parameter struct from the raw JSON object.
pub(crate) fn parse_params<T: serde::de::DeserializeOwned>(params: &Value) -> ToolResult<T> {
    serde_json::from_value(params.clone()).map_err(|e| ToolError::InvalidQuery {
        reason: format!("bad parameters: {e}"),
    })
}
