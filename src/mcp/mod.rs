//! MCP (Model Context Protocol) server exposing the search tools.
//!
//! Two modes:
//!
//! 1. **Standalone**: `codesearch serve` speaks MCP over stdio.
//! 2. **Embedded**: the CLI dispatches a single tool call in-process.
//!
//! Tool handlers are thin: deserialize parameters, hand them to the
//! orchestrator on a blocking thread, return the response envelope as
//! JSON text.

use rmcp::{
    ServerHandler,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{
        CallToolResult, Content, CustomRequest, CustomResult, ErrorCode, ErrorData as McpError,
        Implementation, InitializeRequestParam, InitializeResult, ProtocolVersion,
        ServerCapabilities, ServerInfo,
    },
    schemars,
    service::{RequestContext, RoleServer},
    tool, tool_handler, tool_router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::tools::Engines;

/// Fields accepted by every tool.
macro_rules! common_fields {
    ($name:ident { $($(#[$meta:meta])* $field:ident : $ty:ty),* $(,)? }) => {
        #[derive(Debug, Deserialize, Serialize, schemars::JsonSchema)]
        pub struct $name {
            /// Absolute path of the workspace root
            pub workspace: String,
            /// Token budget for the response (default 8000)
            #[serde(skip_serializing_if = "Option::is_none")]
            pub max_tokens: Option<usize>,
            /// Response detail: "summary", "full" or "adaptive"
            #[serde(skip_serializing_if = "Option::is_none")]
            pub response_mode: Option<String>,
            /// Bypass the response cache
            #[serde(skip_serializing_if = "Option::is_none")]
            pub no_cache: Option<bool>,
            $($(#[$meta])* pub $field: $ty,)*
        }
    };
}

common_fields!(IndexWorkspaceRequest {
    /// Re-index files even when their content hash is unchanged
    #[serde(skip_serializing_if = "Option::is_none")]
    force: Option<bool>,
});

common_fields!(TextSearchRequest {
    /// Search query text
    query: String,
    /// Query mode: "auto", "standard", "symbol", "pattern" or "fuzzy"
    #[serde(skip_serializing_if = "Option::is_none")]
    mode: Option<String>,
    /// Match case exactly
    #[serde(skip_serializing_if = "Option::is_none")]
    case_sensitive: Option<bool>,
});

common_fields!(FileSearchRequest {
    /// Glob (or regex, with use_regex) matched against file names
    pattern: String,
    /// Match against the full relative path instead of the basename
    #[serde(skip_serializing_if = "Option::is_none")]
    search_full_path: Option<bool>,
    /// Restrict to these extensions, e.g. ["rs", "py"]
    #[serde(skip_serializing_if = "Option::is_none")]
    extensions: Option<Vec<String>>,
    /// Treat the pattern as a regular expression
    #[serde(skip_serializing_if = "Option::is_none")]
    use_regex: Option<bool>,
    /// Also return the unique parent directories of matches
    #[serde(skip_serializing_if = "Option::is_none")]
    include_directories: Option<bool>,
    /// Maximum files returned (default 100)
    #[serde(skip_serializing_if = "Option::is_none")]
    max_results: Option<usize>,
});

common_fields!(DirectorySearchRequest {
    /// Glob matched against directory names
    pattern: String,
    /// Include directories whose path contains a dot-prefixed segment
    #[serde(skip_serializing_if = "Option::is_none")]
    include_hidden: Option<bool>,
    /// Maximum directories returned (default 50)
    #[serde(skip_serializing_if = "Option::is_none")]
    max_results: Option<usize>,
});

common_fields!(RecentFilesRequest {
    /// Relative window, e.g. "30min", "2h", "1d", "1w" (default "7d")
    #[serde(skip_serializing_if = "Option::is_none")]
    time_frame: Option<String>,
    /// Restrict to these extensions
    #[serde(skip_serializing_if = "Option::is_none")]
    extensions: Option<Vec<String>>,
    /// Maximum files returned (default 50)
    #[serde(skip_serializing_if = "Option::is_none")]
    max_results: Option<usize>,
});

common_fields!(SymbolSearchRequest {
    /// Symbol name; '*' and '?' wildcards are supported
    query: String,
    /// Match case exactly
    #[serde(skip_serializing_if = "Option::is_none")]
    case_sensitive: Option<bool>,
    /// Maximum symbols returned (default 50)
    #[serde(skip_serializing_if = "Option::is_none")]
    max_results: Option<usize>,
});

common_fields!(GotoDefinitionRequest {
    /// Symbol name to resolve
    symbol: String,
    /// Match case exactly
    #[serde(skip_serializing_if = "Option::is_none")]
    case_sensitive: Option<bool>,
});

common_fields!(FindReferencesRequest {
    /// Symbol name to find references to
    symbol: String,
    /// Match case exactly
    #[serde(skip_serializing_if = "Option::is_none")]
    case_sensitive: Option<bool>,
    /// Sort results by file instead of score
    #[serde(skip_serializing_if = "Option::is_none")]
    group_by_file: Option<bool>,
    /// Maximum references returned (default 200)
    #[serde(skip_serializing_if = "Option::is_none")]
    max_results: Option<usize>,
});

common_fields!(TraceCallPathRequest {
    /// Symbol to trace from
    symbol: String,
    /// "up" (callers), "down" (callees) or "both"
    #[serde(skip_serializing_if = "Option::is_none")]
    direction: Option<String>,
    /// Hop limit, capped at 5 (default 3)
    #[serde(skip_serializing_if = "Option::is_none")]
    max_depth: Option<u32>,
    /// Maximum nodes returned (default 200)
    #[serde(skip_serializing_if = "Option::is_none")]
    max_results: Option<usize>,
});

common_fields!(SimilarFilesRequest {
    /// Source file, workspace-relative or absolute
    file_path: String,
    /// Maximum similar files returned (default 20)
    #[serde(skip_serializing_if = "Option::is_none")]
    max_results: Option<usize>,
    /// Minimum normalized similarity in [0, 1] (default 0.1)
    #[serde(skip_serializing_if = "Option::is_none")]
    min_score: Option<f32>,
});

common_fields!(SearchAndReplaceRequest {
    /// Text or regex to find
    pattern: String,
    /// Replacement text; regex mode supports $1 capture references
    replacement: String,
    /// Treat the pattern as a regular expression
    #[serde(skip_serializing_if = "Option::is_none")]
    use_regex: Option<bool>,
    /// Match case exactly (default true)
    #[serde(skip_serializing_if = "Option::is_none")]
    case_sensitive: Option<bool>,
    /// Restrict to files matching this glob
    #[serde(skip_serializing_if = "Option::is_none")]
    file_glob: Option<String>,
    /// Collect changes without writing (default true)
    #[serde(skip_serializing_if = "Option::is_none")]
    preview: Option<bool>,
    /// Maximum files changed (default 100)
    #[serde(skip_serializing_if = "Option::is_none")]
    max_files: Option<usize>,
});

common_fields!(SmartRefactorRequest {
    /// File to edit, workspace-relative or absolute
    file_path: String,
    /// Literal text to find
    find: String,
    /// Replacement text
    replace: String,
    /// First line of the edit window (1-based)
    #[serde(skip_serializing_if = "Option::is_none")]
    start_line: Option<u32>,
    /// Last line of the edit window
    #[serde(skip_serializing_if = "Option::is_none")]
    end_line: Option<u32>,
    /// Collect changes without writing (default true)
    #[serde(skip_serializing_if = "Option::is_none")]
    preview: Option<bool>,
});

#[derive(Clone)]
pub struct CodeSearchServer {
    engines: Arc<Engines>,
    tool_router: ToolRouter<Self>,
}

impl CodeSearchServer {
    pub fn new(engines: Arc<Engines>) -> Self {
        Self {
            engines,
            tool_router: Self::tool_router(),
        }
    }

    /// Run a tool on a blocking thread and wrap the envelope as JSON text.
    async fn call(&self, tool: &'static str, params: Value) -> Result<CallToolResult, McpError> {
        let engines = self.engines.clone();
        let cancel = CancellationToken::new();
        let response = tokio::task::spawn_blocking(move || {
            engines.dispatch(tool, params, &cancel)
        })
        .await
        .map_err(|e| McpError::new(ErrorCode::INTERNAL_ERROR, e.to_string(), None))?;

        let text = serde_json::to_string_pretty(&response)
            .map_err(|e| McpError::new(ErrorCode::INTERNAL_ERROR, e.to_string(), None))?;
        if response.success {
            Ok(CallToolResult::success(vec![Content::text(text)]))
        } else {
            Ok(CallToolResult::error(vec![Content::text(text)]))
        }
    }

    fn to_value<T: Serialize>(request: &T) -> Result<Value, McpError> {
        serde_json::to_value(request)
            .map_err(|e| McpError::new(ErrorCode::INVALID_PARAMS, e.to_string(), None))
    }
}

#[tool_router]
impl CodeSearchServer {
    #[tool(description = "Build or refresh the index for a workspace directory")]
    pub async fn index_workspace(
        &self,
        Parameters(request): Parameters<IndexWorkspaceRequest>,
    ) -> Result<CallToolResult, McpError> {
        self.call("index_workspace", Self::to_value(&request)?).await
    }

    #[tool(description = "Full-text search across indexed file contents")]
    pub async fn text_search(
        &self,
        Parameters(request): Parameters<TextSearchRequest>,
    ) -> Result<CallToolResult, McpError> {
        self.call("text_search", Self::to_value(&request)?).await
    }

    #[tool(description = "Find files by glob or regex over their names or paths")]
    pub async fn file_search(
        &self,
        Parameters(request): Parameters<FileSearchRequest>,
    ) -> Result<CallToolResult, McpError> {
        self.call("file_search", Self::to_value(&request)?).await
    }

    #[tool(description = "Find directories by glob over directory names")]
    pub async fn directory_search(
        &self,
        Parameters(request): Parameters<DirectorySearchRequest>,
    ) -> Result<CallToolResult, McpError> {
        self.call("directory_search", Self::to_value(&request)?).await
    }

    #[tool(description = "List recently modified files within a time window")]
    pub async fn recent_files(
        &self,
        Parameters(request): Parameters<RecentFilesRequest>,
    ) -> Result<CallToolResult, McpError> {
        self.call("recent_files", Self::to_value(&request)?).await
    }

    #[tool(description = "Search symbols by exact name or wildcard pattern")]
    pub async fn symbol_search(
        &self,
        Parameters(request): Parameters<SymbolSearchRequest>,
    ) -> Result<CallToolResult, McpError> {
        self.call("symbol_search", Self::to_value(&request)?).await
    }

    #[tool(description = "Resolve a symbol to its best definition site")]
    pub async fn goto_definition(
        &self,
        Parameters(request): Parameters<GotoDefinitionRequest>,
    ) -> Result<CallToolResult, McpError> {
        self.call("goto_definition", Self::to_value(&request)?).await
    }

    #[tool(
        description = "Find references to a symbol, with reference-kind classification. Definitions are excluded."
    )]
    pub async fn find_references(
        &self,
        Parameters(request): Parameters<FindReferencesRequest>,
    ) -> Result<CallToolResult, McpError> {
        self.call("find_references", Self::to_value(&request)?).await
    }

    #[tool(description = "Trace callers and/or callees of a symbol, depth-limited")]
    pub async fn trace_call_path(
        &self,
        Parameters(request): Parameters<TraceCallPathRequest>,
    ) -> Result<CallToolResult, McpError> {
        self.call("trace_call_path", Self::to_value(&request)?).await
    }

    #[tool(description = "Find files similar to a given file by shared vocabulary")]
    pub async fn similar_files(
        &self,
        Parameters(request): Parameters<SimilarFilesRequest>,
    ) -> Result<CallToolResult, McpError> {
        self.call("similar_files", Self::to_value(&request)?).await
    }

    #[tool(description = "Search and replace across the workspace, with preview mode")]
    pub async fn search_and_replace(
        &self,
        Parameters(request): Parameters<SearchAndReplaceRequest>,
    ) -> Result<CallToolResult, McpError> {
        self.call("search_and_replace", Self::to_value(&request)?).await
    }

    #[tool(description = "Line-targeted find/replace within a single file")]
    pub async fn smart_refactor(
        &self,
        Parameters(request): Parameters<SmartRefactorRequest>,
    ) -> Result<CallToolResult, McpError> {
        self.call("smart_refactor", Self::to_value(&request)?).await
    }
}

#[tool_handler]
impl ServerHandler for CodeSearchServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo::new(ServerCapabilities::builder().enable_tools().build())
            .with_protocol_version(ProtocolVersion::V_2024_11_05)
            .with_server_info(
                Implementation::new("codesearch", env!("CARGO_PKG_VERSION")).with_title("CodeSearch"),
            )
            .with_instructions(
                "Workspace-scoped code search and navigation. \
                Run 'index_workspace' once per workspace before querying. \
                Use 'text_search' for content, 'symbol_search' and 'goto_definition' \
                for symbols, 'find_references' and 'trace_call_path' for navigation, \
                and 'search_and_replace' (preview first) for edits. \
                Every response is bounded by max_tokens; truncated responses carry a \
                resourceUri with the full result set.",
            )
    }

    async fn initialize(
        &self,
        request: InitializeRequestParam,
        context: RequestContext<RoleServer>,
    ) -> Result<InitializeResult, McpError> {
        if context.peer.peer_info().is_none() {
            context.peer.set_peer_info(request);
        }
        Ok(self.get_info())
    }

    async fn on_custom_request(
        &self,
        request: CustomRequest,
        _context: RequestContext<RoleServer>,
    ) -> Result<CustomResult, McpError> {
        match request.method.as_str() {
            "requests/codesearch/fetch-resource" => self.handle_fetch_resource(request).await,
            _ => Err(McpError::new(
                ErrorCode::METHOD_NOT_FOUND,
                format!("Unknown method: {}", request.method),
                None,
            )),
        }
    }
}

impl CodeSearchServer {
    /// Fetch a full result set previously spilled to the resource store.
    async fn handle_fetch_resource(
        &self,
        request: CustomRequest,
    ) -> Result<CustomResult, McpError> {
        let params = request.params.as_ref();
        let workspace = params
            .and_then(|p| p.get("workspace"))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                McpError::new(ErrorCode::INVALID_PARAMS, "missing 'workspace'", None)
            })?;
        let uri = params
            .and_then(|p| p.get("uri"))
            .and_then(Value::as_str)
            .ok_or_else(|| McpError::new(ErrorCode::INVALID_PARAMS, "missing 'uri'", None))?;

        let engine = self
            .engines
            .get_or_open(workspace)
            .map_err(|e| McpError::new(ErrorCode::INVALID_PARAMS, e.to_string(), None))?;

        match engine.resources().fetch(uri) {
            Some(bytes) => {
                let value: Value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
                Ok(CustomResult(serde_json::json!({ "results": value })))
            }
            None => Err(McpError::new(
                ErrorCode::INVALID_PARAMS,
                format!("resource not found or expired: {uri}"),
                None,
            )),
        }
    }
}
