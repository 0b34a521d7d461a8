//! Error types for the search engine.
//!
//! Every failure that can cross the tool boundary is a `ToolError` with a
//! stable machine-readable code and, where the failure is user-actionable,
//! a list of recovery steps. Internal subsystems define their own error
//! enums and convert into `ToolError` at the orchestrator.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error for tool operations.
///
/// The orchestrator never raises these across the protocol boundary;
/// they are folded into a `success=false` response envelope.
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Workspace directory does not exist: {path}")]
    WorkspaceMissing { path: PathBuf },

    #[error("No index found for workspace '{workspace}'. Run index_workspace first.")]
    IndexMissing { workspace: String },

    #[error("Invalid query: {reason}")]
    InvalidQuery { reason: String },

    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("File is not in the index: {path}")]
    FileNotIndexed { path: PathBuf },

    #[error("Symbol extractor failed for '{path}': {reason}")]
    ExtractorFailure { path: PathBuf, reason: String },

    #[error("Embedding service unavailable: {reason}")]
    EmbeddingFailure { reason: String },

    #[error("Vector search is not available: {reason}")]
    VectorUnavailable { reason: String },

    #[error("Index tiers are inconsistent for '{path}': {reason}")]
    IndexInconsistency { path: PathBuf, reason: String },

    #[error("Operation was cancelled")]
    Cancelled,

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Text index error: {0}")]
    TextIndex(#[from] TextIndexError),

    #[error("{0}")]
    Internal(String),
}

impl ToolError {
    /// Stable code string used in the response envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Self::WorkspaceMissing { .. } => "WORKSPACE_MISSING",
            Self::IndexMissing { .. } => "INDEX_MISSING",
            Self::InvalidQuery { .. } => "INVALID_QUERY",
            Self::InvalidPattern { .. } => "INVALID_PATTERN",
            Self::FileNotIndexed { .. } => "FILE_NOT_INDEXED",
            Self::ExtractorFailure { .. } => "EXTRACTOR_FAILURE",
            Self::EmbeddingFailure { .. } => "EMBEDDING_FAILURE",
            Self::VectorUnavailable { .. } => "VECTOR_UNAVAILABLE",
            Self::IndexInconsistency { .. } => "INDEX_INCONSISTENCY",
            Self::Cancelled => "CANCELLED",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::TextIndex(_) => "TEXT_INDEX_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Recovery steps for user-actionable failures.
    pub fn recovery_steps(&self) -> Vec<String> {
        match self {
            Self::WorkspaceMissing { path } => vec![
                format!("Verify the workspace path exists: {}", path.display()),
                "Pass an absolute path to the workspace root".to_string(),
            ],
            Self::IndexMissing { workspace } => vec![
                format!("Run index_workspace with workspace='{workspace}'"),
                "Wait for the initial crawl to finish, then retry".to_string(),
            ],
            Self::InvalidQuery { .. } => vec![
                "Remove leading wildcards or add anchoring text".to_string(),
                "Use mode='pattern' for queries containing punctuation".to_string(),
            ],
            Self::InvalidPattern { .. } => vec![
                "Check glob syntax: '*' matches any run, '?' a single character".to_string(),
            ],
            Self::FileNotIndexed { path } => vec![format!(
                "Re-index the workspace containing {}",
                path.display()
            )],
            Self::ExtractorFailure { .. } => vec![
                "Check that the 'extract' binary is on PATH and executable".to_string(),
                "The file was skipped; other files remain searchable".to_string(),
            ],
            Self::EmbeddingFailure { .. } | Self::VectorUnavailable { .. } => vec![
                "Semantic search is disabled; text search remains available".to_string(),
            ],
            Self::IndexInconsistency { path, .. } => vec![format!(
                "Re-index {} to repair the affected tiers",
                path.display()
            )],
            _ => vec![],
        }
    }

    /// True for errors that disable a capability without failing the request.
    pub fn is_degraded_capability(&self) -> bool {
        matches!(
            self,
            Self::EmbeddingFailure { .. } | Self::VectorUnavailable { .. }
        )
    }
}

/// Errors from the structured store.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to open database at '{path}': {reason}")]
    Open { path: PathBuf, reason: String },

    #[error("Schema migration failed: {0}")]
    Schema(String),

    #[error("Invalid glob pattern '{pattern}': {reason}")]
    Glob { pattern: String, reason: String },
}

/// Errors from the tantivy text index.
#[derive(Error, Debug)]
pub enum TextIndexError {
    #[error("Tantivy error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),

    #[error("Failed to open text index directory: {0}")]
    OpenDirectory(#[from] tantivy::directory::error::OpenDirectoryError),

    #[error("Query could not be parsed: {0}")]
    QueryParse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the indexer and watcher.
#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("Failed to read file '{path}': {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Extractor failed for '{path}': {reason}")]
    Extractor { path: PathBuf, reason: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Text index error: {0}")]
    TextIndex(#[from] TextIndexError),

    #[error("Watcher error: {0}")]
    Watch(#[from] notify::Error),
}

pub type ToolResult<T> = Result<T, ToolError>;
pub type StorageResult<T> = Result<T, StorageError>;
pub type TextIndexResult<T> = Result<T, TextIndexError>;
pub type IndexerResult<T> = Result<T, IndexerError>;

impl From<IndexerError> for ToolError {
    fn from(e: IndexerError) -> Self {
        match e {
            IndexerError::Storage(s) => Self::Storage(s),
            IndexerError::TextIndex(t) => Self::TextIndex(t),
            IndexerError::Extractor { path, reason } => Self::ExtractorFailure { path, reason },
            other => Self::Internal(other.to_string()),
        }
    }
}
