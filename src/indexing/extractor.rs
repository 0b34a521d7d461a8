//! External symbol extractor interface.
//!
//! Symbol and identifier extraction is delegated to a separate CLI:
//! `extract <file>` prints one JSON object on stdout. The indexer consumes
//! `symbols` and `identifiers`; extraction failure degrades a file to
//! text-only indexing, it never aborts the crawl.

use serde::Deserialize;
use std::path::Path;
use std::process::Command;
use tracing::{debug, warn};

use crate::error::{IndexerError, IndexerResult};
use crate::types::{Identifier, Symbol};

/// Parsed extractor output for one file.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub symbols: Vec<Symbol>,
    pub identifiers: Vec<Identifier>,
}

/// Extraction backend. The CLI implementation is the production path;
/// tests inject a static one.
pub trait SymbolExtractor: Send + Sync {
    /// Extract symbols and identifiers from a source file.
    fn extract(&self, path: &Path) -> IndexerResult<Extraction>;
}

#[derive(Debug, Deserialize)]
struct ExtractorPayload {
    success: bool,
    #[serde(default)]
    symbols: Vec<Symbol>,
    #[serde(default)]
    identifiers: Vec<Identifier>,
    #[serde(default)]
    error: Option<ExtractorErrorPayload>,
}

#[derive(Debug, Deserialize)]
struct ExtractorErrorPayload {
    message: String,
}

/// Runs the external `extract` binary.
pub struct CliExtractor {
    binary: std::path::PathBuf,
}

impl CliExtractor {
    pub fn new(binary: impl Into<std::path::PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl SymbolExtractor for CliExtractor {
    fn extract(&self, path: &Path) -> IndexerResult<Extraction> {
        let output = Command::new(&self.binary)
            .arg(path)
            .output()
            .map_err(|e| IndexerError::Extractor {
                path: path.to_path_buf(),
                reason: format!("failed to spawn {}: {e}", self.binary.display()),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let payload: ExtractorPayload =
            serde_json::from_str(stdout.trim()).map_err(|e| IndexerError::Extractor {
                path: path.to_path_buf(),
                reason: format!("unparseable extractor output: {e}"),
            })?;

        if !output.status.success() || !payload.success {
            let reason = payload
                .error
                .map(|e| e.message)
                .unwrap_or_else(|| format!("exit status {}", output.status));
            warn!("extractor failed for {}: {reason}", path.display());
            return Err(IndexerError::Extractor {
                path: path.to_path_buf(),
                reason,
            });
        }

        debug!(
            "extracted {} symbols, {} identifiers from {}",
            payload.symbols.len(),
            payload.identifiers.len(),
            path.display()
        );
        Ok(Extraction {
            symbols: payload.symbols,
            identifiers: payload.identifiers,
        })
    }
}

/// No-op extractor used when no `extract` binary is configured. Files are
/// still indexed for full-text search.
pub struct NullExtractor;

impl SymbolExtractor for NullExtractor {
    fn extract(&self, _path: &Path) -> IndexerResult<Extraction> {
        Ok(Extraction::default())
    }
}

pub mod testing {
    //! Fixed-output extractor for tests.

    use super::*;
    use std::collections::HashMap;

    /// Returns pre-registered records keyed by file name.
    #[derive(Default)]
    pub struct StaticExtractor {
        by_file_name: HashMap<String, Extraction>,
    }

    impl StaticExtractor {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with(mut self, file_name: &str, extraction: Extraction) -> Self {
            self.by_file_name.insert(file_name.to_string(), extraction);
            self
        }
    }

    impl SymbolExtractor for StaticExtractor {
        fn extract(&self, path: &Path) -> IndexerResult<Extraction> {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            Ok(self.by_file_name.get(&name).cloned().unwrap_or_default())
        }
    }
}
