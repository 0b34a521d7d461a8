//! Indexing: crawl, extraction, incremental updates.

pub mod extractor;
pub mod indexer;
pub mod walker;
pub mod watcher;

pub use extractor::{CliExtractor, Extraction, NullExtractor, SymbolExtractor};
pub use indexer::{IndexOutcome, IndexStats, Indexer};
pub use walker::WorkspaceWalker;
pub use watcher::WatchService;
