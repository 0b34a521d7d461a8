//! Query preprocessing and re-ranking.

pub mod preprocess;
pub mod scoring;

pub use preprocess::{ProcessedQuery, QueryMode, TargetField, preprocess};
pub use scoring::ScoreContext;
