//! Vector tier: k-NN over per-symbol embeddings.
//!
//! Embedding rows live in the structured store (`symbol_embeddings`), so
//! they share the file-deletion cascade. Lookup is a brute-force cosine
//! scan, which is adequate at per-workspace symbol counts; the reported
//! score is `1 - cosine_distance / 2`, clamped to [0, 1].

use std::sync::Arc;

use crate::error::{ToolError, ToolResult};
use crate::storage::StructuredStore;
use crate::types::Symbol;

/// One semantic match.
#[derive(Debug, Clone)]
pub struct SemanticMatch {
    pub symbol: Symbol,
    /// `1 - cosine_distance/2` in [0, 1]; 1.0 means identical direction.
    pub similarity: f32,
}

/// k-NN over stored symbol embeddings.
pub struct VectorSearch {
    store: Arc<StructuredStore>,
}

impl VectorSearch {
    pub fn new(store: Arc<StructuredStore>) -> Self {
        Self { store }
    }

    /// Nearest `k` symbols to the query vector. Rows whose dimension does
    /// not match the query are skipped rather than failing the search.
    pub fn knn(&self, query: &[f32], k: usize) -> ToolResult<Vec<SemanticMatch>> {
        if query.is_empty() {
            return Err(ToolError::InvalidQuery {
                reason: "empty query vector".to_string(),
            });
        }
        let embeddings = self.store.all_embeddings()?;
        let mut scored: Vec<(String, f32)> = embeddings
            .iter()
            .filter(|e| e.vector.len() == query.len())
            .map(|e| (e.symbol_id.clone(), similarity(query, &e.vector)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        let mut matches = Vec::with_capacity(scored.len());
        for (symbol_id, sim) in scored {
            if let Some(symbol) = self.store.get_symbol_by_id(&symbol_id)? {
                matches.push(SemanticMatch {
                    symbol,
                    similarity: sim,
                });
            }
        }
        Ok(matches)
    }
}

/// `1 - cosine_distance/2`, clamped to [0, 1]. Zero vectors score 0.
pub fn similarity(a: &[f32], b: &[f32]) -> f32 {
    let cos = cosine(a, b);
    let distance = 1.0 - cos;
    (1.0 - distance / 2.0).clamp(0.0, 1.0)
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return -1.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FileRecord, SymbolEmbedding};

    fn file(path: &str) -> FileRecord {
        FileRecord {
            path: path.to_string(),
            language: "rust".to_string(),
            hash: "h".to_string(),
            size: 0,
            last_modified: 0,
            last_indexed: 0,
            content: None,
            symbol_count: 0,
        }
    }

    fn symbol(id: &str, name: &str, path: &str) -> Symbol {
        Symbol {
            id: id.to_string(),
            name: name.to_string(),
            kind: "function".to_string(),
            language: "rust".to_string(),
            file_path: path.to_string(),
            signature: None,
            start_line: 1,
            start_col: 0,
            end_line: 1,
            end_col: 0,
            start_byte: 0,
            end_byte: 0,
            doc_comment: None,
            visibility: None,
            parent_id: None,
            confidence: 1.0,
            file_hash: "h".to_string(),
        }
    }

    #[test]
    fn similarity_is_rescaled_cosine() {
        let same = similarity(&[1.0, 0.0], &[2.0, 0.0]);
        assert!((same - 1.0).abs() < 1e-6);

        let orthogonal = similarity(&[1.0, 0.0], &[0.0, 1.0]);
        assert!((orthogonal - 0.5).abs() < 1e-6);

        let opposite = similarity(&[1.0, 0.0], &[-1.0, 0.0]);
        assert!(opposite.abs() < 1e-6);
    }

    #[test]
    fn knn_returns_nearest_first() {
        let store = Arc::new(StructuredStore::open_in_memory().unwrap());
        store
            .upsert_file(
                &file("a.rs"),
                &[symbol("s1", "near", "a.rs"), symbol("s2", "far", "a.rs")],
                &[],
                Some(&[
                    SymbolEmbedding {
                        symbol_id: "s1".to_string(),
                        vector: vec![1.0, 0.0, 0.0],
                    },
                    SymbolEmbedding {
                        symbol_id: "s2".to_string(),
                        vector: vec![-1.0, 0.0, 0.0],
                    },
                ]),
            )
            .unwrap();

        let search = VectorSearch::new(store);
        let matches = search.knn(&[0.9, 0.1, 0.0], 2).unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].symbol.name, "near");
        assert!(matches[0].similarity > matches[1].similarity);
    }

    #[test]
    fn dimension_mismatch_is_skipped() {
        let store = Arc::new(StructuredStore::open_in_memory().unwrap());
        store
            .upsert_file(
                &file("b.rs"),
                &[symbol("s3", "odd", "b.rs")],
                &[],
                Some(&[SymbolEmbedding {
                    symbol_id: "s3".to_string(),
                    vector: vec![1.0, 2.0],
                }]),
            )
            .unwrap();
        let search = VectorSearch::new(store);
        assert!(search.knn(&[1.0, 0.0, 0.0], 5).unwrap().is_empty());
    }
}
