//! Similar-files tool: MoreLikeThis over the text index.

use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::ToolResult;
use crate::response::ToolResponse;
use crate::tools::{CommonParams, SearchEngine, ensure_not_cancelled, parse_params};

#[derive(Debug, Deserialize)]
struct SimilarFilesParams {
    file_path: String,
    #[serde(default = "default_max")]
    max_results: usize,
    #[serde(default = "default_min_score")]
    min_score: f32,
}

fn default_max() -> usize {
    20
}
fn default_min_score() -> f32 {
    0.1
}

/// Human-readable bucket for a normalized similarity score.
fn score_reason(normalized: f32) -> &'static str {
    match normalized {
        s if s > 0.8 => "very high similarity",
        s if s > 0.6 => "high similarity",
        s if s > 0.4 => "moderate similarity",
        s if s > 0.2 => "low similarity",
        _ => "minimal similarity",
    }
}

pub fn run(
    engine: &SearchEngine,
    common: &CommonParams,
    params: &Value,
    cancel: &CancellationToken,
) -> ToolResult<ToolResponse> {
    let started = Instant::now();
    let p: SimilarFilesParams = parse_params(params)?;
    engine.require_index()?;
    ensure_not_cancelled(cancel)?;

    // accept either a stored relative path or an absolute one
    let rel = engine
        .layout
        .relative_unix_path(std::path::Path::new(&p.file_path))
        .unwrap_or_else(|| p.file_path.clone());

    let Some(query) = engine.text.more_like_this(&rel)? else {
        let summary = format!("'{rel}' is not in the index; no similar files");
        let ctx = engine.build_context("similar_files", common, Some(rel), started);
        return Ok(engine.builder.build(summary, Vec::new(), BTreeMap::new(), &ctx));
    };

    // +1 so dropping the source document still leaves max_results
    let result = engine
        .text
        .search(&*query, p.max_results + 1, &[], false, 0)?;
    ensure_not_cancelled(cancel)?;

    let max_score = result
        .hits
        .iter()
        .filter(|h| h.path != rel)
        .map(|h| h.score)
        .fold(0.0f32, f32::max);

    let mut items = Vec::new();
    for hit in &result.hits {
        if hit.path == rel {
            continue;
        }
        let normalized = if max_score > 0.0 {
            hit.score / max_score
        } else {
            0.0
        };
        if normalized < p.min_score {
            continue;
        }
        let record = engine.store.get_file(&hit.path)?;
        items.push(json!({
            "filePath": hit.path,
            "score": normalized,
            "reason": score_reason(normalized),
            "language": record.as_ref().map(|r| r.language.clone()),
            "size": record.as_ref().map(|r| r.size),
            "lastModified": record.as_ref().map(|r| r.last_modified),
        }));
        if items.len() >= p.max_results {
            break;
        }
    }

    let summary = format!(
        "{} file{} similar to '{}'",
        items.len(),
        if items.len() == 1 { "" } else { "s" },
        rel
    );
    let ctx = engine.build_context("similar_files", common, Some(rel), started);
    Ok(engine.builder.build(summary, items, BTreeMap::new(), &ctx))
}
