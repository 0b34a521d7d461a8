//! Full-text search tool.
//!
//! Pipeline: preprocess the query (mode detection, wildcard sanitizing),
//! run it against the routed text-index field with a token-aware hit cap,
//! re-rank with the multi-factor scorer, and hand the hits to the
//! response builder.

use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::ToolResult;
use crate::query::preprocess::TargetField;
use crate::query::{QueryMode, ScoreContext, preprocess};
use crate::response::ToolResponse;
use crate::storage::TextHit;
use crate::tools::{CommonParams, SearchEngine, ensure_not_cancelled, parse_params};
use crate::types::{HitField, SearchHit};

#[derive(Debug, Deserialize)]
struct TextSearchParams {
    query: String,
    #[serde(default)]
    mode: QueryMode,
    #[serde(default)]
    case_sensitive: bool,
}

/// Rough per-hit token cost used to derive `max_hits` from the budget.
const EST_TOKENS_PER_HIT: usize = 40;

pub fn run(
    engine: &SearchEngine,
    common: &CommonParams,
    params: &Value,
    cancel: &CancellationToken,
) -> ToolResult<ToolResponse> {
    let started = Instant::now();
    let p: TextSearchParams = parse_params(params)?;
    engine.require_index()?;

    let processed = preprocess(&p.query, p.mode)?;
    ensure_not_cancelled(cancel)?;

    // token-aware fetch depth: when the caller keeps full results for the
    // resource store we fetch up to the hard cap so the spill is complete;
    // otherwise only as many hits as the budget could ever show
    let budget = engine.budget(common.max_tokens);
    let token_aware = (budget / EST_TOKENS_PER_HIT).clamp(10, engine.settings.search.max_hits);
    let max_hits = if common.store_full_results {
        engine.settings.search.max_hits
    } else {
        token_aware
    };

    let field = match processed.target {
        TargetField::Content => engine.text.schema().content,
        TargetField::ContentSymbols => engine.text.schema().content_symbols,
        TargetField::ContentPatterns => engine.text.schema().content_patterns,
    };

    let result = if processed.processed.is_empty() {
        crate::storage::TextSearchResult {
            total_hits: 0,
            hits: Vec::new(),
            elapsed_ms: 0,
        }
    } else {
        let query = engine.text.parse_query(&processed.processed, field)?;
        let terms: Vec<String> = processed
            .processed
            .split_whitespace()
            .map(str::to_string)
            .collect();
        engine.text.search(
            &*query,
            max_hits,
            &terms,
            true,
            engine.settings.search.context_lines,
        )?
    };
    ensure_not_cancelled(cancel)?;

    let mut hits = result.hits;
    let scorer = ScoreContext::new(&processed.processed, p.case_sensitive);
    scorer.rerank(&mut hits);

    let items: Vec<Value> = hits.iter().map(hit_to_item).collect();
    let total = result.total_hits.max(items.len());

    let summary = if items.is_empty() {
        format!("No matches for '{}'", p.query)
    } else {
        format!(
            "{} match{} for '{}' ({:?} mode)",
            total,
            if total == 1 { "" } else { "es" },
            p.query,
            processed.detected
        )
    };

    let mut extension_data = BTreeMap::new();
    extension_data.insert("detectedMode".to_string(), json!(format!("{:?}", processed.detected)));
    extension_data.insert("modeReason".to_string(), json!(processed.reason));
    extension_data.insert("totalHits".to_string(), json!(total));

    let ctx = engine.build_context("text_search", common, Some(p.query.clone()), started);
    Ok(engine.builder.build(summary, items, extension_data, &ctx))
}

fn hit_to_item(hit: &TextHit) -> Value {
    let mut search_hit = SearchHit::new(&hit.path, hit.score);
    search_hit.line = hit.line;
    search_hit.context_lines = hit.context_lines.clone();
    search_hit.snippet = hit.snippet.clone();
    search_hit.last_modified = Some(hit.last_modified as i64);
    if !hit.type_names.is_empty() {
        search_hit.set_field(HitField::TypeInfo, hit.type_names.join(","));
    }
    serde_json::to_value(&search_hit).unwrap_or_else(|_| json!({"filePath": hit.path}))
}
