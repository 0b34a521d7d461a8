//! Symbol search and go-to-definition tools, served from the structured
//! store's symbol table.

use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::ToolResult;
use crate::response::ToolResponse;
use crate::tools::{CommonParams, SearchEngine, ensure_not_cancelled, parse_params};
use crate::types::Symbol;

#[derive(Debug, Deserialize)]
struct SymbolSearchParams {
    query: String,
    #[serde(default)]
    case_sensitive: bool,
    #[serde(default = "default_max")]
    max_results: usize,
}

#[derive(Debug, Deserialize)]
struct GotoDefinitionParams {
    symbol: String,
    #[serde(default)]
    case_sensitive: bool,
}

fn default_max() -> usize {
    50
}

pub fn run_symbol_search(
    engine: &SearchEngine,
    common: &CommonParams,
    params: &Value,
    cancel: &CancellationToken,
) -> ToolResult<ToolResponse> {
    let started = Instant::now();
    let p: SymbolSearchParams = parse_params(params)?;
    engine.require_index()?;
    ensure_not_cancelled(cancel)?;

    let mut symbols = if p.query.contains('*') || p.query.contains('?') {
        engine.store.get_symbols_like(&p.query, p.max_results)?
    } else {
        engine.store.get_symbols_by_name(&p.query, p.case_sensitive)?
    };

    // score descending, then shorter names first
    symbols.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.name.len().cmp(&b.name.len()))
            .then_with(|| a.name.cmp(&b.name))
    });
    symbols.truncate(p.max_results);

    let items: Vec<Value> = symbols.iter().map(|s| symbol_item(s, None)).collect();
    let summary = format!(
        "{} symbol{} matching '{}'",
        symbols.len(),
        if symbols.len() == 1 { "" } else { "s" },
        p.query
    );
    let mut extension_data = BTreeMap::new();
    let kinds: BTreeMap<&str, usize> =
        symbols.iter().fold(BTreeMap::new(), |mut acc, s| {
            *acc.entry(s.kind.as_str()).or_default() += 1;
            acc
        });
    if !kinds.is_empty() {
        extension_data.insert("kindCounts".to_string(), json!(kinds));
    }
    let ctx = engine.build_context("symbol_search", common, Some(p.query.clone()), started);
    Ok(engine.builder.build(summary, items, extension_data, &ctx))
}

pub fn run_goto_definition(
    engine: &SearchEngine,
    common: &CommonParams,
    params: &Value,
    cancel: &CancellationToken,
) -> ToolResult<ToolResponse> {
    let started = Instant::now();
    let p: GotoDefinitionParams = parse_params(params)?;
    engine.require_index()?;
    ensure_not_cancelled(cancel)?;

    // prefer an exact-case match before falling back to case-insensitive
    let mut candidates = engine.store.get_symbols_by_name(&p.symbol, true)?;
    if candidates.is_empty() && !p.case_sensitive {
        candidates = engine.store.get_symbols_by_name(&p.symbol, false)?;
    }

    // highest confidence wins; definition kinds outrank references to the
    // same name when confidence ties
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.file_path.cmp(&b.file_path))
    });

    let summary_mode = common.response_mode == Some(crate::response::ResponseMode::Summary);
    let items: Vec<Value> = match candidates.first() {
        Some(best) => {
            let snippet = if summary_mode {
                None
            } else {
                definition_snippet(engine, best)?
            };
            vec![symbol_item(best, snippet.as_deref())]
        }
        None => Vec::new(),
    };

    let summary = match candidates.first() {
        Some(best) => format!(
            "{} '{}' defined at {}:{}",
            best.kind, best.name, best.file_path, best.start_line
        ),
        None => format!("No definition found for '{}'", p.symbol),
    };

    let mut extension_data = BTreeMap::new();
    if candidates.len() > 1 {
        extension_data.insert("alternativeCount".to_string(), json!(candidates.len() - 1));
    }
    let ctx = engine.build_context("goto_definition", common, Some(p.symbol.clone()), started);
    Ok(engine.builder.build(summary, items, extension_data, &ctx))
}

/// Lines spanning the definition, capped to keep single results bounded.
fn definition_snippet(engine: &SearchEngine, symbol: &Symbol) -> ToolResult<Option<String>> {
    const MAX_SNIPPET_LINES: usize = 12;
    let Some(record) = engine.store.get_file(&symbol.file_path)? else {
        return Ok(None);
    };
    let Some(content) = record.content else {
        return Ok(None);
    };
    let start = symbol.start_line.saturating_sub(1) as usize;
    let lines: Vec<&str> = content.lines().collect();
    if start >= lines.len() {
        return Ok(None);
    }
    let end = (symbol.end_line as usize)
        .min(start + MAX_SNIPPET_LINES)
        .clamp(start + 1, lines.len());
    Ok(Some(lines[start..end].join("\n")))
}

fn symbol_item(s: &Symbol, snippet: Option<&str>) -> Value {
    let mut item = json!({
        "filePath": s.file_path,
        "name": s.name,
        "kind": s.kind,
        "language": s.language,
        "line": s.start_line,
        "column": s.start_col,
        "startLine": s.start_line,
        "endLine": s.end_line,
        "score": s.confidence,
    });
    let obj = item.as_object_mut().expect("object");
    if let Some(sig) = &s.signature {
        obj.insert("signature".to_string(), json!(sig));
    }
    if let Some(vis) = &s.visibility {
        obj.insert("visibility".to_string(), json!(vis));
    }
    if let Some(parent) = &s.parent_id {
        obj.insert("parentSymbolId".to_string(), json!(parent));
    }
    if let Some(doc) = &s.doc_comment {
        obj.insert("docComment".to_string(), json!(doc));
    }
    if let Some(snippet) = snippet {
        obj.insert("snippet".to_string(), json!(snippet));
    }
    item
}
