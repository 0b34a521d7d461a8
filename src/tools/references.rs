//! Find-references and call-path tracing.
//!
//! References resolve through two routes. The fast path reads the
//! identifier table and yields resolved, kind-tagged hits directly. When
//! it comes up empty (identifier extraction unavailable or the name was
//! never recorded), the fallback runs a strict text query that requires
//! the symbol in `content_symbols` and excludes files listing it in
//! `type_names`, then classifies each occurrence from its source line.

use regex::Regex;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::ToolResult;
use crate::response::ToolResponse;
use crate::tools::{CommonParams, SearchEngine, ensure_not_cancelled, parse_params};
use crate::types::{HitField, Identifier, SearchHit};

#[derive(Debug, Deserialize)]
struct FindReferencesParams {
    symbol: String,
    #[serde(default)]
    case_sensitive: bool,
    #[serde(default)]
    group_by_file: bool,
    #[serde(default = "default_max")]
    max_results: usize,
}

#[derive(Debug, Deserialize)]
struct TraceCallPathParams {
    symbol: String,
    #[serde(default = "default_direction")]
    direction: TraceDirection,
    #[serde(default = "default_depth")]
    max_depth: u32,
    #[serde(default = "default_max")]
    max_results: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum TraceDirection {
    Up,
    Down,
    Both,
}

fn default_max() -> usize {
    200
}
fn default_direction() -> TraceDirection {
    TraceDirection::Up
}
fn default_depth() -> u32 {
    3
}

/// Hard cap on trace depth regardless of the request.
const MAX_TRACE_DEPTH: u32 = 5;
/// Per-hop expansion cap to keep pathological graphs bounded.
const MAX_PER_HOP: usize = 50;

/// Markers wrapped around the symbol inside highlighted context lines.
const MARK_START: &str = ">>";
const MARK_END: &str = "<<";

static ENTRY_POINT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(^main$|handler|controller|endpoint|route|_main$)").expect("entry regex")
});

pub fn run_find_references(
    engine: &SearchEngine,
    common: &CommonParams,
    params: &Value,
    cancel: &CancellationToken,
) -> ToolResult<ToolResponse> {
    let started = Instant::now();
    let p: FindReferencesParams = parse_params(params)?;
    engine.require_index()?;
    ensure_not_cancelled(cancel)?;

    let identifiers = engine
        .store
        .get_identifiers_by_name(&p.symbol, p.case_sensitive)?;

    let (mut hits, route) = if identifiers.is_empty() {
        (
            fallback_hits(engine, &p.symbol, p.case_sensitive, p.max_results, cancel)?,
            "text_fallback",
        )
    } else {
        (
            identifiers
                .iter()
                .take(p.max_results)
                .map(|i| fast_path_hit(engine, i))
                .collect::<ToolResult<Vec<_>>>()?,
            "identifier_fast_path",
        )
    };
    ensure_not_cancelled(cancel)?;

    if p.group_by_file {
        hits.sort_by(|a, b| {
            a.file_path
                .cmp(&b.file_path)
                .then_with(|| a.line.cmp(&b.line))
        });
    } else {
        // score descending, then path, then line
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.file_path.cmp(&b.file_path))
                .then_with(|| a.line.cmp(&b.line))
        });
    }

    let items: Vec<Value> = hits
        .iter()
        .map(|h| serde_json::to_value(h).unwrap_or_default())
        .collect();
    let summary = format!(
        "{} reference{} to '{}'",
        hits.len(),
        if hits.len() == 1 { "" } else { "s" },
        p.symbol
    );
    let mut extension_data = BTreeMap::new();
    extension_data.insert("route".to_string(), json!(route));
    let ctx = engine.build_context("find_references", common, Some(p.symbol.clone()), started);
    Ok(engine.builder.build(summary, items, extension_data, &ctx))
}

/// Fast path: identifier rows become hits directly; kind and resolution
/// state come straight from extraction.
fn fast_path_hit(engine: &SearchEngine, identifier: &Identifier) -> ToolResult<SearchHit> {
    let mut hit = SearchHit::new(&identifier.file_path, identifier.confidence);
    hit.line = Some(identifier.start_line);
    hit.column = Some(identifier.start_col);
    hit.snippet = identifier.code_context.clone();
    hit.context_lines = context_from_store(engine, &identifier.file_path, identifier.start_line)?;
    hit.set_field(HitField::ReferenceType, &identifier.kind);
    hit.set_field(HitField::Kind, &identifier.kind);
    hit.set_field(HitField::Language, &identifier.language);
    hit.set_field(
        HitField::Resolved,
        if identifier.target_symbol_id.is_some() {
            "true"
        } else {
            "false"
        },
    );
    Ok(hit)
}

fn context_from_store(
    engine: &SearchEngine,
    path: &str,
    line: u32,
) -> ToolResult<Vec<String>> {
    let window = engine.settings.search.context_lines;
    let Some(record) = engine.store.get_file(path)? else {
        return Ok(Vec::new());
    };
    let Some(content) = record.content else {
        return Ok(Vec::new());
    };
    let lines: Vec<&str> = content.lines().collect();
    let idx = line.saturating_sub(1) as usize;
    if idx >= lines.len() {
        return Ok(Vec::new());
    }
    let start = idx.saturating_sub(window);
    let end = (idx + window + 1).min(lines.len());
    Ok(lines[start..end].iter().map(|l| l.to_string()).collect())
}

/// Fallback: strict text query, then per-hit highlighting and kind
/// classification from the matched line.
fn fallback_hits(
    engine: &SearchEngine,
    symbol: &str,
    case_sensitive: bool,
    max_results: usize,
    cancel: &CancellationToken,
) -> ToolResult<Vec<SearchHit>> {
    let query = engine.text.reference_query(symbol, case_sensitive)?;
    let result = engine.text.search(
        &*query,
        max_results,
        &[symbol.to_string()],
        true,
        engine.settings.search.context_lines,
    )?;
    ensure_not_cancelled(cancel)?;

    let mut hits = Vec::with_capacity(result.hits.len());
    for text_hit in result.hits {
        let matched_line = text_hit
            .context_lines
            .iter()
            .find(|l| l.contains(symbol))
            .cloned()
            .or_else(|| text_hit.snippet.clone())
            .unwrap_or_default();

        let mut hit = SearchHit::new(&text_hit.path, text_hit.score);
        hit.line = text_hit.line;
        hit.snippet = text_hit.snippet.clone();
        hit.context_lines = text_hit
            .context_lines
            .iter()
            .map(|l| highlight(l, symbol))
            .collect();
        hit.last_modified = Some(text_hit.last_modified as i64);
        hit.set_field(
            HitField::ReferenceType,
            classify_reference(&matched_line, symbol),
        );
        if !text_hit.type_names.is_empty() {
            hit.set_field(HitField::TypeInfo, text_hit.type_names.join(","));
        }
        hit.set_field(HitField::Resolved, "false");
        hits.push(hit);
    }
    Ok(hits)
}

/// Wrap each occurrence of `symbol` in marker characters.
fn highlight(line: &str, symbol: &str) -> String {
    if symbol.is_empty() || !line.contains(symbol) {
        return line.to_string();
    }
    line.replace(symbol, &format!("{MARK_START}{symbol}{MARK_END}"))
}

/// Classify a reference occurrence from its source line. Checks run in
/// specificity order; anything unrecognized is plain `usage`.
pub fn classify_reference(line: &str, symbol: &str) -> &'static str {
    let escaped = regex::escape(symbol);
    let checks: &[(&'static str, String)] = &[
        ("type-instantiation", format!(r"\bnew\s+{escaped}\b")),
        ("type-inheritance", format!(r"\bextends\s+{escaped}\b")),
        (
            "interface-implementation",
            format!(r"\bimplements\s+{escaped}\b"),
        ),
        ("generic-type-parameter", format!(r"<\s*{escaped}\s*[,>]")),
        ("method-override", format!(r"\boverride\b.*\b{escaped}\b")),
        (
            "type-reference",
            format!(r"(\bimport\b.*\b{escaped}\b)|(\busing\s+{escaped}\b)|(:\s*{escaped}\b)"),
        ),
        ("method-call", format!(r"\b{escaped}\s*\(")),
        ("method-reference", format!(r"[.&]{escaped}\b[^(]")),
        ("method-usage", format!(r"\b{escaped}\s*\.")),
    ];
    for (tag, pattern) in checks {
        if Regex::new(pattern).map(|re| re.is_match(line)).unwrap_or(false) {
            return *tag;
        }
    }
    "usage"
}

pub fn run_trace_call_path(
    engine: &SearchEngine,
    common: &CommonParams,
    params: &Value,
    cancel: &CancellationToken,
) -> ToolResult<ToolResponse> {
    let started = Instant::now();
    let p: TraceCallPathParams = parse_params(params)?;
    engine.require_index()?;
    ensure_not_cancelled(cancel)?;

    let max_depth = p.max_depth.min(MAX_TRACE_DEPTH);
    let mut hits: Vec<SearchHit> = Vec::new();

    if matches!(p.direction, TraceDirection::Up | TraceDirection::Both) {
        trace_up(engine, &p.symbol, max_depth, p.max_results, &mut hits, cancel)?;
    }
    if matches!(p.direction, TraceDirection::Down | TraceDirection::Both) {
        trace_down(engine, &p.symbol, max_depth, p.max_results, &mut hits, cancel)?;
    }
    hits.truncate(p.max_results);

    let items: Vec<Value> = hits
        .iter()
        .map(|h| serde_json::to_value(h).unwrap_or_default())
        .collect();
    let summary = format!(
        "{} call-path node{} from '{}'",
        hits.len(),
        if hits.len() == 1 { "" } else { "s" },
        p.symbol
    );
    let ctx = engine.build_context("trace_call_path", common, Some(p.symbol.clone()), started);
    Ok(engine.builder.build(summary, items, BTreeMap::new(), &ctx))
}

/// Walk callers: identifiers naming the frontier symbol point back to
/// their containing symbols, which become the next frontier.
fn trace_up(
    engine: &SearchEngine,
    symbol: &str,
    max_depth: u32,
    max_results: usize,
    hits: &mut Vec<SearchHit>,
    cancel: &CancellationToken,
) -> ToolResult<()> {
    let mut frontier: Vec<String> = vec![symbol.to_string()];
    let mut visited: HashSet<String> = HashSet::new();
    visited.insert(symbol.to_string());

    for depth in 1..=max_depth {
        ensure_not_cancelled(cancel)?;
        let mut next = Vec::new();
        for name in &frontier {
            let callers = engine.store.get_identifiers_by_name(name, true)?;
            for identifier in callers.iter().take(MAX_PER_HOP) {
                if hits.len() >= max_results {
                    return Ok(());
                }
                let containing = match &identifier.containing_symbol_id {
                    Some(id) => engine.store.get_symbol_by_id(id)?,
                    None => None,
                };
                let caller_name = containing.as_ref().map(|s| s.name.clone());
                hits.push(trace_hit(identifier, depth, "up", caller_name.as_deref()));
                if let Some(caller) = caller_name {
                    if visited.insert(caller.clone()) {
                        next.push(caller);
                    }
                }
            }
        }
        if next.is_empty() {
            break;
        }
        frontier = next;
    }
    Ok(())
}

/// Walk callees: everything referenced from inside the frontier symbol's
/// body, via `containing_symbol_id`.
fn trace_down(
    engine: &SearchEngine,
    symbol: &str,
    max_depth: u32,
    max_results: usize,
    hits: &mut Vec<SearchHit>,
    cancel: &CancellationToken,
) -> ToolResult<()> {
    let mut frontier: Vec<String> = vec![symbol.to_string()];
    let mut visited: HashSet<String> = HashSet::new();
    visited.insert(symbol.to_string());

    for depth in 1..=max_depth {
        ensure_not_cancelled(cancel)?;
        let mut next = Vec::new();
        for name in &frontier {
            for def in engine.store.get_symbols_by_name(name, true)? {
                let callees = engine.store.get_identifiers_by_containing_symbol(&def.id)?;
                for identifier in callees.iter().take(MAX_PER_HOP) {
                    if hits.len() >= max_results {
                        return Ok(());
                    }
                    hits.push(trace_hit(identifier, depth, "down", Some(&def.name)));
                    if visited.insert(identifier.name.clone()) {
                        next.push(identifier.name.clone());
                    }
                }
            }
        }
        if next.is_empty() {
            break;
        }
        frontier = next;
    }
    Ok(())
}

fn trace_hit(
    identifier: &Identifier,
    depth: u32,
    direction: &str,
    containing_name: Option<&str>,
) -> SearchHit {
    let mut hit = SearchHit::new(&identifier.file_path, identifier.confidence);
    hit.line = Some(identifier.start_line);
    hit.column = Some(identifier.start_col);
    hit.snippet = identifier.code_context.clone();
    hit.set_field(HitField::ReferenceType, &identifier.kind);
    hit.set_field(HitField::CallDepth, depth.to_string());
    hit.fields
        .insert("direction".to_string(), direction.to_string());
    if let Some(name) = containing_name {
        hit.fields
            .insert("containingSymbol".to_string(), name.to_string());
        hit.set_field(
            HitField::IsEntryPoint,
            if ENTRY_POINT_RE.is_match(name) {
                "true"
            } else {
                "false"
            },
        );
    }
    hit
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_covers_the_tag_set() {
        assert_eq!(classify_reference("let s = new Server();", "Server"), "type-instantiation");
        assert_eq!(classify_reference("class A extends Server {", "Server"), "type-inheritance");
        assert_eq!(
            classify_reference("class A implements Handler {", "Handler"),
            "interface-implementation"
        );
        assert_eq!(classify_reference("List<Server> xs;", "Server"), "generic-type-parameter");
        assert_eq!(classify_reference("override fn render()", "render"), "method-override");
        assert_eq!(classify_reference("import { Server } from 'x';", "Server"), "type-reference");
        assert_eq!(classify_reference("fn f(s: Server)", "Server"), "type-reference");
        assert_eq!(classify_reference("render(frame)", "render"), "method-call");
        assert_eq!(classify_reference("Server.start_all()", "Server"), "method-usage");
        assert_eq!(classify_reference("somewhere render somewhere", "render"), "usage");
    }

    #[test]
    fn highlight_wraps_every_occurrence() {
        assert_eq!(highlight("foo(foo)", "foo"), ">>foo<<(>>foo<<)");
        assert_eq!(highlight("bar()", "foo"), "bar()");
    }

    #[test]
    fn entry_point_regex_matches_conventions() {
        assert!(ENTRY_POINT_RE.is_match("main"));
        assert!(ENTRY_POINT_RE.is_match("UserController"));
        assert!(ENTRY_POINT_RE.is_match("request_handler"));
        assert!(!ENTRY_POINT_RE.is_match("helper"));
    }
}
