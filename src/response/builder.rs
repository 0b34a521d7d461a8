//! Response builder: budget allocation and progressive reduction.
//!
//! One engine parameterized by a small strategy record per tool (priority
//! function, insight and action generators) instead of a subclass
//! hierarchy. Given result items and a token limit, the builder:
//!
//! 1. splits the budget between data, insights and actions (adaptively by
//!    result count),
//! 2. ranks items with the tool's priority function,
//! 3. includes a prefix of the ranked list that fits the data budget,
//!    cleaning each item on the way,
//! 4. spills the full result set to the resource store when anything was
//!    dropped and the caller asked to keep it,
//! 5. generates insights and actions and trims each list to its budget.

use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::response::envelope::{
    ActionItem, ResponseData, ResponseMeta, ResponseMode, TokenInfo, ToolResponse,
};
use crate::response::resources::ResourceStore;
use crate::response::tokens::{estimate, estimate_str, estimate_value};

/// Tokens reserved for the envelope skeleton itself.
const ENVELOPE_OVERHEAD: usize = 60;
/// Below this limit the budget contract is best-effort only.
pub const MIN_VIABLE_BUDGET: usize = 200;
/// Longest snippet / context line kept after cleaning.
const MAX_SNIPPET_CHARS: usize = 200;
/// `typeInfo` payload cap after cleaning.
const MAX_TYPE_INFO_CHARS: usize = 120;

/// Build-time request context.
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub tool: String,
    pub mode: ResponseMode,
    pub token_limit: usize,
    pub store_full_results: bool,
    pub query: Option<String>,
    pub elapsed_ms: u64,
}

/// Inputs handed to insight/action generators.
pub struct BuildInput<'a> {
    pub tool: &'a str,
    pub query: Option<&'a str>,
    pub total: usize,
    pub shown: usize,
    pub truncated: bool,
    pub items: &'a [Value],
}

/// Per-tool behavior as data.
pub struct ToolStrategy {
    pub name: &'static str,
    pub priority: fn(&Value) -> f64,
    pub insights: fn(&BuildInput<'_>) -> Vec<String>,
    pub actions: fn(&BuildInput<'_>) -> Vec<ActionItem>,
}

/// Budget fractions `(data, insights, actions)` by result count. Large
/// result sets shift weight toward insights; a single result gets almost
/// the whole budget as data.
fn budget_split(count: usize, mode: ResponseMode) -> (f64, f64, f64) {
    let (mut data, mut insights, actions) = match count {
        0 => (0.30, 0.35, 0.35),
        1 => (0.80, 0.10, 0.10),
        2..=5 => (0.75, 0.12, 0.13),
        6..=20 => (0.70, 0.15, 0.15),
        21..=100 => (0.68, 0.20, 0.12),
        _ => (0.65, 0.25, 0.10),
    };
    if mode == ResponseMode::Summary {
        data -= 0.05;
        insights += 0.05;
    }
    (data, insights, actions)
}

/// The reduction engine.
pub struct ResponseBuilder {
    resources: Option<Arc<ResourceStore>>,
}

impl ResponseBuilder {
    pub fn new(resources: Option<Arc<ResourceStore>>) -> Self {
        Self { resources }
    }

    /// Build a bounded response from raw result items.
    pub fn build(
        &self,
        summary: String,
        items: Vec<Value>,
        extension_data: BTreeMap<String, Value>,
        ctx: &BuildContext,
    ) -> ToolResponse {
        let strategy = strategy_for(&ctx.tool);
        let total = items.len();
        let usable = ctx.token_limit.saturating_sub(ENVELOPE_OVERHEAD).max(1);
        let (data_frac, insight_frac, action_frac) = budget_split(total, ctx.mode);
        let data_budget = (usable as f64 * data_frac) as usize;
        let insight_budget = (usable as f64 * insight_frac) as usize;
        let action_budget = (usable as f64 * action_frac) as usize;

        // rank, then include a prefix that fits
        let mut ranked = items;
        ranked.sort_by(|a, b| {
            (strategy.priority)(b)
                .partial_cmp(&(strategy.priority)(a))
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let full_payload = if ctx.store_full_results {
            serde_json::to_vec(&ranked).ok()
        } else {
            None
        };

        let mut included = Vec::new();
        let mut spent = 0usize;
        for item in &ranked {
            let cleaned = clean_item(item.clone(), ctx.mode);
            let cost = estimate_value(&cleaned);
            if spent + cost > data_budget {
                break;
            }
            spent += cost;
            included.push(cleaned);
        }

        let truncated = included.len() < total;
        let resource_uri = if truncated {
            match (&self.resources, full_payload) {
                (Some(store), Some(payload)) => store.store(&ctx.tool, &payload),
                _ => None,
            }
        } else {
            None
        };

        let input = BuildInput {
            tool: &ctx.tool,
            query: ctx.query.as_deref(),
            total,
            shown: included.len(),
            truncated,
            items: &included,
        };

        let mut insights = (strategy.insights)(&input);
        if truncated {
            insights.push(format!(
                "Showing {} of {} results; the rest were dropped to fit the token budget.",
                included.len(),
                total
            ));
        }
        trim_strings_to_budget(&mut insights, insight_budget);

        let mut actions = (strategy.actions)(&input);
        trim_actions_to_budget(&mut actions, action_budget);

        let mut response = ToolResponse {
            success: true,
            data: ResponseData {
                summary,
                results: included,
                count: total,
                extension_data,
            },
            insights,
            actions,
            meta: ResponseMeta {
                execution_time: format!("{}ms", ctx.elapsed_ms),
                truncated,
                resource_uri,
                token_info: TokenInfo {
                    estimated: 0,
                    limit: ctx.token_limit,
                    reduction_strategy: truncated.then(|| strategy.name.to_string()),
                },
            },
            error: None,
        };
        response.meta.token_info.estimated = estimate(&response);
        response
    }
}

/// Clean one item: round scores, truncate snippets and context lines,
/// drop duplicated context fragments, cap `typeInfo`. Fields needed for
/// navigation are never removed.
fn clean_item(mut item: Value, mode: ResponseMode) -> Value {
    let Some(obj) = item.as_object_mut() else {
        return item;
    };

    if let Some(score) = obj.get("score").and_then(Value::as_f64) {
        obj.insert(
            "score".to_string(),
            json!((score * 100.0).round() / 100.0),
        );
    }

    if let Some(Value::String(snippet)) = obj.get_mut("snippet") {
        truncate_in_place(snippet, MAX_SNIPPET_CHARS);
    }
    if mode == ResponseMode::Summary {
        obj.remove("snippet");
    }

    if let Some(Value::Array(lines)) = obj.get_mut("contextLines") {
        let mut seen = std::collections::HashSet::new();
        lines.retain(|l| match l.as_str() {
            Some(s) => seen.insert(s.trim().to_string()),
            None => true,
        });
        for line in lines.iter_mut() {
            if let Value::String(s) = line {
                truncate_in_place(s, MAX_SNIPPET_CHARS);
            }
        }
    }

    if let Some(Value::Object(fields)) = obj.get_mut("fields") {
        if let Some(Value::String(info)) = fields.get_mut("typeInfo") {
            truncate_in_place(info, MAX_TYPE_INFO_CHARS);
        }
    }

    item
}

fn truncate_in_place(s: &mut String, max_chars: usize) {
    if s.chars().count() > max_chars {
        let cut: String = s.chars().take(max_chars).collect();
        *s = format!("{cut}...");
    }
}

fn trim_strings_to_budget(list: &mut Vec<String>, budget: usize) {
    while list.len() > 1 {
        let cost: usize = list.iter().map(|s| estimate_str(s)).sum();
        if cost <= budget {
            break;
        }
        list.pop();
    }
}

fn trim_actions_to_budget(list: &mut Vec<ActionItem>, budget: usize) {
    // lowest-priority actions go first
    list.sort_by_key(|a| a.priority);
    while list.len() > 1 {
        let cost: usize = list.iter().map(estimate).sum();
        if cost <= budget {
            break;
        }
        list.pop();
    }
}

fn score_of(item: &Value) -> f64 {
    item.get("score").and_then(Value::as_f64).unwrap_or(0.0)
}

/// Strategy lookup. Unknown tools fall back to score ordering with
/// generic insights.
pub fn strategy_for(tool: &str) -> ToolStrategy {
    match tool {
        "find_references" | "trace_call_path" => ToolStrategy {
            name: "entry_point_priority",
            priority: |item| {
                let entry = item
                    .get("fields")
                    .and_then(|f| f.get("isEntryPoint"))
                    .and_then(Value::as_str)
                    == Some("true");
                let depth = item
                    .get("fields")
                    .and_then(|f| f.get("callDepth"))
                    .and_then(Value::as_str)
                    .and_then(|d| d.parse::<f64>().ok())
                    .unwrap_or(0.0);
                (if entry { 1_000_000.0 } else { 0.0 }) + score_of(item) - depth * 0.001
            },
            insights: reference_insights,
            actions: reference_actions,
        },
        "search_and_replace" | "smart_refactor" => ToolStrategy {
            name: "replacement_count_priority",
            priority: |item| {
                item.get("replacementCount")
                    .and_then(Value::as_f64)
                    .unwrap_or(0.0)
            },
            insights: refactor_insights,
            actions: refactor_actions,
        },
        _ => ToolStrategy {
            name: "score_priority",
            priority: score_of,
            insights: generic_insights,
            actions: generic_actions,
        },
    }
}

fn distinct_files(items: &[Value]) -> usize {
    items
        .iter()
        .filter_map(|i| i.get("filePath").and_then(Value::as_str))
        .collect::<std::collections::HashSet<_>>()
        .len()
}

fn generic_insights(input: &BuildInput<'_>) -> Vec<String> {
    let mut out = Vec::new();
    if input.total == 0 {
        out.push("No matches. Broaden the query or check that the workspace is indexed.".into());
        return out;
    }
    let files = distinct_files(input.items);
    if files > 0 {
        out.push(format!(
            "{} result{} across {} file{}.",
            input.total,
            if input.total == 1 { "" } else { "s" },
            files,
            if files == 1 { "" } else { "s" }
        ));
    }
    out
}

fn generic_actions(input: &BuildInput<'_>) -> Vec<ActionItem> {
    let mut out = Vec::new();
    if input.total == 0 {
        out.push(
            ActionItem::new("index_workspace", "Re-index the workspace if results look stale", 2)
                .with_rationale("An empty result can mean the index has not been built"),
        );
        if let Some(q) = input.query {
            out.push(
                ActionItem::new("text_search", "Retry with a broader query", 1)
                    .with_parameter("query", json!(format!("*{q}*"))),
            );
        }
        return out;
    }
    if input.total > 50 {
        out.push(
            ActionItem::new("text_search", "Narrow the query with a file extension filter", 1)
                .with_rationale("Large result sets usually benefit from an extension filter"),
        );
    }
    if let Some(first) = input
        .items
        .first()
        .and_then(|i| i.get("filePath"))
        .and_then(Value::as_str)
    {
        out.push(
            ActionItem::new("goto_definition", format!("Open the top hit in {first}"), 3)
                .with_parameter("filePath", json!(first)),
        );
    }
    out
}

fn reference_insights(input: &BuildInput<'_>) -> Vec<String> {
    let mut out = Vec::new();
    if input.total == 0 {
        out.push("No references found; the symbol may be unused or defined elsewhere.".into());
        return out;
    }
    let files = distinct_files(input.items);
    out.push(format!(
        "{} reference{} in {} file{}.",
        input.total,
        if input.total == 1 { "" } else { "s" },
        files,
        if files == 1 { "" } else { "s" }
    ));
    // distribution over reference kinds
    let mut kinds: BTreeMap<&str, usize> = BTreeMap::new();
    for item in input.items {
        if let Some(kind) = item
            .get("fields")
            .and_then(|f| f.get("referenceType"))
            .and_then(Value::as_str)
        {
            *kinds.entry(kind).or_default() += 1;
        }
    }
    if kinds.len() > 1 {
        let parts: Vec<String> = kinds.iter().map(|(k, n)| format!("{k}: {n}")).collect();
        out.push(format!("Reference kinds: {}.", parts.join(", ")));
    }
    out
}

fn reference_actions(input: &BuildInput<'_>) -> Vec<ActionItem> {
    let mut out = Vec::new();
    if input.total == 0 {
        if let Some(q) = input.query {
            out.push(
                ActionItem::new("symbol_search", "Look up the symbol definition instead", 1)
                    .with_parameter("query", json!(q)),
            );
        }
        return out;
    }
    if let Some(q) = input.query {
        out.push(
            ActionItem::new("trace_call_path", "Trace callers and callees from this symbol", 2)
                .with_parameter("symbol", json!(q)),
        );
        out.push(
            ActionItem::new("goto_definition", "Jump to the definition", 3)
                .with_parameter("symbol", json!(q)),
        );
    }
    out
}

fn refactor_insights(input: &BuildInput<'_>) -> Vec<String> {
    let total_replacements: u64 = input
        .items
        .iter()
        .filter_map(|i| i.get("replacementCount").and_then(Value::as_u64))
        .sum();
    let mut out = vec![format!(
        "{total_replacements} replacement{} across {} file{}.",
        if total_replacements == 1 { "" } else { "s" },
        input.total,
        if input.total == 1 { "" } else { "s" }
    )];
    if input.truncated {
        out.push("Per-file diffs were reduced; the change counts remain exact.".into());
    }
    out
}

fn refactor_actions(input: &BuildInput<'_>) -> Vec<ActionItem> {
    let mut out = Vec::new();
    let previewed = input
        .items
        .iter()
        .any(|i| i.get("applied").and_then(Value::as_bool) == Some(false));
    if previewed {
        out.push(
            ActionItem::new("search_and_replace", "Apply the previewed changes", 1)
                .with_parameter("preview", json!(false))
                .with_rationale("Preview ran without writing files"),
        );
    } else if input.total > 0 {
        out.push(
            ActionItem::new("run_tests", "Run the test suite over the modified files", 1)
                .with_rationale("Replacements were written to disk"),
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(tool: &str, limit: usize) -> BuildContext {
        BuildContext {
            tool: tool.to_string(),
            mode: ResponseMode::Adaptive,
            token_limit: limit,
            store_full_results: false,
            query: Some("foo".to_string()),
            elapsed_ms: 7,
        }
    }

    fn hit(path: &str, score: f64) -> Value {
        json!({
            "filePath": path,
            "score": score,
            "line": 3,
            "snippet": "foo()",
            "contextLines": ["a", "foo()", "a"],
        })
    }

    #[test]
    fn small_result_sets_fit_untruncated() {
        let builder = ResponseBuilder::new(None);
        let response = builder.build(
            "1 result".into(),
            vec![hit("a.rs", 1.0)],
            BTreeMap::new(),
            &ctx("text_search", 4000),
        );
        assert!(response.success);
        assert!(!response.meta.truncated);
        assert_eq!(response.data.count, 1);
        assert_eq!(response.data.results.len(), 1);
        assert!(response.meta.token_info.estimated <= 4000);
    }

    #[test]
    fn reduction_keeps_a_priority_prefix() {
        let builder = ResponseBuilder::new(None);
        let items: Vec<Value> = (0..200)
            .map(|i| hit(&format!("f{i}.rs"), 200.0 - i as f64))
            .collect();
        let response = builder.build(
            "many".into(),
            items,
            BTreeMap::new(),
            &ctx("text_search", 1000),
        );
        assert!(response.meta.truncated);
        assert!(response.data.results.len() < 200);
        assert_eq!(response.data.count, 200);
        assert!(response.meta.token_info.estimated <= 1000);

        // prefix of the score-descending order
        let scores: Vec<f64> = response
            .data
            .results
            .iter()
            .map(|r| r["score"].as_f64().unwrap())
            .collect();
        let mut sorted = scores.clone();
        sorted.sort_by(|a, b| b.partial_cmp(a).unwrap());
        assert_eq!(scores, sorted);
        assert_eq!(scores[0], 200.0);
        assert_eq!(
            response.meta.token_info.reduction_strategy.as_deref(),
            Some("score_priority")
        );
    }

    #[test]
    fn cleaning_rounds_scores_and_dedupes_context() {
        let builder = ResponseBuilder::new(None);
        let item = json!({
            "filePath": "a.rs",
            "score": 1.23456,
            "snippet": "s".repeat(500),
            "contextLines": ["same", "same", "other"],
            "fields": {"typeInfo": "t".repeat(500)}
        });
        let response = builder.build(
            "x".into(),
            vec![item],
            BTreeMap::new(),
            &ctx("text_search", 4000),
        );
        let cleaned = &response.data.results[0];
        assert_eq!(cleaned["score"], 1.23);
        assert!(cleaned["snippet"].as_str().unwrap().len() < 500);
        assert_eq!(cleaned["contextLines"].as_array().unwrap().len(), 2);
        assert!(cleaned["fields"]["typeInfo"].as_str().unwrap().len() <= MAX_TYPE_INFO_CHARS + 3);
    }

    #[test]
    fn summary_mode_drops_snippets() {
        let builder = ResponseBuilder::new(None);
        let mut c = ctx("text_search", 4000);
        c.mode = ResponseMode::Summary;
        let response = builder.build("x".into(), vec![hit("a.rs", 1.0)], BTreeMap::new(), &c);
        assert!(response.data.results[0].get("snippet").is_none());
    }

    #[test]
    fn refactor_priority_uses_replacement_counts() {
        let items = vec![
            json!({"filePath": "low.rs", "replacementCount": 1, "applied": false}),
            json!({"filePath": "high.rs", "replacementCount": 9, "applied": false}),
        ];
        let builder = ResponseBuilder::new(None);
        let response = builder.build(
            "x".into(),
            items,
            BTreeMap::new(),
            &ctx("search_and_replace", 4000),
        );
        assert_eq!(response.data.results[0]["filePath"], "high.rs");
        assert!(response
            .actions
            .iter()
            .any(|a| a.action == "search_and_replace"));
    }

    #[test]
    fn entry_points_rank_first_for_call_paths() {
        let items = vec![
            json!({"filePath": "mid.rs", "score": 9.0, "fields": {"callDepth": "2"}}),
            json!({"filePath": "main.rs", "score": 0.5, "fields": {"isEntryPoint": "true", "callDepth": "0"}}),
        ];
        let builder = ResponseBuilder::new(None);
        let response = builder.build(
            "x".into(),
            items,
            BTreeMap::new(),
            &ctx("trace_call_path", 4000),
        );
        assert_eq!(response.data.results[0]["filePath"], "main.rs");
    }

    #[test]
    fn zero_results_still_produce_insights_and_actions() {
        let builder = ResponseBuilder::new(None);
        let response = builder.build(
            "nothing".into(),
            vec![],
            BTreeMap::new(),
            &ctx("text_search", 2000),
        );
        assert!(!response.insights.is_empty());
        assert!(!response.actions.is_empty());
        assert!(!response.meta.truncated);
    }
}
