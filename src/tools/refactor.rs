//! Search-and-replace and single-file refactor tools.
//!
//! Both share one write path: compute line-level changes first, then (in
//! apply mode) write each file under the indexer's per-path advisory lock
//! and immediately re-index it so every tier sees the new content. Preview
//! mode never touches disk. Running the same invocation twice is a no-op
//! the second time.

use regex::Regex;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{ToolError, ToolResult};
use crate::response::ToolResponse;
use crate::tools::{CommonParams, SearchEngine, ensure_not_cancelled, parse_params};

#[derive(Debug, Deserialize)]
struct SearchAndReplaceParams {
    pattern: String,
    replacement: String,
    #[serde(default)]
    use_regex: bool,
    #[serde(default = "default_true")]
    case_sensitive: bool,
    #[serde(default)]
    file_glob: Option<String>,
    #[serde(default = "default_true")]
    preview: bool,
    #[serde(default = "default_max_files")]
    max_files: usize,
}

#[derive(Debug, Deserialize)]
struct SmartRefactorParams {
    file_path: String,
    find: String,
    replace: String,
    #[serde(default)]
    start_line: Option<u32>,
    #[serde(default)]
    end_line: Option<u32>,
    #[serde(default = "default_true")]
    preview: bool,
}

fn default_true() -> bool {
    true
}
fn default_max_files() -> usize {
    100
}

/// One changed line.
#[derive(Debug, Clone)]
struct LineChange {
    line: u32,
    before: String,
    after: String,
}

/// All changes for one file.
#[derive(Debug, Clone)]
struct FileChange {
    path: String,
    changes: Vec<LineChange>,
    new_content: String,
}

enum Matcher {
    Literal { pattern: String, case_sensitive: bool },
    Pattern(Regex),
}

impl Matcher {
    fn new(pattern: &str, use_regex: bool, case_sensitive: bool) -> ToolResult<Self> {
        if pattern.is_empty() {
            return Err(ToolError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: "empty pattern".to_string(),
            });
        }
        if use_regex {
            let built = if case_sensitive {
                Regex::new(pattern)
            } else {
                Regex::new(&format!("(?i){pattern}"))
            };
            Ok(Self::Pattern(built.map_err(|e| ToolError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })?))
        } else {
            Ok(Self::Literal {
                pattern: pattern.to_string(),
                case_sensitive,
            })
        }
    }

    fn replace_line(&self, line: &str, replacement: &str) -> (String, usize) {
        match self {
            Self::Pattern(re) => {
                let count = re.find_iter(line).count();
                if count == 0 {
                    return (line.to_string(), 0);
                }
                (re.replace_all(line, replacement).into_owned(), count)
            }
            Self::Literal {
                pattern,
                case_sensitive,
            } => {
                if *case_sensitive {
                    let count = line.matches(pattern.as_str()).count();
                    (line.replace(pattern.as_str(), replacement), count)
                } else {
                    replace_case_insensitive(line, pattern, replacement)
                }
            }
        }
    }
}

fn replace_case_insensitive(line: &str, pattern: &str, replacement: &str) -> (String, usize) {
    let lowered_line = line.to_lowercase();
    let lowered_pattern = pattern.to_lowercase();
    if lowered_pattern.is_empty() {
        return (line.to_string(), 0);
    }
    let mut out = String::with_capacity(line.len());
    let mut cursor = 0;
    let mut count = 0;
    while let Some(rel) = lowered_line[cursor..].find(&lowered_pattern) {
        let start = cursor + rel;
        out.push_str(&line[cursor..start]);
        out.push_str(replacement);
        cursor = start + pattern.len();
        count += 1;
    }
    out.push_str(&line[cursor..]);
    (out, count)
}

/// Compute line-level changes for one file's content, optionally bounded
/// to a line range.
fn compute_changes(
    content: &str,
    matcher: &Matcher,
    replacement: &str,
    line_range: Option<(u32, u32)>,
) -> (Vec<LineChange>, String) {
    let mut changes = Vec::new();
    let mut new_lines = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        let line_no = idx as u32 + 1;
        let in_range = line_range
            .map(|(s, e)| line_no >= s && line_no <= e)
            .unwrap_or(true);
        if !in_range {
            new_lines.push(line.to_string());
            continue;
        }
        let (after, count) = matcher.replace_line(line, replacement);
        if count > 0 {
            changes.push(LineChange {
                line: line_no,
                before: line.to_string(),
                after: after.clone(),
            });
        }
        new_lines.push(after);
    }
    let mut new_content = new_lines.join("\n");
    if content.ends_with('\n') {
        new_content.push('\n');
    }
    (changes, new_content)
}

pub fn run_search_and_replace(
    engine: &SearchEngine,
    common: &CommonParams,
    params: &Value,
    cancel: &CancellationToken,
) -> ToolResult<ToolResponse> {
    let started = Instant::now();
    let p: SearchAndReplaceParams = parse_params(params)?;
    engine.require_index()?;
    let matcher = Matcher::new(&p.pattern, p.use_regex, p.case_sensitive)?;
    ensure_not_cancelled(cancel)?;

    let glob = p
        .file_glob
        .as_deref()
        .map(|g| {
            glob::Pattern::new(&g.to_lowercase()).map_err(|e| ToolError::InvalidPattern {
                pattern: g.to_string(),
                reason: e.to_string(),
            })
        })
        .transpose()?;

    let mut file_changes = Vec::new();
    for path in engine.store.all_file_paths()? {
        ensure_not_cancelled(cancel)?;
        if let Some(glob) = &glob {
            if !glob.matches(&path.to_lowercase()) {
                continue;
            }
        }
        // apply against the file on disk; the index may lag a save
        let abs = engine.layout.absolute_path(&path);
        let content = match std::fs::read_to_string(&abs) {
            Ok(c) => c,
            Err(_) => match engine.store.get_file(&path)?.and_then(|f| f.content) {
                Some(c) => c,
                None => continue,
            },
        };
        let (changes, new_content) = compute_changes(&content, &matcher, &p.replacement, None);
        if !changes.is_empty() {
            file_changes.push(FileChange {
                path,
                changes,
                new_content,
            });
        }
        if file_changes.len() >= p.max_files {
            break;
        }
    }

    if !p.preview {
        apply_changes(engine, &file_changes)?;
    }

    build_refactor_response(
        engine,
        common,
        "search_and_replace",
        &p.pattern,
        file_changes,
        p.preview,
        started,
    )
}

pub fn run_smart_refactor(
    engine: &SearchEngine,
    common: &CommonParams,
    params: &Value,
    cancel: &CancellationToken,
) -> ToolResult<ToolResponse> {
    let started = Instant::now();
    let p: SmartRefactorParams = parse_params(params)?;
    engine.require_index()?;
    let matcher = Matcher::new(&p.find, false, true)?;
    ensure_not_cancelled(cancel)?;

    let rel = engine
        .layout
        .relative_unix_path(std::path::Path::new(&p.file_path))
        .unwrap_or_else(|| p.file_path.clone());
    if engine.store.get_file(&rel)?.is_none() {
        return Err(ToolError::FileNotIndexed {
            path: std::path::PathBuf::from(&p.file_path),
        });
    }

    let abs = engine.layout.absolute_path(&rel);
    let content =
        std::fs::read_to_string(&abs).map_err(|e| ToolError::Internal(e.to_string()))?;
    let range = match (p.start_line, p.end_line) {
        (Some(s), Some(e)) => Some((s, e)),
        (Some(s), None) => Some((s, u32::MAX)),
        (None, Some(e)) => Some((1, e)),
        (None, None) => None,
    };
    let (changes, new_content) = compute_changes(&content, &matcher, &p.replace, range);

    let file_changes = if changes.is_empty() {
        Vec::new()
    } else {
        vec![FileChange {
            path: rel,
            changes,
            new_content,
        }]
    };

    if !p.preview {
        apply_changes(engine, &file_changes)?;
    }

    build_refactor_response(
        engine,
        common,
        "smart_refactor",
        &p.find,
        file_changes,
        p.preview,
        started,
    )
}

/// Write changed files under the per-path advisory lock, then re-index so
/// every tier observes the new content.
fn apply_changes(engine: &SearchEngine, file_changes: &[FileChange]) -> ToolResult<()> {
    for change in file_changes {
        let abs = engine.layout.absolute_path(&change.path);
        std::fs::write(&abs, &change.new_content)
            .map_err(|e| ToolError::Internal(format!("writing {}: {e}", change.path)))?;
        engine.indexer.index_file(&abs, true)?;
    }
    if !file_changes.is_empty() {
        engine.cache.invalidate_all();
    }
    Ok(())
}

fn build_refactor_response(
    engine: &SearchEngine,
    common: &CommonParams,
    tool: &str,
    pattern: &str,
    file_changes: Vec<FileChange>,
    preview: bool,
    started: Instant,
) -> ToolResult<ToolResponse> {
    let total_replacements: usize = file_changes.iter().map(|f| f.changes.len()).sum();
    let total_files = file_changes.len();

    let items: Vec<Value> = file_changes
        .iter()
        .map(|f| {
            json!({
                "filePath": f.path,
                "replacementCount": f.changes.len(),
                "applied": !preview,
                "changes": f.changes.iter().map(|c| json!({
                    "line": c.line,
                    "before": c.before,
                    "after": c.after,
                })).collect::<Vec<_>>(),
            })
        })
        .collect();

    let summary = format!(
        "{} {} replacement{} in {} file{} for '{}'",
        if preview { "Previewed" } else { "Applied" },
        total_replacements,
        if total_replacements == 1 { "" } else { "s" },
        total_files,
        if total_files == 1 { "" } else { "s" },
        pattern
    );

    let mut extension_data = BTreeMap::new();
    extension_data.insert("totalReplacements".to_string(), json!(total_replacements));
    extension_data.insert("totalFiles".to_string(), json!(total_files));
    extension_data.insert("preview".to_string(), json!(preview));

    let ctx = engine.build_context(tool, common, Some(pattern.to_string()), started);
    Ok(engine.builder.build(summary, items, extension_data, &ctx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_replacement_counts_occurrences() {
        let matcher = Matcher::new("foo", false, true).unwrap();
        let (changes, new_content) =
            compute_changes("foo bar\nno match\nfoo foo\n", &matcher, "baz", None);
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].line, 1);
        assert_eq!(changes[1].after, "baz baz");
        assert_eq!(new_content, "baz bar\nno match\nbaz baz\n");
    }

    #[test]
    fn case_insensitive_literal_preserves_surroundings() {
        let (out, count) = replace_case_insensitive("Foo fOO foo", "foo", "x");
        assert_eq!(out, "x x x");
        assert_eq!(count, 3);
    }

    #[test]
    fn regex_replacement_supports_captures() {
        let matcher = Matcher::new(r"get_(\w+)", true, true).unwrap();
        let (changes, _) = compute_changes("let v = get_value();\n", &matcher, "fetch_$1", None);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].after, "let v = fetch_value();");
    }

    #[test]
    fn bad_regex_is_invalid_pattern() {
        assert!(matches!(
            Matcher::new("(unclosed", true, true),
            Err(ToolError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn line_range_bounds_the_edit() {
        let matcher = Matcher::new("x", false, true).unwrap();
        let (changes, content) =
            compute_changes("x\nx\nx\n", &matcher, "y", Some((2, 2)));
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].line, 2);
        assert_eq!(content, "x\ny\nx\n");
    }

    #[test]
    fn replacement_is_idempotent() {
        let matcher = Matcher::new("foo", false, true).unwrap();
        let (_, first) = compute_changes("foo\n", &matcher, "bar", None);
        let (changes, second) = compute_changes(&first, &matcher, "bar", None);
        assert!(changes.is_empty());
        assert_eq!(first, second);
    }
}
