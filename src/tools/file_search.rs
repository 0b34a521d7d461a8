//! File, directory and recent-file search tools. All three read only the
//! structured store; directories are derived views over file paths.

use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::{BTreeMap, BTreeSet};
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;

use crate::error::{ToolError, ToolResult};
use crate::response::ToolResponse;
use crate::tools::{CommonParams, SearchEngine, ensure_not_cancelled, parse_params};
use crate::types::FileRecord;

#[derive(Debug, Deserialize)]
struct FileSearchParams {
    pattern: String,
    #[serde(default)]
    search_full_path: bool,
    #[serde(default)]
    extensions: Option<Vec<String>>,
    #[serde(default)]
    use_regex: bool,
    #[serde(default)]
    include_directories: bool,
    #[serde(default = "default_file_max")]
    max_results: usize,
}

#[derive(Debug, Deserialize)]
struct DirectorySearchParams {
    pattern: String,
    #[serde(default)]
    include_hidden: bool,
    #[serde(default = "default_dir_max")]
    max_results: usize,
}

#[derive(Debug, Deserialize)]
struct RecentFilesParams {
    #[serde(default = "default_time_frame")]
    time_frame: String,
    #[serde(default)]
    extensions: Option<Vec<String>>,
    #[serde(default = "default_dir_max")]
    max_results: usize,
}

fn default_file_max() -> usize {
    100
}
fn default_dir_max() -> usize {
    50
}
fn default_time_frame() -> String {
    "7d".to_string()
}

pub fn run_file_search(
    engine: &SearchEngine,
    common: &CommonParams,
    params: &Value,
    cancel: &CancellationToken,
) -> ToolResult<ToolResponse> {
    let started = Instant::now();
    let p: FileSearchParams = parse_params(params)?;
    engine.require_index()?;
    ensure_not_cancelled(cancel)?;

    let files = if p.use_regex {
        let re = regex::Regex::new(&p.pattern).map_err(|e| ToolError::InvalidPattern {
            pattern: p.pattern.clone(),
            reason: e.to_string(),
        })?;
        let mut matched = Vec::new();
        for path in engine.store.all_file_paths()? {
            let target = if p.search_full_path {
                path.as_str()
            } else {
                path.rsplit('/').next().unwrap_or(&path)
            };
            if re.is_match(target) {
                if let Some(record) = engine.store.get_file(&path)? {
                    matched.push(strip_content(record));
                }
            }
            if matched.len() >= p.max_results {
                break;
            }
        }
        matched
    } else {
        validate_glob(&p.pattern)?;
        engine.store.search_files_by_pattern(
            &p.pattern,
            p.search_full_path,
            p.extensions.as_deref(),
            p.max_results,
        )?
    };
    ensure_not_cancelled(cancel)?;

    let mut items: Vec<Value> = files.iter().map(file_item).collect();

    if p.include_directories {
        let mut dirs: BTreeSet<String> = BTreeSet::new();
        for f in &files {
            if let Some(parent) = f.path.rsplit_once('/').map(|(d, _)| d.to_string()) {
                dirs.insert(parent);
            }
        }
        for dir in dirs {
            items.push(json!({"directory": dir}));
        }
    }

    let summary = format!(
        "{} file{} matching '{}'",
        files.len(),
        if files.len() == 1 { "" } else { "s" },
        p.pattern
    );
    let ctx = engine.build_context("file_search", common, Some(p.pattern.clone()), started);
    Ok(engine.builder.build(summary, items, BTreeMap::new(), &ctx))
}

pub fn run_directory_search(
    engine: &SearchEngine,
    common: &CommonParams,
    params: &Value,
    cancel: &CancellationToken,
) -> ToolResult<ToolResponse> {
    let started = Instant::now();
    let p: DirectorySearchParams = parse_params(params)?;
    engine.require_index()?;
    validate_glob(&p.pattern)?;
    ensure_not_cancelled(cancel)?;

    let matches = engine
        .store
        .search_directories(
            &p.pattern,
            p.include_hidden,
            &engine.settings.indexing.excluded_dirs,
            p.max_results,
        )
        .map_err(|e| match e {
            crate::error::StorageError::Glob { pattern, reason } => {
                ToolError::InvalidPattern { pattern, reason }
            }
            other => ToolError::Storage(other),
        })?;

    let items: Vec<Value> = matches
        .iter()
        .map(|d| serde_json::to_value(d).unwrap_or_default())
        .collect();
    let summary = format!(
        "{} director{} matching '{}'",
        matches.len(),
        if matches.len() == 1 { "y" } else { "ies" },
        p.pattern
    );
    let ctx = engine.build_context("directory_search", common, Some(p.pattern.clone()), started);
    Ok(engine.builder.build(summary, items, BTreeMap::new(), &ctx))
}

pub fn run_recent_files(
    engine: &SearchEngine,
    common: &CommonParams,
    params: &Value,
    cancel: &CancellationToken,
) -> ToolResult<ToolResponse> {
    let started = Instant::now();
    let p: RecentFilesParams = parse_params(params)?;
    engine.require_index()?;
    ensure_not_cancelled(cancel)?;

    let window_secs = parse_time_frame(&p.time_frame)?;
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    let cutoff = now - window_secs;

    let files = engine
        .store
        .recent_files(cutoff, p.max_results, p.extensions.as_deref())?;

    let items: Vec<Value> = files.iter().map(file_item).collect();
    let summary = format!(
        "{} file{} modified in the last {}",
        files.len(),
        if files.len() == 1 { "" } else { "s" },
        p.time_frame
    );
    let mut extension_data = BTreeMap::new();
    extension_data.insert("cutoffEpoch".to_string(), json!(cutoff));
    let ctx = engine.build_context("recent_files", common, None, started);
    Ok(engine.builder.build(summary, items, extension_data, &ctx))
}

fn file_item(f: &FileRecord) -> Value {
    json!({
        "filePath": f.path,
        "language": f.language,
        "size": f.size,
        "lastModified": f.last_modified,
        "symbolCount": f.symbol_count,
    })
}

fn strip_content(mut f: FileRecord) -> FileRecord {
    f.content = None;
    f
}

fn validate_glob(pattern: &str) -> ToolResult<()> {
    if pattern.trim().is_empty() || pattern.chars().all(|c| c == '*') {
        return Err(ToolError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: "pattern must contain at least one literal character".to_string(),
        });
    }
    Ok(())
}

/// Parse a relative time window: `N{min|h|d|w}`.
pub fn parse_time_frame(frame: &str) -> ToolResult<i64> {
    let frame = frame.trim();
    let split = frame
        .find(|c: char| !c.is_ascii_digit())
        .filter(|&i| i > 0)
        .ok_or_else(|| ToolError::InvalidQuery {
            reason: format!("bad time frame '{frame}': expected N{{min|h|d|w}}"),
        })?;
    let (num, unit) = frame.split_at(split);
    let n: i64 = num.parse().map_err(|_| ToolError::InvalidQuery {
        reason: format!("bad time frame '{frame}'"),
    })?;
    let secs = match unit {
        "min" => 60,
        "h" => 3_600,
        "d" => 86_400,
        "w" => 604_800,
        other => {
            return Err(ToolError::InvalidQuery {
                reason: format!("unknown time unit '{other}': expected min, h, d or w"),
            });
        }
    };
    Ok(n * secs)
}
