//! Multi-factor re-ranking over base text-index scores.
//!
//! Each hit's final score is `base * product(factors)`. Factors are
//! independent multipliers, so applying them in any order yields the same
//! score for the same multiset of factors.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::storage::TextHit;

/// Languages we consider "code" for the file-type factor.
const CODE_EXTENSIONS: &[&str] = &[
    "rs", "py", "ts", "tsx", "js", "jsx", "go", "java", "kt", "cs", "c", "h", "cpp", "hpp", "rb",
    "php", "swift", "scala", "lua",
];
const DATA_EXTENSIONS: &[&str] = &[
    "json", "yaml", "yml", "toml", "xml", "ini", "cfg", "lock", "csv", "md", "txt",
];

const TEST_PATH_SEGMENTS: &[&str] = &["/test/", "/tests/", "/spec/", "/fixtures/", "/__tests__/"];
const MOCK_MARKERS: &[&str] = &["mock", "fake", "stub"];

/// Query-derived context shared across all hits of one search.
#[derive(Debug, Clone)]
pub struct ScoreContext {
    query: String,
    tokens: Vec<String>,
    case_sensitive: bool,
    /// Queries about tests keep test paths at full weight.
    about_tests: bool,
    /// PascalCase single-token queries are treated as type names.
    type_query: bool,
    now_epoch: u64,
}

impl ScoreContext {
    pub fn new(query: &str, case_sensitive: bool) -> Self {
        let tokens: Vec<String> = query
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|t| t.len() >= 2)
            .map(|t| t.to_lowercase())
            .collect();
        let about_tests = tokens.iter().any(|t| t == "test" || t == "tests" || t == "spec");
        let type_query = query.split_whitespace().count() == 1
            && query.chars().next().is_some_and(|c| c.is_uppercase())
            && query.chars().any(|c| c.is_lowercase());
        Self {
            query: query.to_string(),
            tokens,
            case_sensitive,
            about_tests,
            type_query,
            now_epoch: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
        }
    }

    #[cfg(test)]
    fn with_now(mut self, now_epoch: u64) -> Self {
        self.now_epoch = now_epoch;
        self
    }

    /// Final score for a hit.
    pub fn score(&self, hit: &TextHit) -> f32 {
        hit.score
            * self.path_relevance(&hit.path)
            * self.filename_relevance(&hit.path)
            * self.file_type_relevance(&hit.path)
            * self.recency_boost(hit.last_modified)
            * self.exact_match_boost(hit.content.as_deref())
            * self.interface_implementation(&hit.path, hit.content.as_deref())
    }

    /// Re-rank hits in place, best first. Ties break on path for a stable
    /// order across runs.
    pub fn rerank(&self, hits: &mut [TextHit]) {
        for hit in hits.iter_mut() {
            hit.score = self.score(hit);
        }
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.path.cmp(&b.path))
        });
    }

    fn path_relevance(&self, path: &str) -> f32 {
        if self.about_tests {
            return 1.0;
        }
        let slashed = format!("/{}/", path.trim_matches('/'));
        if TEST_PATH_SEGMENTS.iter().any(|seg| slashed.contains(seg)) {
            0.5
        } else {
            1.0
        }
    }

    fn filename_relevance(&self, path: &str) -> f32 {
        let stem = path
            .rsplit('/')
            .next()
            .and_then(|name| name.split('.').next())
            .unwrap_or("")
            .to_lowercase();
        if !stem.is_empty() && self.tokens.iter().any(|t| stem.contains(t.as_str())) {
            1.6
        } else {
            1.0
        }
    }

    fn file_type_relevance(&self, path: &str) -> f32 {
        let ext = path.rsplit('.').next().unwrap_or("").to_lowercase();
        if CODE_EXTENSIONS.contains(&ext.as_str()) {
            1.2
        } else if DATA_EXTENSIONS.contains(&ext.as_str()) {
            0.8
        } else {
            1.0
        }
    }

    /// Monotone in `last_modified`, capped at 1.3.
    fn recency_boost(&self, last_modified: u64) -> f32 {
        let age_secs = self.now_epoch.saturating_sub(last_modified);
        const DAY: u64 = 86_400;
        match age_secs {
            a if a < DAY => 1.3,
            a if a < 7 * DAY => 1.15,
            a if a < 30 * DAY => 1.05,
            _ => 1.0,
        }
    }

    fn exact_match_boost(&self, content: Option<&str>) -> f32 {
        let Some(content) = content else { return 1.0 };
        if self.query.is_empty() {
            return 1.0;
        }
        let found = if self.case_sensitive {
            content.contains(&self.query)
        } else {
            content.to_lowercase().contains(&self.query.to_lowercase())
        };
        if found { 2.0 } else { 1.0 }
    }

    /// Deboost documents dominated by mock/fake implementations when the
    /// query names a type.
    fn interface_implementation(&self, path: &str, content: Option<&str>) -> f32 {
        if !self.type_query {
            return 1.0;
        }
        let name = path.rsplit('/').next().unwrap_or("").to_lowercase();
        if MOCK_MARKERS.iter().any(|m| name.contains(m)) {
            return 0.6;
        }
        if let Some(content) = content {
            let lowered = content.to_lowercase();
            let mock_mentions: usize = MOCK_MARKERS
                .iter()
                .map(|m| lowered.matches(m).count())
                .sum();
            if mock_mentions >= 5 {
                return 0.7;
            }
        }
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(path: &str, score: f32, content: &str, mtime: u64) -> TextHit {
        TextHit {
            path: path.to_string(),
            score,
            line: None,
            context_lines: Vec::new(),
            snippet: None,
            type_names: Vec::new(),
            last_modified: mtime,
            content: Some(content.to_string()),
        }
    }

    #[test]
    fn test_paths_are_deboosted_unless_query_mentions_tests() {
        let ctx = ScoreContext::new("parser", false).with_now(0);
        assert!(ctx.score(&hit("src/tests/parser.rs", 1.0, "", 0))
            < ctx.score(&hit("src/parser.rs", 1.0, "", 0)));

        let test_ctx = ScoreContext::new("parser test", false).with_now(0);
        let a = test_ctx.score(&hit("src/tests/x.rs", 1.0, "", 0));
        let b = test_ctx.score(&hit("src/x.rs", 1.0, "", 0));
        assert!((a - b).abs() < 1e-6);
    }

    #[test]
    fn filename_match_beats_plain_content_match() {
        let ctx = ScoreContext::new("watcher", false).with_now(0);
        assert!(ctx.score(&hit("src/watcher.rs", 1.0, "", 0))
            > ctx.score(&hit("src/other.rs", 1.0, "", 0)));
    }

    #[test]
    fn exact_phrase_doubles_score() {
        let ctx = ScoreContext::new("hello world", false).with_now(0);
        let exact = ctx.score(&hit("a.md", 1.0, "say hello world now", 0));
        let partial = ctx.score(&hit("b.md", 1.0, "hello there world", 0));
        assert!((exact / partial - 2.0).abs() < 1e-4);
    }

    #[test]
    fn case_sensitivity_gates_exact_match() {
        let cs = ScoreContext::new("Hello", true).with_now(0);
        assert!((cs.exact_match_boost(Some("say hello")) - 1.0).abs() < 1e-6);
        let ci = ScoreContext::new("Hello", false).with_now(0);
        assert!((ci.exact_match_boost(Some("say hello")) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn recency_is_monotone_and_capped() {
        let now = 100 * 86_400;
        let ctx = ScoreContext::new("x", false).with_now(now);
        let fresh = ctx.recency_boost(now - 100);
        let week = ctx.recency_boost(now - 3 * 86_400);
        let stale = ctx.recency_boost(0);
        assert!(fresh >= week && week >= stale);
        assert!(fresh <= 1.3);
    }

    #[test]
    fn mock_files_are_deboosted_for_type_queries() {
        let ctx = ScoreContext::new("UserService", false).with_now(0);
        assert!(ctx.score(&hit("src/mock_user_service.rs", 1.0, "", 0))
            < ctx.score(&hit("src/user_service.rs", 1.0, "", 0)));

        // not a type query: mocks keep full weight
        let plain = ScoreContext::new("userservice", false).with_now(0);
        let a = plain.interface_implementation("src/mock_x.rs", None);
        assert!((a - 1.0).abs() < 1e-6);
    }

    #[test]
    fn rerank_orders_descending_with_stable_ties() {
        let ctx = ScoreContext::new("zed", false).with_now(0);
        let mut hits = vec![
            hit("b.xyz", 1.0, "", 0),
            hit("a.xyz", 1.0, "", 0),
            hit("c.xyz", 5.0, "", 0),
        ];
        ctx.rerank(&mut hits);
        assert_eq!(hits[0].path, "c.xyz");
        assert_eq!(hits[1].path, "a.xyz");
        assert_eq!(hits[2].path, "b.xyz");
    }
}
