//! Query preprocessing: classify a raw query string, pick the target
//! field, and sanitize wildcards before anything reaches the text index.

use regex::Regex;
use std::sync::LazyLock;

use crate::error::{ToolError, ToolResult};

/// Caller-declared search mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    #[default]
    Auto,
    Standard,
    Symbol,
    Pattern,
    Fuzzy,
}

/// Text-index field a query is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetField {
    Content,
    ContentSymbols,
    ContentPatterns,
}

/// Preprocessing outcome.
#[derive(Debug, Clone)]
pub struct ProcessedQuery {
    pub processed: String,
    pub target: TargetField,
    pub detected: QueryMode,
    pub reason: &'static str,
}

/// Punctuation that flips Auto mode into Pattern.
const PATTERN_CHARS: &str = "{}()[]<>\"':;,.!@#$%^&*+=|\\~`";

static IDENTIFIER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier regex"));
static CAMEL_CASE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z]+[A-Z][A-Za-z0-9]*$|^(?:[A-Z][a-z0-9]+){2,}$").expect("camel regex"));
static KEYWORD_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(class|interface|method|function|def|var|let|const)\s+([A-Za-z_][A-Za-z0-9_]*)$")
        .expect("keyword regex")
});

/// Classify and sanitize a query. Rules, in order: empty handling,
/// wildcard validation, mode detection (for Auto), keyword stripping for
/// Symbol, Fuzzy downgrade.
pub fn preprocess(query: &str, mode: QueryMode) -> ToolResult<ProcessedQuery> {
    let trimmed = query.trim();

    if trimmed.is_empty() {
        return Ok(ProcessedQuery {
            processed: String::new(),
            target: TargetField::Content,
            detected: QueryMode::Standard,
            reason: "empty query",
        });
    }

    let sanitized = sanitize_wildcards(trimmed)?;

    let (detected, reason) = match mode {
        QueryMode::Auto => detect_mode(&sanitized),
        QueryMode::Fuzzy => (QueryMode::Standard, "fuzzy not supported"),
        explicit => (explicit, "explicit mode"),
    };

    let (processed, target) = match detected {
        QueryMode::Symbol => (strip_symbol_keywords(&sanitized), TargetField::ContentSymbols),
        QueryMode::Pattern => (sanitized, TargetField::ContentPatterns),
        _ => (sanitized, TargetField::Content),
    };

    Ok(ProcessedQuery {
        processed,
        target,
        detected,
        reason,
    })
}

/// Reject pure-wildcard queries; strip leading `*` when anchoring text
/// follows.
fn sanitize_wildcards(query: &str) -> ToolResult<String> {
    if query.chars().all(|c| c == '*') {
        return Err(ToolError::InvalidQuery {
            reason: "query contains only wildcards".to_string(),
        });
    }
    if query.starts_with('*') {
        let rest = query.trim_start_matches('*');
        if rest.is_empty() {
            return Err(ToolError::InvalidQuery {
                reason: "query contains only wildcards".to_string(),
            });
        }
        return Ok(rest.to_string());
    }
    Ok(query.to_string())
}

fn detect_mode(query: &str) -> (QueryMode, &'static str) {
    if query.chars().any(|c| PATTERN_CHARS.contains(c)) {
        return (QueryMode::Pattern, "punctuation detected");
    }
    if KEYWORD_NAME_RE.is_match(query) {
        return (QueryMode::Symbol, "language keyword prefix");
    }
    if query.split_whitespace().count() == 1
        && (IDENTIFIER_RE.is_match(query) || CAMEL_CASE_RE.is_match(query))
        && looks_like_symbol(query)
    {
        return (QueryMode::Symbol, "identifier shape");
    }
    (QueryMode::Standard, "default")
}

/// Plain lowercase dictionary-looking words go to standard search; an
/// identifier shape needs an underscore, mixed case, or a digit.
fn looks_like_symbol(word: &str) -> bool {
    word.contains('_')
        || word.chars().any(|c| c.is_ascii_digit())
        || (word.chars().any(|c| c.is_uppercase()) && word.chars().any(|c| c.is_lowercase()))
        || word.len() >= 3 && word.chars().next().is_some_and(|c| c.is_uppercase())
}

fn strip_symbol_keywords(query: &str) -> String {
    if let Some(caps) = KEYWORD_NAME_RE.captures(query) {
        return caps[2].to_string();
    }
    query.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_query_is_standard() {
        let p = preprocess("   ", QueryMode::Auto).unwrap();
        assert_eq!(p.detected, QueryMode::Standard);
        assert_eq!(p.target, TargetField::Content);
        assert_eq!(p.reason, "empty query");
    }

    #[test]
    fn pure_wildcard_is_rejected() {
        assert!(preprocess("*", QueryMode::Auto).is_err());
        assert!(preprocess("***", QueryMode::Auto).is_err());
    }

    #[test]
    fn leading_wildcard_is_stripped() {
        let p = preprocess("*Handler", QueryMode::Auto).unwrap();
        assert_eq!(p.processed, "Handler");
    }

    #[test]
    fn punctuation_routes_to_pattern_field() {
        let p = preprocess("foo(bar)", QueryMode::Auto).unwrap();
        assert_eq!(p.detected, QueryMode::Pattern);
        assert_eq!(p.target, TargetField::ContentPatterns);
    }

    #[test]
    fn identifier_routes_to_symbol_field() {
        let p = preprocess("parse_query", QueryMode::Auto).unwrap();
        assert_eq!(p.detected, QueryMode::Symbol);
        assert_eq!(p.target, TargetField::ContentSymbols);

        let p = preprocess("QueryParser", QueryMode::Auto).unwrap();
        assert_eq!(p.detected, QueryMode::Symbol);
    }

    #[test]
    fn keyword_prefix_is_stripped() {
        let p = preprocess("class UserService", QueryMode::Auto).unwrap();
        assert_eq!(p.detected, QueryMode::Symbol);
        assert_eq!(p.processed, "UserService");

        let p = preprocess("def handle_event", QueryMode::Auto).unwrap();
        assert_eq!(p.processed, "handle_event");
    }

    #[test]
    fn prose_stays_standard() {
        let p = preprocess("error handling retry", QueryMode::Auto).unwrap();
        assert_eq!(p.detected, QueryMode::Standard);
        assert_eq!(p.target, TargetField::Content);
    }

    #[test]
    fn fuzzy_downgrades_to_standard() {
        let p = preprocess("anything", QueryMode::Fuzzy).unwrap();
        assert_eq!(p.detected, QueryMode::Standard);
        assert_eq!(p.reason, "fuzzy not supported");
    }

    #[test]
    fn explicit_mode_wins_over_detection() {
        let p = preprocess("plainword", QueryMode::Symbol).unwrap();
        assert_eq!(p.detected, QueryMode::Symbol);
        assert_eq!(p.target, TargetField::ContentSymbols);
    }
}
