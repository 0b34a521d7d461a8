//! Core data model shared by the storage tiers, the indexer and the tools.
//!
//! Symbol and identifier kinds come from the external extractor as an open
//! tag set, so they are plain strings here rather than closed enums. Hit
//! side-band fields use a sum type for the known keys plus an open map for
//! anything else the extractor or classifier emits.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One row in `files`. The primary key is the workspace-relative path in
/// `/`-separated canonical form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    pub language: String,
    pub hash: String,
    pub size: i64,
    /// Last filesystem modification, epoch seconds.
    pub last_modified: i64,
    /// When the indexer last committed this file, epoch seconds.
    pub last_indexed: i64,
    /// Full text, present whenever the text tier indexed the file.
    pub content: Option<String>,
    pub symbol_count: i64,
}

/// A named program entity extracted from a file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Symbol {
    pub id: String,
    pub name: String,
    /// Open tag set: class, interface, struct, enum, function, method,
    /// field, property, variable, ...
    pub kind: String,
    pub language: String,
    pub file_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    pub start_line: u32,
    pub start_col: u32,
    pub end_line: u32,
    pub end_col: u32,
    #[serde(default)]
    pub start_byte: u32,
    #[serde(default)]
    pub end_byte: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
    /// Content hash of the file this symbol was extracted from. A mismatch
    /// against `files.hash` marks the symbol stale.
    #[serde(default)]
    pub file_hash: String,
}

fn default_confidence() -> f32 {
    1.0
}

/// A textual occurrence of a name, optionally resolved to a target symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identifier {
    pub id: String,
    pub name: String,
    /// Open tag set: call, member_access, variable_ref, type_ref, ...
    pub kind: String,
    pub language: String,
    pub file_path: String,
    pub start_line: u32,
    pub start_col: u32,
    pub end_line: u32,
    pub end_col: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub containing_symbol_id: Option<String>,
    /// Resolution is best-effort; None means unresolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_symbol_id: Option<String>,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_context: Option<String>,
}

/// Known side-band field keys on a search hit. Unknown keys travel in the
/// `extra` map and fan back out on serialization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HitField {
    ReferenceType,
    Kind,
    Language,
    TypeInfo,
    Resolved,
    CallDepth,
    IsEntryPoint,
    Reason,
}

impl HitField {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReferenceType => "referenceType",
            Self::Kind => "kind",
            Self::Language => "language",
            Self::TypeInfo => "typeInfo",
            Self::Resolved => "resolved",
            Self::CallDepth => "callDepth",
            Self::IsEntryPoint => "isEntryPoint",
            Self::Reason => "reason",
        }
    }
}

/// Per-query view of one match. Not persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub file_path: String,
    pub score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub context_lines: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_line: Option<u32>,
    /// Known + open side-band fields, serialized as one string map.
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub fields: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<i64>,
}

impl SearchHit {
    pub fn new(file_path: impl Into<String>, score: f32) -> Self {
        Self {
            file_path: file_path.into(),
            score,
            ..Default::default()
        }
    }

    pub fn set_field(&mut self, key: HitField, value: impl Into<String>) {
        self.fields.insert(key.as_str().to_string(), value.into());
    }

    pub fn field(&self, key: HitField) -> Option<&str> {
        self.fields.get(key.as_str()).map(String::as_str)
    }
}

/// Derived directory view, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryMatch {
    pub path: String,
    pub depth: usize,
    pub file_count: usize,
    pub subdirectory_count: usize,
    pub hidden: bool,
}

/// Symbol embedding row: fixed-dimension vector keyed by symbol id.
#[derive(Debug, Clone)]
pub struct SymbolEmbedding {
    pub symbol_id: String,
    pub vector: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_fields_round_trip_through_the_map() {
        let mut hit = SearchHit::new("src/lib.rs", 1.5);
        hit.set_field(HitField::ReferenceType, "call");
        hit.set_field(HitField::Resolved, "true");
        assert_eq!(hit.field(HitField::ReferenceType), Some("call"));

        let json = serde_json::to_value(&hit).unwrap();
        assert_eq!(json["fields"]["referenceType"], "call");
        assert_eq!(json["filePath"], "src/lib.rs");
    }

    #[test]
    fn symbol_deserializes_with_defaults() {
        let json = r#"{
            "id": "s1", "name": "foo", "kind": "function", "language": "python",
            "file_path": "a.py", "start_line": 1, "start_col": 0,
            "end_line": 2, "end_col": 0
        }"#;
        let sym: Symbol = serde_json::from_str(json).unwrap();
        assert_eq!(sym.confidence, 1.0);
        assert!(sym.parent_id.is_none());
    }
}
