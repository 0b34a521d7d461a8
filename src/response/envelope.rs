//! Response envelope: the structured shape every tool returns.
//!
//! Field names are part of the protocol contract and serialize in
//! camelCase exactly as consumers expect.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::ToolError;

/// How much detail the caller wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    Summary,
    Full,
    #[default]
    Adaptive,
}

/// The full response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResponse {
    pub success: bool,
    pub data: ResponseData,
    pub insights: Vec<String>,
    pub actions: Vec<ActionItem>,
    pub meta: ResponseMeta,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseData {
    pub summary: String,
    /// Tool-specific result items.
    pub results: Vec<Value>,
    /// Total matches before reduction.
    pub count: usize,
    #[serde(rename = "extensionData", skip_serializing_if = "BTreeMap::is_empty", default)]
    pub extension_data: BTreeMap<String, Value>,
}

/// A suggested follow-up operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionItem {
    pub action: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    pub priority: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<BTreeMap<String, Value>>,
}

impl ActionItem {
    pub fn new(action: &str, description: impl Into<String>, priority: i32) -> Self {
        Self {
            action: action.to_string(),
            description: description.into(),
            rationale: None,
            priority,
            parameters: None,
        }
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = Some(rationale.into());
        self
    }

    pub fn with_parameter(mut self, key: &str, value: Value) -> Self {
        self.parameters
            .get_or_insert_with(BTreeMap::new)
            .insert(key.to_string(), value);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMeta {
    /// Execution time, e.g. "12ms".
    pub execution_time: String,
    pub truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_uri: Option<String>,
    pub token_info: TokenInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenInfo {
    pub estimated: usize,
    pub limit: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reduction_strategy: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery: Option<Recovery>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recovery {
    pub steps: Vec<String>,
}

impl ToolResponse {
    /// Fold an error into a `success=false` envelope; errors never cross
    /// the tool boundary as panics or raw results.
    pub fn from_error(error: &ToolError, limit: usize, elapsed_ms: u64) -> Self {
        let steps = error.recovery_steps();
        let envelope_error = ErrorInfo {
            code: error.code().to_string(),
            message: error.to_string(),
            recovery: if steps.is_empty() {
                None
            } else {
                Some(Recovery { steps })
            },
        };
        Self {
            success: false,
            data: ResponseData {
                summary: error.to_string(),
                results: Vec::new(),
                count: 0,
                extension_data: BTreeMap::new(),
            },
            insights: Vec::new(),
            actions: Vec::new(),
            meta: ResponseMeta {
                execution_time: format!("{elapsed_ms}ms"),
                truncated: false,
                resource_uri: None,
                token_info: TokenInfo {
                    estimated: 0,
                    limit,
                    reduction_strategy: None,
                },
            },
            error: Some(envelope_error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_serializes_contract_field_names() {
        let response = ToolResponse {
            success: true,
            data: ResponseData {
                summary: "ok".into(),
                results: vec![serde_json::json!({"filePath": "a.rs"})],
                count: 1,
                extension_data: BTreeMap::new(),
            },
            insights: vec!["one hit".into()],
            actions: vec![ActionItem::new("goto_definition", "jump", 1)],
            meta: ResponseMeta {
                execution_time: "3ms".into(),
                truncated: false,
                resource_uri: None,
                token_info: TokenInfo {
                    estimated: 10,
                    limit: 100,
                    reduction_strategy: None,
                },
            },
            error: None,
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["meta"]["executionTime"], "3ms");
        assert_eq!(json["meta"]["tokenInfo"]["estimated"], 10);
        assert!(json["data"]["extensionData"].is_null() || json["data"].get("extensionData").is_none());
        assert_eq!(json["data"]["count"], 1);
        assert!(json.get("error").is_none());
    }

    #[test]
    fn error_envelope_carries_code_and_recovery() {
        let err = ToolError::IndexMissing {
            workspace: "/ws".into(),
        };
        let response = ToolResponse::from_error(&err, 500, 2);
        assert!(!response.success);
        let e = response.error.unwrap();
        assert_eq!(e.code, "INDEX_MISSING");
        assert!(!e.recovery.unwrap().steps.is_empty());
    }
}
