//! Embedding service client.
//!
//! Embedding vectors are computed by an external service; this crate never
//! runs a model in-process. The service is an optional capability: callers
//! probe `is_available` and disable the vector tier when it is down.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::{ToolError, ToolResult};

/// Capability interface over the embedding service.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Embed one text into a fixed-dimension vector.
    async fn embed(&self, text: &str) -> ToolResult<Vec<f32>>;

    /// Cheap reachability probe.
    async fn is_available(&self) -> bool;

    /// Vector dimension the service produces.
    fn dim(&self) -> usize;
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

/// HTTP implementation: POST `{url}/embed` with `{"text": ...}`, expect
/// `{"embedding": [...]}`.
pub struct HttpEmbeddingClient {
    client: reqwest::Client,
    base_url: String,
    dimension: usize,
}

impl HttpEmbeddingClient {
    pub fn new(config: &EmbeddingConfig) -> ToolResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| ToolError::EmbeddingFailure {
                reason: e.to_string(),
            })?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            dimension: config.dimension,
        })
    }
}

#[async_trait]
impl EmbeddingClient for HttpEmbeddingClient {
    async fn embed(&self, text: &str) -> ToolResult<Vec<f32>> {
        let url = format!("{}/embed", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&EmbedRequest { text })
            .send()
            .await
            .map_err(|e| ToolError::EmbeddingFailure {
                reason: e.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(ToolError::EmbeddingFailure {
                reason: format!("service returned {}", response.status()),
            });
        }
        let body: EmbedResponse =
            response
                .json()
                .await
                .map_err(|e| ToolError::EmbeddingFailure {
                    reason: e.to_string(),
                })?;
        if body.embedding.len() != self.dimension {
            return Err(ToolError::EmbeddingFailure {
                reason: format!(
                    "expected dimension {}, got {}",
                    self.dimension,
                    body.embedding.len()
                ),
            });
        }
        Ok(body.embedding)
    }

    async fn is_available(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        matches!(
            self.client.get(&url).send().await,
            Ok(r) if r.status().is_success()
        )
    }

    fn dim(&self) -> usize {
        self.dimension
    }
}

/// Compose the text embedded for a symbol: `kind name signature? doc?`,
/// with comment markers stripped from the doc.
pub fn symbol_embedding_text(
    kind: &str,
    name: &str,
    signature: Option<&str>,
    doc_comment: Option<&str>,
) -> String {
    let mut text = format!("{kind} {name}");
    if let Some(sig) = signature {
        text.push(' ');
        text.push_str(sig);
    }
    if let Some(doc) = doc_comment {
        let cleaned = doc
            .lines()
            .map(|l| {
                l.trim_start()
                    .trim_start_matches("///")
                    .trim_start_matches("//")
                    .trim_start_matches("/*")
                    .trim_start_matches('*')
                    .trim_end_matches("*/")
                    .trim()
            })
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if !cleaned.is_empty() {
            text.push(' ');
            text.push_str(&cleaned);
        }
    }
    text
}

pub mod testing {
    //! Deterministic in-memory embedding fake for tests.

    use super::*;

    /// Hash-based fake: same text, same vector; no network.
    pub struct FakeEmbeddingClient {
        pub dimension: usize,
        pub available: bool,
    }

    impl FakeEmbeddingClient {
        pub fn new(dimension: usize) -> Self {
            Self {
                dimension,
                available: true,
            }
        }
    }

    #[async_trait]
    impl EmbeddingClient for FakeEmbeddingClient {
        async fn embed(&self, text: &str) -> ToolResult<Vec<f32>> {
            if !self.available {
                return Err(ToolError::EmbeddingFailure {
                    reason: "fake is offline".to_string(),
                });
            }
            let mut state: u64 = 0xcbf2_9ce4_8422_2325;
            let mut vector = Vec::with_capacity(self.dimension);
            for (i, b) in text.bytes().enumerate() {
                state = state.wrapping_mul(0x100_0000_01b3) ^ (b as u64) ^ (i as u64);
            }
            for i in 0..self.dimension {
                let x = state.wrapping_add((i as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15));
                vector.push(((x % 2000) as f32 / 1000.0) - 1.0);
            }
            Ok(vector)
        }

        async fn is_available(&self) -> bool {
            self.available
        }

        fn dim(&self) -> usize {
            self.dimension
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_text_strips_doc_markers() {
        let text = symbol_embedding_text(
            "function",
            "parse",
            Some("fn parse(input: &str) -> Ast"),
            Some("/// Parses the input.\n/// Returns the tree."),
        );
        assert_eq!(
            text,
            "function parse fn parse(input: &str) -> Ast Parses the input. Returns the tree."
        );
    }

    #[tokio::test]
    async fn fake_is_deterministic() {
        let fake = testing::FakeEmbeddingClient::new(8);
        let a = fake.embed("hello").await.unwrap();
        let b = fake.embed("hello").await.unwrap();
        let c = fake.embed("world").await.unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 8);
    }
}
