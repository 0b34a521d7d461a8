//! Response cache: fingerprint of (tool, parameters) to a finished
//! envelope.
//!
//! Entries carry a TTL and a priority tier (responses that summarize many
//! hits are more expensive to recompute, so they evict last). Within the
//! memory bound, eviction is least-recently-used among the lowest
//! priority tier. Any indexer write invalidates the whole workspace cache.

use parking_lot::Mutex;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::CacheConfig;
use crate::response::envelope::ToolResponse;

/// Priority tier; larger evicts later.
fn priority_for(total_hits: usize) -> u8 {
    match total_hits {
        0..=10 => 0,
        11..=100 => 1,
        _ => 2,
    }
}

struct CacheEntry {
    response: ToolResponse,
    expires: Instant,
    last_access: Instant,
    priority: u8,
    size: usize,
}

/// Per-workspace response cache.
pub struct ResponseCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
    max_bytes: usize,
}

impl ResponseCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl: Duration::from_secs(config.ttl_secs),
            max_bytes: config.max_bytes,
        }
    }

    /// Deterministic fingerprint for a tool invocation.
    pub fn key(tool: &str, params: &Value) -> String {
        let canonical = canonical_json(params);
        let digest = Sha256::digest(format!("{tool}\u{0}{canonical}").as_bytes());
        digest.iter().take(16).map(|b| format!("{b:02x}")).collect()
    }

    /// Fetch a live entry; expired entries are dropped on access.
    pub fn get(&self, key: &str) -> Option<ToolResponse> {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        match entries.get_mut(key) {
            Some(entry) if entry.expires > now => {
                entry.last_access = now;
                Some(entry.response.clone())
            }
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Store a successful response. Failures are never cached.
    pub fn put(&self, key: String, response: ToolResponse, total_hits: usize) {
        if !response.success {
            return;
        }
        let size = serde_json::to_string(&response).map(|s| s.len()).unwrap_or(0);
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.insert(
            key,
            CacheEntry {
                response,
                expires: now + self.ttl,
                last_access: now,
                priority: priority_for(total_hits),
                size,
            },
        );
        Self::enforce_bound(&mut entries, self.max_bytes);
    }

    /// Drop everything; called on any workspace write.
    pub fn invalidate_all(&self) {
        let mut entries = self.entries.lock();
        if !entries.is_empty() {
            debug!("invalidating {} cached responses", entries.len());
            entries.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn enforce_bound(entries: &mut HashMap<String, CacheEntry>, max_bytes: usize) {
        let mut total: usize = entries.values().map(|e| e.size).sum();
        while total > max_bytes && !entries.is_empty() {
            // evict lowest priority, then least recently used
            let victim = entries
                .iter()
                .min_by_key(|(_, e)| (e.priority, e.last_access))
                .map(|(k, _)| k.clone());
            match victim {
                Some(key) => {
                    if let Some(removed) = entries.remove(&key) {
                        total -= removed.size;
                    }
                }
                None => break,
            }
        }
    }
}

/// Stable serialization: objects sorted by key at every level.
fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let inner: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{}:{}", k, canonical_json(&map[k])))
                .collect();
            format!("{{{}}}", inner.join(","))
        }
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", inner.join(","))
        }
        other => other.to_string(),
    }
}
