//! Resource store: expiring blobs for oversized result sets.
//!
//! When a response is truncated, the full result set is gzip-compressed
//! and written here; the envelope carries an opaque URI the caller can
//! fetch later. Writes run on a helper thread with a short timeout so a
//! slow disk can never stall the response path; on timeout the response
//! simply goes out truncated without a URI.

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::ResourceConfig;

const URI_SCHEME: &str = "codesearch://resources/";

/// On-disk expiring blob store for one workspace.
pub struct ResourceStore {
    dir: PathBuf,
    ttl: Duration,
    write_timeout: Duration,
}

impl ResourceStore {
    pub fn new(index_dir: &Path, config: &ResourceConfig) -> Self {
        Self {
            dir: index_dir.join("resources"),
            ttl: Duration::from_secs(config.ttl_secs),
            write_timeout: Duration::from_millis(config.write_timeout_ms),
        }
    }

    /// Store a blob under a category (e.g. "text_search"). Returns the
    /// retrieval URI, or None if the write failed or timed out.
    pub fn store(&self, category: &str, payload: &[u8]) -> Option<String> {
        let id = format!("{category}-{}", Uuid::new_v4());
        let path = self.dir.join(format!("{id}.gz"));
        let dir = self.dir.clone();
        let payload = payload.to_vec();
        let payload_len = payload.len();

        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let result = write_compressed(&dir, &path, &payload);
            let _ = tx.send(result);
        });

        match rx.recv_timeout(self.write_timeout) {
            Ok(Ok(())) => {
                debug!("stored resource {id} ({} bytes raw)", payload_len);
                Some(format!("{URI_SCHEME}{id}"))
            }
            Ok(Err(e)) => {
                warn!("resource store write failed: {e}");
                None
            }
            Err(_) => {
                warn!("resource store write timed out after {:?}", self.write_timeout);
                None
            }
        }
    }

    /// Fetch and decompress a blob by URI. Expired blobs read as None.
    pub fn fetch(&self, uri: &str) -> Option<Vec<u8>> {
        let id = uri.strip_prefix(URI_SCHEME)?;
        if id.contains('/') || id.contains("..") {
            return None;
        }
        let path = self.dir.join(format!("{id}.gz"));
        if self.is_expired(&path) {
            let _ = std::fs::remove_file(&path);
            return None;
        }
        let file = std::fs::File::open(&path).ok()?;
        let mut decoder = GzDecoder::new(file);
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).ok()?;
        Some(out)
    }

    /// Delete expired blobs. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return 0;
        };
        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if self.is_expired(&path) && std::fs::remove_file(&path).is_ok() {
                removed += 1;
            }
        }
        removed
    }

    fn is_expired(&self, path: &Path) -> bool {
        let Ok(meta) = std::fs::metadata(path) else {
            return true;
        };
        let Ok(modified) = meta.modified() else {
            return true;
        };
        SystemTime::now()
            .duration_since(modified)
            .map(|age| age > self.ttl)
            .unwrap_or(false)
    }
}

fn write_compressed(dir: &Path, path: &Path, payload: &[u8]) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let file = std::fs::File::create(path)?;
    let mut encoder = GzEncoder::new(file, Compression::fast());
    encoder.write_all(payload)?;
    encoder.finish()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(ttl_secs: u64) -> (ResourceStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let config = ResourceConfig {
            ttl_secs,
            write_timeout_ms: 2_000,
        };
        (ResourceStore::new(dir.path(), &config), dir)
    }

    #[test]
    fn store_and_fetch_round_trip() {
        let (store, _dir) = store(3600);
        let payload = br#"{"results": [1, 2, 3]}"#;
        let uri = store.store("text_search", payload).unwrap();
        assert!(uri.starts_with("codesearch://resources/text_search-"));
        assert_eq!(store.fetch(&uri).unwrap(), payload);
    }

    #[test]
    fn unknown_uri_reads_none() {
        let (store, _dir) = store(3600);
        assert!(store.fetch("codesearch://resources/nope").is_none());
        assert!(store.fetch("https://example.com/x").is_none());
        assert!(store.fetch("codesearch://resources/../escape").is_none());
    }

    #[test]
    fn expired_blobs_are_swept() {
        let (store, _dir) = store(0);
        let uri = store.store("cat", b"data").unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert!(store.fetch(&uri).is_none());
        // the fetch already removed it; sweep handles any leftovers
        assert_eq!(store.sweep(), 0);
    }

    #[test]
    fn compression_reduces_repetitive_payloads() {
        let (store, dir) = store(3600);
        let payload = "abcdef ".repeat(10_000);
        let uri = store.store("big", payload.as_bytes()).unwrap();
        let id = uri.strip_prefix(URI_SCHEME).unwrap();
        let on_disk = std::fs::metadata(dir.path().join("resources").join(format!("{id}.gz")))
            .unwrap()
            .len();
        assert!(on_disk < payload.len() as u64 / 2);
        assert_eq!(store.fetch(&uri).unwrap().len(), payload.len());
    }
}
