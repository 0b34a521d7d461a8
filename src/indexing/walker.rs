//! Workspace traversal for the initial crawl.
//!
//! Built on `ignore::WalkBuilder` so `.gitignore` rules apply, with three
//! additional gates: excluded directory names, a file-size cap, and a
//! binary-content sniff.

use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::config::Settings;

/// Bytes sniffed from the head of each file for the binary check.
const SNIFF_BYTES: usize = 8_192;

/// Why a file was left out of the crawl.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    TooLarge,
    Binary,
    Unreadable,
}

/// Walks a workspace and yields indexable files.
pub struct WorkspaceWalker {
    settings: Arc<Settings>,
}

impl WorkspaceWalker {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self { settings }
    }

    /// All files under `root` that pass the gates, in path order.
    pub fn walk(&self, root: &Path) -> Vec<PathBuf> {
        let excluded = &self.settings.indexing.excluded_dirs;
        let max_size = self.settings.indexing.max_file_size;

        let mut builder = WalkBuilder::new(root);
        builder
            .hidden(true)
            .git_ignore(true)
            .git_global(false)
            .git_exclude(true)
            .follow_links(false)
            .require_git(false);

        let excluded_owned = excluded.clone();
        builder.filter_entry(move |entry| {
            let name = entry.file_name().to_string_lossy();
            !excluded_owned.iter().any(|d| d == name.as_ref())
        });

        let mut files: Vec<PathBuf> = builder
            .build()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_some_and(|t| t.is_file()))
            .filter_map(|e| {
                let path = e.path().to_path_buf();
                match eligibility(&path, max_size) {
                    Ok(()) => Some(path),
                    Err(reason) => {
                        debug!("skipping {} ({reason:?})", path.display());
                        None
                    }
                }
            })
            .collect();
        files.sort();
        files
    }

    /// Count without collecting, for dry runs.
    pub fn count(&self, root: &Path) -> usize {
        self.walk(root).len()
    }
}

/// Size and binary gates for a single file. Used by both the crawl and the
/// watcher so incremental updates obey the same rules.
pub fn eligibility(path: &Path, max_size: u64) -> Result<(), SkipReason> {
    let meta = std::fs::metadata(path).map_err(|_| SkipReason::Unreadable)?;
    if meta.len() > max_size {
        return Err(SkipReason::TooLarge);
    }
    let mut head = vec![0u8; SNIFF_BYTES.min(meta.len() as usize)];
    if !head.is_empty() {
        use std::io::Read;
        let mut f = std::fs::File::open(path).map_err(|_| SkipReason::Unreadable)?;
        let n = f.read(&mut head).map_err(|_| SkipReason::Unreadable)?;
        head.truncate(n);
        if looks_binary(&head) {
            return Err(SkipReason::Binary);
        }
    }
    Ok(())
}

/// NUL byte in the head means binary.
fn looks_binary(head: &[u8]) -> bool {
    head.contains(&0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn settings() -> Arc<Settings> {
        Arc::new(Settings::default())
    }

    #[test]
    fn finds_files_and_skips_excluded_dirs() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("src")).unwrap();
        std::fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        std::fs::create_dir_all(root.join(".git")).unwrap();
        std::fs::write(root.join("src/main.rs"), "fn main() {}").unwrap();
        std::fs::write(root.join("node_modules/pkg/index.js"), "x").unwrap();
        std::fs::write(root.join(".git/config"), "x").unwrap();

        let files = WorkspaceWalker::new(settings()).walk(root);
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("src/main.rs"));
    }

    #[test]
    fn binary_and_oversized_files_are_skipped() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        std::fs::write(root.join("ok.txt"), "plain text").unwrap();
        std::fs::write(root.join("blob.bin"), b"abc\x00def").unwrap();
        std::fs::write(root.join("huge.txt"), "x".repeat(64)).unwrap();

        let mut s = Settings::default();
        s.indexing.max_file_size = 32;
        let files = WorkspaceWalker::new(Arc::new(s)).walk(root);
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("ok.txt"));
    }

    #[test]
    fn gitignore_is_respected() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        std::fs::write(root.join(".gitignore"), "generated.rs\n").unwrap();
        std::fs::write(root.join("generated.rs"), "x").unwrap();
        std::fs::write(root.join("kept.rs"), "x").unwrap();

        let files = WorkspaceWalker::new(settings()).walk(root);
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("kept.rs"));
    }

    #[test]
    fn eligibility_reports_reason() {
        let dir = TempDir::new().unwrap();
        let p = dir.path().join("b.bin");
        std::fs::write(&p, b"\x00").unwrap();
        assert_eq!(eligibility(&p, 1024), Err(SkipReason::Binary));
        assert_eq!(
            eligibility(&dir.path().join("absent"), 1024),
            Err(SkipReason::Unreadable)
        );
    }
}
