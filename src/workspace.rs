//! Workspace identity and on-disk index layout.
//!
//! A workspace is a root source directory. Its identity is a short hash of
//! the unresolved absolute path, so two processes pointing at the same
//! directory agree on the layout without resolving symlinks differently.
//!
//! Layout per workspace:
//!
//! ```text
//! <index_root>/<hash>/db/workspace.db   structured store (+ WAL files)
//! <index_root>/<hash>/tantivy/          text index segments
//! ```

use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};

use crate::error::{ToolError, ToolResult};

/// Resolved identity and paths for one workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceLayout {
    /// Absolute, lexically normalized workspace root. Symlinks are not
    /// resolved so the hash is stable across callers.
    pub canonical_path: PathBuf,
    /// 16 hex digits of SHA-256 over the canonical path.
    pub hash: String,
    /// `<index_root>/<hash>`
    pub index_dir: PathBuf,
    /// `<index_root>/<hash>/db/workspace.db`
    pub db_path: PathBuf,
    /// `<index_root>/<hash>/tantivy`
    pub text_index_dir: PathBuf,
}

impl WorkspaceLayout {
    /// Resolve a workspace directory into its identity and index paths.
    ///
    /// Fails with `WorkspaceMissing` when the directory does not exist.
    pub fn resolve(index_root: &Path, workspace: &Path) -> ToolResult<Self> {
        if !workspace.is_dir() {
            return Err(ToolError::WorkspaceMissing {
                path: workspace.to_path_buf(),
            });
        }
        let canonical_path = absolute_normalized(workspace);
        let hash = workspace_hash(&canonical_path);
        let index_dir = index_root.join(&hash);
        Ok(Self {
            db_path: index_dir.join("db").join("workspace.db"),
            text_index_dir: index_dir.join("tantivy"),
            canonical_path,
            hash,
            index_dir,
        })
    }

    /// Whether an index has been created on disk for this workspace.
    pub fn index_exists(&self) -> bool {
        self.db_path.is_file()
    }

    /// Create the db/ and tantivy/ directories.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.db_path.parent().expect("db path has parent"))?;
        std::fs::create_dir_all(&self.text_index_dir)
    }

    /// Convert an absolute file path into the workspace-relative
    /// `/`-separated form used as the `files` primary key.
    pub fn relative_unix_path(&self, path: &Path) -> Option<String> {
        let normalized = absolute_normalized(path);
        let rel = normalized.strip_prefix(&self.canonical_path).ok()?;
        let mut out = String::new();
        for comp in rel.components() {
            if let Component::Normal(seg) = comp {
                if !out.is_empty() {
                    out.push('/');
                }
                out.push_str(&seg.to_string_lossy());
            }
        }
        if out.is_empty() { None } else { Some(out) }
    }

    /// Rebuild an absolute native path from a stored relative one.
    pub fn absolute_path(&self, relative: &str) -> PathBuf {
        let mut p = self.canonical_path.clone();
        for seg in relative.split('/') {
            p.push(seg);
        }
        p
    }
}

/// Deterministic workspace hash: first 16 hex digits of SHA-256 over the
/// `/`-separated canonical path string.
pub fn workspace_hash(canonical: &Path) -> String {
    let as_unix = canonical
        .to_string_lossy()
        .replace(std::path::MAIN_SEPARATOR, "/");
    let digest = Sha256::digest(as_unix.as_bytes());
    let mut out = String::with_capacity(16);
    for byte in &digest[..8] {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Make a path absolute and strip `.` / `..` components lexically,
/// without touching the filesystem (and so without following symlinks).
fn absolute_normalized(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("/"))
            .join(path)
    };
    let mut out = PathBuf::new();
    for comp in absolute.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_workspace_is_rejected() {
        let root = TempDir::new().unwrap();
        let err = WorkspaceLayout::resolve(root.path(), Path::new("/does/not/exist")).unwrap_err();
        assert_eq!(err.code(), "WORKSPACE_MISSING");
    }

    #[test]
    fn hash_is_deterministic_and_short() {
        let a = workspace_hash(Path::new("/home/dev/project"));
        let b = workspace_hash(Path::new("/home/dev/project"));
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert_ne!(a, workspace_hash(Path::new("/home/dev/other")));
    }

    #[test]
    fn layout_paths_nest_under_hash() {
        let index_root = TempDir::new().unwrap();
        let ws = TempDir::new().unwrap();
        let layout = WorkspaceLayout::resolve(index_root.path(), ws.path()).unwrap();
        assert!(layout.db_path.ends_with("db/workspace.db"));
        assert!(layout.text_index_dir.ends_with("tantivy"));
        assert!(layout.db_path.starts_with(&layout.index_dir));
        assert!(!layout.index_exists());
    }

    #[test]
    fn relative_paths_use_forward_slashes() {
        let index_root = TempDir::new().unwrap();
        let ws = TempDir::new().unwrap();
        std::fs::create_dir_all(ws.path().join("src/core")).unwrap();
        std::fs::write(ws.path().join("src/core/mod.rs"), "x").unwrap();

        let layout = WorkspaceLayout::resolve(index_root.path(), ws.path()).unwrap();
        let rel = layout
            .relative_unix_path(&ws.path().join("src/core/mod.rs"))
            .unwrap();
        assert_eq!(rel, "src/core/mod.rs");
        assert_eq!(
            layout.absolute_path(&rel),
            super::absolute_normalized(&ws.path().join("src/core/mod.rs"))
        );
    }

    #[test]
    fn dot_components_are_normalized() {
        let p = absolute_normalized(Path::new("/a/b/../c/./d"));
        assert_eq!(p, PathBuf::from("/a/c/d"));
    }
}
