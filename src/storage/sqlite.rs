//! Structured store: the relational tier and source of truth.
//!
//! One SQLite database per workspace, opened in WAL mode with foreign keys
//! enforced. Holds `files`, `symbols`, `identifiers`, a standalone FTS5
//! table mirroring file content, and `symbol_embeddings` blobs. Schema
//! creation is idempotent; re-opening never destroys data.
//!
//! All writes for a single file happen in one transaction. Deleting a file
//! cascades to its symbols, identifiers and embeddings.

use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, params};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{StorageError, StorageResult};
use crate::types::{DirectoryMatch, FileRecord, Identifier, Symbol, SymbolEmbedding};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS files (
    path          TEXT PRIMARY KEY,
    language      TEXT NOT NULL,
    hash          TEXT NOT NULL,
    size          INTEGER NOT NULL,
    last_modified INTEGER NOT NULL,
    last_indexed  INTEGER NOT NULL,
    content       TEXT,
    symbol_count  INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_files_language ON files(language);
CREATE INDEX IF NOT EXISTS idx_files_modified ON files(last_modified);

CREATE TABLE IF NOT EXISTS symbols (
    id           TEXT PRIMARY KEY,
    name         TEXT NOT NULL,
    kind         TEXT NOT NULL,
    language     TEXT NOT NULL,
    file_path    TEXT NOT NULL REFERENCES files(path) ON DELETE CASCADE,
    signature    TEXT,
    start_line   INTEGER NOT NULL,
    start_col    INTEGER NOT NULL,
    end_line     INTEGER NOT NULL,
    end_col      INTEGER NOT NULL,
    start_byte   INTEGER NOT NULL DEFAULT 0,
    end_byte     INTEGER NOT NULL DEFAULT 0,
    doc_comment  TEXT,
    visibility   TEXT,
    parent_id    TEXT,
    confidence   REAL NOT NULL DEFAULT 1.0,
    file_hash    TEXT NOT NULL DEFAULT '',
    last_indexed INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_symbols_name ON symbols(name);
CREATE INDEX IF NOT EXISTS idx_symbols_kind ON symbols(kind);
CREATE INDEX IF NOT EXISTS idx_symbols_file ON symbols(file_path);
CREATE INDEX IF NOT EXISTS idx_symbols_parent ON symbols(parent_id);

CREATE TABLE IF NOT EXISTS identifiers (
    id                   TEXT PRIMARY KEY,
    name                 TEXT NOT NULL,
    kind                 TEXT NOT NULL,
    language             TEXT NOT NULL,
    file_path            TEXT NOT NULL REFERENCES files(path) ON DELETE CASCADE,
    start_line           INTEGER NOT NULL,
    start_col            INTEGER NOT NULL,
    end_line             INTEGER NOT NULL,
    end_col              INTEGER NOT NULL,
    containing_symbol_id TEXT,
    target_symbol_id     TEXT,
    confidence           REAL NOT NULL DEFAULT 1.0,
    code_context         TEXT
);
CREATE INDEX IF NOT EXISTS idx_identifiers_name ON identifiers(name COLLATE NOCASE);
CREATE INDEX IF NOT EXISTS idx_identifiers_kind ON identifiers(kind);
CREATE INDEX IF NOT EXISTS idx_identifiers_file ON identifiers(file_path);
CREATE INDEX IF NOT EXISTS idx_identifiers_containing ON identifiers(containing_symbol_id);

CREATE TABLE IF NOT EXISTS symbol_embeddings (
    symbol_id TEXT PRIMARY KEY REFERENCES symbols(id) ON DELETE CASCADE,
    embedding BLOB NOT NULL,
    dim       INTEGER NOT NULL
);
";

const FTS_SCHEMA: &str = "
CREATE VIRTUAL TABLE IF NOT EXISTS files_fts USING fts5(
    path UNINDEXED,
    content,
    tokenize = 'unicode61'
);
";

/// Embedded relational store for one workspace.
///
/// A single connection guarded by a mutex serializes writers; WAL mode
/// keeps concurrent readers (other connections, e.g. diagnostics) from
/// blocking them.
pub struct StructuredStore {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl std::fmt::Debug for StructuredStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StructuredStore")
            .field("path", &self.path)
            .finish()
    }
}

impl StructuredStore {
    /// Open (or create) the database at `path` and apply the schema.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Open {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        }
        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )?;
        Self::init(conn, path)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn, PathBuf::from(":memory:"))
    }

    fn init(conn: Connection, path: PathBuf) -> StorageResult<Self> {
        // journal_mode returns the resulting mode as a row
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| StorageError::Schema(e.to_string()))?;
        conn.execute_batch(FTS_SCHEMA)
            .map_err(|e| StorageError::Schema(e.to_string()))?;
        debug!("structured store ready at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace a file record together with all of its symbols, identifiers
    /// and (optionally) embeddings, in one transaction.
    pub fn upsert_file(
        &self,
        file: &FileRecord,
        symbols: &[Symbol],
        identifiers: &[Identifier],
        embeddings: Option<&[SymbolEmbedding]>,
    ) -> StorageResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        // Explicit child deletes instead of relying on REPLACE-triggered
        // cascades; symbol deletion cascades the embeddings.
        tx.execute(
            "DELETE FROM identifiers WHERE file_path = ?1",
            params![file.path],
        )?;
        tx.execute(
            "DELETE FROM symbols WHERE file_path = ?1",
            params![file.path],
        )?;
        tx.execute(
            "INSERT OR REPLACE INTO files
             (path, language, hash, size, last_modified, last_indexed, content, symbol_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                file.path,
                file.language,
                file.hash,
                file.size,
                file.last_modified,
                file.last_indexed,
                file.content,
                symbols.len() as i64,
            ],
        )?;

        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO symbols
                 (id, name, kind, language, file_path, signature,
                  start_line, start_col, end_line, end_col, start_byte, end_byte,
                  doc_comment, visibility, parent_id, confidence, file_hash, last_indexed)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
            )?;
            for s in symbols {
                stmt.execute(params![
                    s.id,
                    s.name,
                    s.kind,
                    s.language,
                    file.path,
                    s.signature,
                    s.start_line,
                    s.start_col,
                    s.end_line,
                    s.end_col,
                    s.start_byte,
                    s.end_byte,
                    s.doc_comment,
                    s.visibility,
                    s.parent_id,
                    s.confidence as f64,
                    s.file_hash,
                    file.last_indexed,
                ])?;
            }
        }

        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO identifiers
                 (id, name, kind, language, file_path,
                  start_line, start_col, end_line, end_col,
                  containing_symbol_id, target_symbol_id, confidence, code_context)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            )?;
            for i in identifiers {
                stmt.execute(params![
                    i.id,
                    i.name,
                    i.kind,
                    i.language,
                    file.path,
                    i.start_line,
                    i.start_col,
                    i.end_line,
                    i.end_col,
                    i.containing_symbol_id,
                    i.target_symbol_id,
                    i.confidence as f64,
                    i.code_context,
                ])?;
            }
        }

        if let Some(embeddings) = embeddings {
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO symbol_embeddings (symbol_id, embedding, dim)
                 VALUES (?1, ?2, ?3)",
            )?;
            for e in embeddings {
                stmt.execute(params![
                    e.symbol_id,
                    vector_to_blob(&e.vector),
                    e.vector.len() as i64,
                ])?;
            }
        }

        tx.execute("DELETE FROM files_fts WHERE path = ?1", params![file.path])?;
        if let Some(content) = &file.content {
            tx.execute(
                "INSERT INTO files_fts (path, content) VALUES (?1, ?2)",
                params![file.path, content],
            )?;
        }

        tx.commit()?;
        debug!(
            "upserted {} ({} symbols, {} identifiers)",
            file.path,
            symbols.len(),
            identifiers.len()
        );
        Ok(())
    }

    /// Remove a file; symbols, identifiers and embeddings go with it.
    pub fn delete_file(&self, path: &str) -> StorageResult<bool> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM files_fts WHERE path = ?1", params![path])?;
        let deleted = tx.execute("DELETE FROM files WHERE path = ?1", params![path])?;
        tx.commit()?;
        Ok(deleted > 0)
    }

    pub fn get_file(&self, path: &str) -> StorageResult<Option<FileRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT path, language, hash, size, last_modified, last_indexed, content, symbol_count
             FROM files WHERE path = ?1",
        )?;
        let mut rows = stmt.query_map(params![path], file_from_row)?;
        rows.next().transpose().map_err(Into::into)
    }

    pub fn file_hash(&self, path: &str) -> StorageResult<Option<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT hash FROM files WHERE path = ?1")?;
        match stmt.query_row(params![path], |row| row.get::<_, String>(0)) {
            Ok(h) => Ok(Some(h)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn file_count(&self) -> StorageResult<usize> {
        self.count("SELECT COUNT(*) FROM files")
    }

    pub fn symbol_count(&self) -> StorageResult<usize> {
        self.count("SELECT COUNT(*) FROM symbols")
    }

    pub fn identifier_count(&self) -> StorageResult<usize> {
        self.count("SELECT COUNT(*) FROM identifiers")
    }

    pub fn embedding_count(&self) -> StorageResult<usize> {
        self.count("SELECT COUNT(*) FROM symbol_embeddings")
    }

    fn count(&self, sql: &str) -> StorageResult<usize> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
        Ok(n as usize)
    }

    pub fn all_file_paths(&self) -> StorageResult<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT path FROM files ORDER BY path")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        rows.collect::<Result<_, _>>().map_err(Into::into)
    }

    /// Exact-name symbol lookup, optionally case-insensitive.
    pub fn get_symbols_by_name(&self, name: &str, case_sensitive: bool) -> StorageResult<Vec<Symbol>> {
        let sql = if case_sensitive {
            "SELECT * FROM symbols WHERE name = ?1 ORDER BY confidence DESC, name"
        } else {
            "SELECT * FROM symbols WHERE name = ?1 COLLATE NOCASE ORDER BY confidence DESC, name"
        };
        self.query_symbols(sql, params![name])
    }

    /// Wildcard symbol lookup; `*` and `?` in `pattern` are glob wildcards.
    pub fn get_symbols_like(&self, pattern: &str, max: usize) -> StorageResult<Vec<Symbol>> {
        let like = glob_to_like(pattern);
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT * FROM symbols WHERE LOWER(name) LIKE ?1 ESCAPE '\\'
             ORDER BY confidence DESC, LENGTH(name), name LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![like, max as i64], symbol_from_row)?;
        rows.collect::<Result<_, _>>().map_err(Into::into)
    }

    pub fn get_symbol_by_id(&self, id: &str) -> StorageResult<Option<Symbol>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT * FROM symbols WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], symbol_from_row)?;
        rows.next().transpose().map_err(Into::into)
    }

    pub fn get_symbols_in_file(&self, path: &str) -> StorageResult<Vec<Symbol>> {
        self.query_symbols(
            "SELECT * FROM symbols WHERE file_path = ?1 ORDER BY start_line",
            params![path],
        )
    }

    fn query_symbols(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> StorageResult<Vec<Symbol>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(sql)?;
        let rows = stmt.query_map(params, symbol_from_row)?;
        rows.collect::<Result<_, _>>().map_err(Into::into)
    }

    /// Exact-name identifier lookup. This is the find-references fast path.
    pub fn get_identifiers_by_name(
        &self,
        name: &str,
        case_sensitive: bool,
    ) -> StorageResult<Vec<Identifier>> {
        let sql = if case_sensitive {
            "SELECT * FROM identifiers WHERE name = ?1
             ORDER BY file_path, start_line"
        } else {
            "SELECT * FROM identifiers WHERE name = ?1 COLLATE NOCASE
             ORDER BY file_path, start_line"
        };
        self.query_identifiers(sql, params![name])
    }

    pub fn count_identifiers_by_name(
        &self,
        name: &str,
        case_sensitive: bool,
    ) -> StorageResult<usize> {
        let sql = if case_sensitive {
            "SELECT COUNT(*) FROM identifiers WHERE name = ?1"
        } else {
            "SELECT COUNT(*) FROM identifiers WHERE name = ?1 COLLATE NOCASE"
        };
        let conn = self.conn.lock();
        let n: i64 = conn.query_row(sql, params![name], |row| row.get(0))?;
        Ok(n as usize)
    }

    /// Identifiers contained in a given symbol; used for downward
    /// call-path tracing.
    pub fn get_identifiers_by_containing_symbol(
        &self,
        symbol_id: &str,
    ) -> StorageResult<Vec<Identifier>> {
        self.query_identifiers(
            "SELECT * FROM identifiers WHERE containing_symbol_id = ?1
             ORDER BY file_path, start_line",
            params![symbol_id],
        )
    }

    fn query_identifiers(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> StorageResult<Vec<Identifier>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(sql)?;
        let rows = stmt.query_map(params, identifier_from_row)?;
        rows.collect::<Result<_, _>>().map_err(Into::into)
    }

    /// Glob search over file paths. When `search_full_path` is false the
    /// glob is matched against the basename only.
    pub fn search_files_by_pattern(
        &self,
        pattern: &str,
        search_full_path: bool,
        extensions: Option<&[String]>,
        max: usize,
    ) -> StorageResult<Vec<FileRecord>> {
        let like = glob_to_like(pattern);
        let conn = self.conn.lock();
        let sql = if search_full_path {
            "SELECT path, language, hash, size, last_modified, last_indexed, NULL, symbol_count
             FROM files WHERE LOWER(path) LIKE ?1 ESCAPE '\\' ORDER BY path LIMIT ?2"
        } else {
            // basename match: no separator after the matched run
            "SELECT path, language, hash, size, last_modified, last_indexed, NULL, symbol_count
             FROM files
             WHERE (LOWER(path) LIKE ?1 ESCAPE '\\' AND INSTR(LOWER(path), '/') = 0)
                OR LOWER(path) LIKE '%/' || ?1 ESCAPE '\\'
             ORDER BY path LIMIT ?2"
        };
        let mut stmt = conn.prepare_cached(sql)?;
        let rows = stmt.query_map(params![like, max as i64], file_from_row)?;
        let mut files: Vec<FileRecord> = rows.collect::<Result<_, _>>()?;
        if let Some(exts) = extensions {
            let exts: Vec<String> = exts.iter().map(|e| e.trim_start_matches('.').to_lowercase()).collect();
            files.retain(|f| {
                Path::new(&f.path)
                    .extension()
                    .map(|e| exts.contains(&e.to_string_lossy().to_lowercase()))
                    .unwrap_or(false)
            });
        }
        Ok(files)
    }

    /// Files modified at or after `cutoff_epoch`, newest first.
    pub fn recent_files(
        &self,
        cutoff_epoch: i64,
        max: usize,
        extensions: Option<&[String]>,
    ) -> StorageResult<Vec<FileRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT path, language, hash, size, last_modified, last_indexed, NULL, symbol_count
             FROM files WHERE last_modified >= ?1
             ORDER BY last_modified DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![cutoff_epoch, max as i64], file_from_row)?;
        let mut files: Vec<FileRecord> = rows.collect::<Result<_, _>>()?;
        if let Some(exts) = extensions {
            let exts: Vec<String> = exts.iter().map(|e| e.trim_start_matches('.').to_lowercase()).collect();
            files.retain(|f| {
                Path::new(&f.path)
                    .extension()
                    .map(|e| exts.contains(&e.to_string_lossy().to_lowercase()))
                    .unwrap_or(false)
            });
        }
        Ok(files)
    }

    /// FTS5 full-text search over file content. Returns (path, bm25 score)
    /// pairs, best first. Terms are quoted so user punctuation cannot break
    /// the MATCH grammar.
    pub fn full_text_search(
        &self,
        query: &str,
        max: usize,
        file_glob: Option<&str>,
    ) -> StorageResult<Vec<(String, f32)>> {
        let match_expr = fts_match_expression(query);
        if match_expr.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT path, bm25(files_fts) FROM files_fts
             WHERE files_fts MATCH ?1 ORDER BY bm25(files_fts) LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![match_expr, max as i64], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
        })?;
        let mut out = Vec::new();
        let glob = file_glob
            .map(|g| glob::Pattern::new(&g.to_lowercase()))
            .transpose()
            .ok()
            .flatten();
        for row in rows {
            let (path, rank) = row?;
            if let Some(pat) = &glob {
                if !pat.matches(&path.to_lowercase()) {
                    continue;
                }
            }
            // bm25() returns negative "better is lower"; flip to a positive score.
            out.push((path, (-rank) as f32));
        }
        Ok(out)
    }

    /// Derive unique directories from indexed file paths. A directory
    /// matches when its name matches the glob; hidden directories (any
    /// segment starting with `.`) need `include_hidden`, and excluded
    /// names are stripped. Ordered by depth, then name.
    pub fn search_directories(
        &self,
        pattern: &str,
        include_hidden: bool,
        excluded: &[String],
        max: usize,
    ) -> StorageResult<Vec<DirectoryMatch>> {
        let glob = glob::Pattern::new(&pattern.to_lowercase()).map_err(|e| {
            StorageError::Glob {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            }
        })?;
        let paths = self.all_file_paths()?;

        // dir -> (direct file count, direct subdirectory names)
        let mut stats: std::collections::BTreeMap<String, (usize, std::collections::BTreeSet<String>)> =
            std::collections::BTreeMap::new();
        for path in &paths {
            let segments: Vec<&str> = path.split('/').collect();
            if segments.len() < 2 {
                continue;
            }
            for depth in 1..segments.len() {
                let dir = segments[..depth].join("/");
                let entry = stats.entry(dir).or_default();
                if depth == segments.len() - 1 {
                    entry.0 += 1;
                } else {
                    entry.1.insert(segments[depth].to_string());
                }
            }
        }

        let mut matches = Vec::new();
        for (dir, (file_count, subdirs)) in &stats {
            let segments: Vec<&str> = dir.split('/').collect();
            let name = segments.last().copied().unwrap_or_default();
            let hidden = segments.iter().any(|s| s.starts_with('.'));
            if hidden && !include_hidden {
                continue;
            }
            if segments.iter().any(|s| excluded.iter().any(|e| e == s)) {
                continue;
            }
            if !glob.matches(&name.to_lowercase()) {
                continue;
            }
            matches.push(DirectoryMatch {
                path: dir.clone(),
                depth: segments.len(),
                file_count: *file_count,
                subdirectory_count: subdirs.len(),
                hidden,
            });
        }

        matches.sort_by(|a, b| a.depth.cmp(&b.depth).then_with(|| a.path.cmp(&b.path)));
        matches.truncate(max);
        Ok(matches)
    }

    /// All stored embeddings. The vector tier scans these for k-NN.
    pub fn all_embeddings(&self) -> StorageResult<Vec<SymbolEmbedding>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare_cached("SELECT symbol_id, embedding FROM symbol_embeddings")?;
        let rows = stmt.query_map([], |row| {
            Ok(SymbolEmbedding {
                symbol_id: row.get(0)?,
                vector: blob_to_vector(&row.get::<_, Vec<u8>>(1)?),
            })
        })?;
        rows.collect::<Result<_, _>>().map_err(Into::into)
    }
}

fn file_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<FileRecord> {
    Ok(FileRecord {
        path: row.get(0)?,
        language: row.get(1)?,
        hash: row.get(2)?,
        size: row.get(3)?,
        last_modified: row.get(4)?,
        last_indexed: row.get(5)?,
        content: row.get(6)?,
        symbol_count: row.get(7)?,
    })
}

fn symbol_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Symbol> {
    Ok(Symbol {
        id: row.get("id")?,
        name: row.get("name")?,
        kind: row.get("kind")?,
        language: row.get("language")?,
        file_path: row.get("file_path")?,
        signature: row.get("signature")?,
        start_line: row.get("start_line")?,
        start_col: row.get("start_col")?,
        end_line: row.get("end_line")?,
        end_col: row.get("end_col")?,
        start_byte: row.get("start_byte")?,
        end_byte: row.get("end_byte")?,
        doc_comment: row.get("doc_comment")?,
        visibility: row.get("visibility")?,
        parent_id: row.get("parent_id")?,
        confidence: row.get::<_, f64>("confidence")? as f32,
        file_hash: row.get("file_hash")?,
    })
}

fn identifier_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Identifier> {
    Ok(Identifier {
        id: row.get("id")?,
        name: row.get("name")?,
        kind: row.get("kind")?,
        language: row.get("language")?,
        file_path: row.get("file_path")?,
        start_line: row.get("start_line")?,
        start_col: row.get("start_col")?,
        end_line: row.get("end_line")?,
        end_col: row.get("end_col")?,
        containing_symbol_id: row.get("containing_symbol_id")?,
        target_symbol_id: row.get("target_symbol_id")?,
        confidence: row.get::<_, f64>("confidence")? as f32,
        code_context: row.get("code_context")?,
    })
}

/// Lower a case-insensitive glob (`*`, `?`) into a `LIKE` pattern with
/// `\` as the escape character.
pub fn glob_to_like(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len() + 4);
    for ch in glob.to_lowercase().chars() {
        match ch {
            '*' => out.push('%'),
            '?' => out.push('_'),
            '%' | '_' | '\\' => {
                out.push('\\');
                out.push(ch);
            }
            other => out.push(other),
        }
    }
    out
}

/// Build a safe FTS5 MATCH expression: each whitespace-separated term is
/// double-quoted (embedded quotes doubled), terms are ANDed implicitly.
fn fts_match_expression(query: &str) -> String {
    query
        .split_whitespace()
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}

fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        blob.extend_from_slice(&v.to_le_bytes());
    }
    blob
}

fn blob_to_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}
