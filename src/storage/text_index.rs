//! Text index: the inverted-index tier.
//!
//! One tantivy index per workspace, one document per file. The same file
//! content is indexed under three analyzers so the query preprocessor can
//! route by intent:
//!
//! | field              | analyzer                  | purpose               |
//! |--------------------|---------------------------|-----------------------|
//! | `path`             | raw                       | exact lookups         |
//! | `file_name`        | code tokens, lowercased   | filename boosts       |
//! | `content`          | code tokens + stemming    | general full text     |
//! | `content_symbols`  | identifier-preserving     | exact symbol matches  |
//! | `content_patterns` | whitespace only           | punctuation queries   |
//! | `type_names`       | raw, multi-valued         | definition exclusion  |
//! | `last_modified`    | u64 fast field            | range queries         |

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

use tantivy::collector::{Count, TopDocs};
use tantivy::directory::MmapDirectory;
use tantivy::query::{BooleanQuery, MoreLikeThisQuery, Occur, Query, QueryParser, TermQuery};
use tantivy::schema::{
    FAST, Field, IndexRecordOption, STORED, STRING, Schema, SchemaBuilder, TextFieldIndexing,
    TextOptions, Value,
};
use tantivy::tokenizer::{
    LowerCaser, RegexTokenizer, SimpleTokenizer, Stemmer, TextAnalyzer, WhitespaceTokenizer,
};
use tantivy::{
    DocAddress, Index, IndexReader, IndexSettings, IndexWriter, ReloadPolicy,
    TantivyDocument as Document, Term,
};
use tracing::debug;

use crate::error::{TextIndexError, TextIndexResult};

/// Tokenizer names registered on the index.
const TOKENIZER_CODE: &str = "code";
const TOKENIZER_CODE_STEM: &str = "code_stem";
const TOKENIZER_IDENTIFIER: &str = "identifier";
const TOKENIZER_PATTERN: &str = "pattern";

/// Schema fields for the per-file document index.
#[derive(Debug, Clone)]
pub struct TextSchema {
    pub path: Field,
    pub file_name: Field,
    pub content: Field,
    pub content_symbols: Field,
    pub content_patterns: Field,
    pub type_names: Field,
    pub last_modified: Field,
}

impl TextSchema {
    fn build() -> (Schema, TextSchema) {
        let mut builder = SchemaBuilder::default();

        let path = builder.add_text_field("path", STRING | STORED);

        let code_options = TextOptions::default().set_indexing_options(
            TextFieldIndexing::default()
                .set_tokenizer(TOKENIZER_CODE)
                .set_index_option(IndexRecordOption::WithFreqsAndPositions),
        );
        let file_name = builder.add_text_field("file_name", code_options.clone().set_stored());

        let content = builder.add_text_field(
            "content",
            TextOptions::default()
                .set_indexing_options(
                    TextFieldIndexing::default()
                        .set_tokenizer(TOKENIZER_CODE_STEM)
                        .set_index_option(IndexRecordOption::WithFreqsAndPositions),
                )
                .set_stored(),
        );

        let content_symbols = builder.add_text_field(
            "content_symbols",
            TextOptions::default().set_indexing_options(
                TextFieldIndexing::default()
                    .set_tokenizer(TOKENIZER_IDENTIFIER)
                    .set_index_option(IndexRecordOption::WithFreqsAndPositions),
            ),
        );

        let content_patterns = builder.add_text_field(
            "content_patterns",
            TextOptions::default().set_indexing_options(
                TextFieldIndexing::default()
                    .set_tokenizer(TOKENIZER_PATTERN)
                    .set_index_option(IndexRecordOption::WithFreqsAndPositions),
            ),
        );

        let type_names = builder.add_text_field("type_names", STRING | STORED);
        let last_modified = builder.add_u64_field("last_modified", STORED | FAST);

        (
            builder.build(),
            TextSchema {
                path,
                file_name,
                content,
                content_symbols,
                content_patterns,
                type_names,
                last_modified,
            },
        )
    }
}

/// One file as fed to the text tier.
#[derive(Debug, Clone)]
pub struct TextDocument {
    pub path: String,
    pub content: String,
    /// Names of symbols defined in this file; used to exclude definition
    /// sites from reference queries.
    pub type_names: Vec<String>,
    pub last_modified: u64,
}

/// One hit from the text tier, with line/context resolved from stored
/// content when requested.
#[derive(Debug, Clone)]
pub struct TextHit {
    pub path: String,
    pub score: f32,
    pub line: Option<u32>,
    pub context_lines: Vec<String>,
    pub snippet: Option<String>,
    pub type_names: Vec<String>,
    pub last_modified: u64,
    /// Stored content, handed to the scorer for exact-match checks.
    pub content: Option<String>,
}

/// Search output: hits plus total match count and elapsed time.
#[derive(Debug, Clone)]
pub struct TextSearchResult {
    pub total_hits: usize,
    pub hits: Vec<TextHit>,
    pub elapsed_ms: u64,
}

/// Inverted index over file contents.
pub struct TextIndex {
    index: Index,
    reader: IndexReader,
    schema: TextSchema,
    dir: PathBuf,
    writer: Mutex<Option<IndexWriter<Document>>>,
}

impl std::fmt::Debug for TextIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextIndex").field("dir", &self.dir).finish()
    }
}

impl TextIndex {
    /// Open or create the index at `dir`.
    pub fn open(dir: impl AsRef<Path>) -> TextIndexResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let (schema, fields) = TextSchema::build();
        let index = if Self::exists(&dir) {
            Index::open_in_dir(&dir)?
        } else {
            let mmap = MmapDirectory::open(&dir)?;
            Index::create(mmap, schema, IndexSettings::default())?
        };
        register_tokenizers(&index)?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        reader.reload()?;

        Ok(Self {
            index,
            reader,
            schema: fields,
            dir,
            writer: Mutex::new(None),
        })
    }

    /// Whether an index already exists on disk at `dir`.
    pub fn exists(dir: &Path) -> bool {
        dir.join("meta.json").is_file()
    }

    pub fn schema(&self) -> &TextSchema {
        &self.schema
    }

    pub fn document_count(&self) -> usize {
        self.reader.searcher().num_docs() as usize
    }

    /// Start a batch; documents accumulate until `commit_batch`.
    pub fn start_batch(&self) -> TextIndexResult<()> {
        let mut writer = self.writer.lock().expect("writer lock");
        if writer.is_none() {
            *writer = Some(self.index.writer::<Document>(100_000_000)?);
        }
        Ok(())
    }

    /// Commit the batch and make new documents visible to readers.
    pub fn commit_batch(&self) -> TextIndexResult<()> {
        let mut writer = self.writer.lock().expect("writer lock");
        if let Some(w) = writer.as_mut() {
            w.commit()?;
        }
        *writer = None;
        self.reader.reload()?;
        Ok(())
    }

    /// Replace the document for a path. Outside a batch the change is
    /// committed immediately.
    pub fn upsert_document(&self, doc: &TextDocument) -> TextIndexResult<()> {
        let mut writer = self.writer.lock().expect("writer lock");
        let in_batch = writer.is_some();
        if !in_batch {
            *writer = Some(self.index.writer::<Document>(50_000_000)?);
        }
        let w = writer.as_mut().expect("writer present");

        w.delete_term(Term::from_field_text(self.schema.path, &doc.path));

        let mut d = Document::new();
        d.add_text(self.schema.path, &doc.path);
        let file_name = doc.path.rsplit('/').next().unwrap_or(&doc.path);
        d.add_text(self.schema.file_name, file_name);
        d.add_text(self.schema.content, &doc.content);
        d.add_text(self.schema.content_symbols, &doc.content);
        d.add_text(self.schema.content_patterns, &doc.content);
        for name in &doc.type_names {
            d.add_text(self.schema.type_names, name);
        }
        d.add_u64(self.schema.last_modified, doc.last_modified);
        w.add_document(d)?;

        if !in_batch {
            w.commit()?;
            *writer = None;
            drop(writer);
            self.reader.reload()?;
        }
        debug!("text index upsert: {}", doc.path);
        Ok(())
    }

    /// Remove the document for a path. Outside a batch the deletion is
    /// committed immediately.
    pub fn delete_document(&self, path: &str) -> TextIndexResult<()> {
        let mut writer = self.writer.lock().expect("writer lock");
        let term = Term::from_field_text(self.schema.path, path);
        if let Some(w) = writer.as_mut() {
            w.delete_term(term);
        } else {
            let mut w = self.index.writer::<Document>(50_000_000)?;
            w.delete_term(term);
            w.commit()?;
            drop(writer);
            self.reader.reload()?;
        }
        Ok(())
    }

    /// Delete every document.
    pub fn clear(&self) -> TextIndexResult<()> {
        let mut writer = self.writer.lock().expect("writer lock");
        *writer = None;
        let mut w = self.index.writer::<Document>(50_000_000)?;
        w.delete_all_documents()?;
        w.commit()?;
        drop(writer);
        self.reader.reload()?;
        Ok(())
    }

    /// Parse `query_text` against a single field with tantivy's grammar.
    pub fn parse_query(&self, query_text: &str, field: Field) -> TextIndexResult<Box<dyn Query>> {
        let parser = QueryParser::for_index(&self.index, vec![field]);
        parser
            .parse_query(query_text)
            .map_err(|e| TextIndexError::QueryParse(e.to_string()))
    }

    /// Case-preserving term query on `content_symbols`.
    pub fn symbol_term_query(&self, symbol: &str) -> Box<dyn Query> {
        Box::new(TermQuery::new(
            Term::from_field_text(self.schema.content_symbols, symbol),
            IndexRecordOption::WithFreqsAndPositions,
        ))
    }

    /// Strict reference query: MUST match the symbol in `content_symbols`,
    /// MUST NOT list it in `type_names` (the defining file).
    pub fn reference_query(&self, symbol: &str, case_sensitive: bool) -> TextIndexResult<Box<dyn Query>> {
        let must: Box<dyn Query> = if case_sensitive {
            self.symbol_term_query(symbol)
        } else {
            self.parse_query(&symbol.to_lowercase(), self.schema.content_symbols)
                .unwrap_or_else(|_| self.symbol_term_query(symbol))
        };
        let must_not: Box<dyn Query> = Box::new(TermQuery::new(
            Term::from_field_text(self.schema.type_names, symbol),
            IndexRecordOption::Basic,
        ));
        Ok(Box::new(BooleanQuery::new(vec![
            (Occur::Must, must),
            (Occur::MustNot, must_not),
        ])))
    }

    /// Execute a query. When `want_context` is set, the first matching
    /// line and its neighbourhood are resolved from stored content.
    pub fn search(
        &self,
        query: &dyn Query,
        limit: usize,
        query_terms: &[String],
        want_context: bool,
        context_lines: usize,
    ) -> TextIndexResult<TextSearchResult> {
        let start = Instant::now();
        let searcher = self.reader.searcher();
        let (top, total) = searcher.search(query, &(TopDocs::with_limit(limit.max(1)), Count))?;

        let mut hits = Vec::with_capacity(top.len());
        for (score, addr) in top {
            let doc: Document = searcher.doc(addr)?;
            let path = doc
                .get_first(self.schema.path)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let content = doc
                .get_first(self.schema.content)
                .and_then(|v| v.as_str())
                .map(str::to_string);
            let type_names = doc
                .get_all(self.schema.type_names)
                .filter_map(|v| v.as_str())
                .map(str::to_string)
                .collect();
            let last_modified = doc
                .get_first(self.schema.last_modified)
                .and_then(|v| v.as_u64())
                .unwrap_or(0);

            let (line, context, snippet) = if want_context {
                match &content {
                    Some(text) => locate_in_content(text, query_terms, context_lines),
                    None => (None, Vec::new(), None),
                }
            } else {
                (None, Vec::new(), None)
            };

            hits.push(TextHit {
                path,
                score,
                line,
                context_lines: context,
                snippet,
                type_names,
                last_modified,
                content,
            });
        }

        Ok(TextSearchResult {
            total_hits: total,
            hits,
            elapsed_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// MoreLikeThis query seeded from the document for `path`, or None if
    /// the path is not indexed. Minima follow the similar-files contract:
    /// term-freq >= 1, doc-freq >= 1, max 25 query terms, word length 3-50.
    pub fn more_like_this(&self, path: &str) -> TextIndexResult<Option<Box<dyn Query>>> {
        let Some(addr) = self.doc_address(path)? else {
            return Ok(None);
        };
        let query = MoreLikeThisQuery::builder()
            .with_min_term_frequency(1)
            .with_min_doc_frequency(1)
            .with_max_query_terms(25)
            .with_min_word_length(3)
            .with_max_word_length(50)
            .with_boost_factor(1.0)
            .with_document(addr);
        Ok(Some(Box::new(query)))
    }

    fn doc_address(&self, path: &str) -> TextIndexResult<Option<DocAddress>> {
        let searcher = self.reader.searcher();
        let query = TermQuery::new(
            Term::from_field_text(self.schema.path, path),
            IndexRecordOption::Basic,
        );
        let top = searcher.search(&query, &TopDocs::with_limit(1))?;
        Ok(top.into_iter().next().map(|(_, addr)| addr))
    }
}

fn register_tokenizers(index: &Index) -> TextIndexResult<()> {
    let tokenizers = index.tokenizers();
    tokenizers.register(
        TOKENIZER_CODE,
        TextAnalyzer::builder(SimpleTokenizer::default())
            .filter(LowerCaser)
            .build(),
    );
    tokenizers.register(
        TOKENIZER_CODE_STEM,
        TextAnalyzer::builder(SimpleTokenizer::default())
            .filter(LowerCaser)
            .filter(Stemmer::new(tantivy::tokenizer::Language::English))
            .build(),
    );
    let identifier = RegexTokenizer::new(r"[A-Za-z_][A-Za-z0-9_]*")
        .map_err(|e| TextIndexError::QueryParse(e.to_string()))?;
    tokenizers.register(
        TOKENIZER_IDENTIFIER,
        TextAnalyzer::builder(identifier).build(),
    );
    tokenizers.register(
        TOKENIZER_PATTERN,
        TextAnalyzer::builder(WhitespaceTokenizer::default()).build(),
    );
    Ok(())
}

/// Find the first line containing any query term (case-insensitive) and
/// return `(line_number, context_lines, snippet)`. Line numbers are 1-based.
pub fn locate_in_content(
    content: &str,
    terms: &[String],
    context: usize,
) -> (Option<u32>, Vec<String>, Option<String>) {
    let lowered_terms: Vec<String> = terms
        .iter()
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect();
    if lowered_terms.is_empty() {
        return (None, Vec::new(), None);
    }

    let lines: Vec<&str> = content.lines().collect();
    for (idx, line) in lines.iter().enumerate() {
        let lowered = line.to_lowercase();
        if lowered_terms.iter().any(|t| lowered.contains(t)) {
            let start = idx.saturating_sub(context);
            let end = (idx + context + 1).min(lines.len());
            let context_lines = lines[start..end].iter().map(|l| l.to_string()).collect();
            let snippet = truncate_snippet(line.trim(), 200);
            return (Some(idx as u32 + 1), context_lines, Some(snippet));
        }
    }
    (None, Vec::new(), None)
}

fn truncate_snippet(line: &str, max_chars: usize) -> String {
    if line.chars().count() <= max_chars {
        line.to_string()
    } else {
        let cut: String = line.chars().take(max_chars).collect();
        format!("{cut}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn doc(path: &str, content: &str, type_names: &[&str], mtime: u64) -> TextDocument {
        TextDocument {
            path: path.to_string(),
            content: content.to_string(),
            type_names: type_names.iter().map(|s| s.to_string()).collect(),
            last_modified: mtime,
        }
    }

    fn filled_index(dir: &Path) -> TextIndex {
        let index = TextIndex::open(dir).unwrap();
        index.start_batch().unwrap();
        index
            .upsert_document(&doc(
                "s.py",
                "def foo():\n    pass\n",
                &["foo"],
                100,
            ))
            .unwrap();
        index
            .upsert_document(&doc(
                "u.py",
                "import s\n\nfoo()\nprint('done')\n",
                &[],
                200,
            ))
            .unwrap();
        index.commit_batch().unwrap();
        index
    }

    #[test]
    fn open_is_idempotent() {
        let dir = TempDir::new().unwrap();
        {
            let index = filled_index(dir.path());
            assert_eq!(index.document_count(), 2);
        }
        let reopened = TextIndex::open(dir.path()).unwrap();
        assert!(TextIndex::exists(dir.path()));
        assert_eq!(reopened.document_count(), 2);
    }

    #[test]
    fn content_search_resolves_line_and_context() {
        let dir = TempDir::new().unwrap();
        let index = filled_index(dir.path());

        let query = index
            .parse_query("foo", index.schema().content)
            .unwrap();
        let result = index
            .search(&*query, 10, &["foo".to_string()], true, 1)
            .unwrap();
        assert_eq!(result.total_hits, 2);

        let hit = result.hits.iter().find(|h| h.path == "u.py").unwrap();
        assert_eq!(hit.line, Some(3));
        assert!(hit.snippet.as_deref().unwrap().contains("foo"));
        assert!(hit.context_lines.iter().any(|l| l.contains("foo()")));
    }

    #[test]
    fn reference_query_excludes_defining_file() {
        let dir = TempDir::new().unwrap();
        let index = filled_index(dir.path());

        let query = index.reference_query("foo", true).unwrap();
        let result = index
            .search(&*query, 10, &["foo".to_string()], true, 1)
            .unwrap();
        assert_eq!(result.hits.len(), 1);
        assert_eq!(result.hits[0].path, "u.py");
    }

    #[test]
    fn symbol_field_preserves_identifiers() {
        let dir = TempDir::new().unwrap();
        let index = TextIndex::open(dir.path()).unwrap();
        index
            .upsert_document(&doc(
                "lib.rs",
                "fn snake_case_name() {}\n",
                &["snake_case_name"],
                10,
            ))
            .unwrap();

        // the identifier tokenizer keeps underscores intact
        let query = index.symbol_term_query("snake_case_name");
        let result = index.search(&*query, 10, &[], false, 0).unwrap();
        assert_eq!(result.total_hits, 1);
    }

    #[test]
    fn upsert_replaces_and_delete_removes() {
        let dir = TempDir::new().unwrap();
        let index = TextIndex::open(dir.path()).unwrap();
        index
            .upsert_document(&doc("a.rs", "alpha one", &[], 1))
            .unwrap();
        index
            .upsert_document(&doc("a.rs", "alpha two", &[], 2))
            .unwrap();
        assert_eq!(index.document_count(), 1);

        index.delete_document("a.rs").unwrap();
        assert_eq!(index.document_count(), 0);
    }

    #[test]
    fn more_like_this_skips_unknown_paths() {
        let dir = TempDir::new().unwrap();
        let index = filled_index(dir.path());
        assert!(index.more_like_this("missing.py").unwrap().is_none());
        assert!(index.more_like_this("u.py").unwrap().is_some());
    }

    #[test]
    fn locate_handles_missing_terms() {
        let (line, ctx, snip) = locate_in_content("a\nb\nc", &["zzz".to_string()], 1);
        assert_eq!(line, None);
        assert!(ctx.is_empty());
        assert!(snip.is_none());
    }
}
