//! Vector-tier integration: embeddings ride along with file upserts and
//! disappear with their symbols, and k-NN resolves back to symbols.

use std::sync::Arc;
use tempfile::TempDir;

use codesearch::Settings;
use codesearch::embedding::testing::FakeEmbeddingClient;
use codesearch::embedding::{EmbeddingClient, symbol_embedding_text};
use codesearch::indexing::Indexer;
use codesearch::indexing::extractor::testing::StaticExtractor;
use codesearch::indexing::Extraction;
use codesearch::storage::{StructuredStore, TextIndex, VectorSearch};
use codesearch::types::Symbol;
use codesearch::workspace::WorkspaceLayout;

fn sample_symbol(id: &str, name: &str, doc: &str) -> Symbol {
    Symbol {
        id: id.to_string(),
        name: name.to_string(),
        kind: "function".to_string(),
        language: "python".to_string(),
        file_path: String::new(),
        signature: Some(format!("def {name}()")),
        start_line: 1,
        start_col: 0,
        end_line: 2,
        end_col: 0,
        start_byte: 0,
        end_byte: 0,
        doc_comment: Some(doc.to_string()),
        visibility: None,
        parent_id: None,
        confidence: 1.0,
        file_hash: String::new(),
    }
}

struct VectorFixture {
    indexer: Indexer,
    store: Arc<StructuredStore>,
    workspace: TempDir,
    _index_root: TempDir,
    _runtime: tokio::runtime::Runtime,
}

fn fixture(embedder: Arc<dyn EmbeddingClient>) -> VectorFixture {
    let index_root = TempDir::new().unwrap();
    let workspace = TempDir::new().unwrap();
    std::fs::write(
        workspace.path().join("s.py"),
        "def embed_me():\n    pass\n",
    )
    .unwrap();
    std::fs::write(
        workspace.path().join("other.py"),
        "def unrelated():\n    pass\n",
    )
    .unwrap();

    let settings = Arc::new(Settings::default());
    let layout = WorkspaceLayout::resolve(index_root.path(), workspace.path()).unwrap();
    layout.ensure_dirs().unwrap();
    let store = Arc::new(StructuredStore::open(&layout.db_path).unwrap());
    let text = Arc::new(TextIndex::open(&layout.text_index_dir).unwrap());

    let extractor = Arc::new(
        StaticExtractor::new()
            .with(
                "s.py",
                Extraction {
                    symbols: vec![sample_symbol("sym-1", "embed_me", "Embeds nicely.")],
                    identifiers: vec![],
                },
            )
            .with(
                "other.py",
                Extraction {
                    symbols: vec![sample_symbol("sym-2", "unrelated", "Different topic.")],
                    identifiers: vec![],
                },
            ),
    );

    let runtime = tokio::runtime::Runtime::new().unwrap();
    let indexer = Indexer::new(settings, layout, store.clone(), text, extractor)
        .with_embedder(embedder, runtime.handle().clone());

    VectorFixture {
        indexer,
        store,
        workspace,
        _index_root: index_root,
        _runtime: runtime,
    }
}

#[test]
fn embeddings_are_written_with_symbols_and_cascade_on_delete() {
    let embedder: Arc<dyn EmbeddingClient> = Arc::new(FakeEmbeddingClient::new(16));
    let fx = fixture(embedder);
    fx.indexer.index_workspace(false, None, None, |_| {}).unwrap();

    assert_eq!(fx.store.symbol_count().unwrap(), 2);
    assert_eq!(fx.store.embedding_count().unwrap(), 2);

    let path = fx.workspace.path().join("s.py");
    std::fs::remove_file(&path).unwrap();
    fx.indexer.remove_file(&path).unwrap();

    assert_eq!(fx.store.symbol_count().unwrap(), 1);
    assert_eq!(fx.store.embedding_count().unwrap(), 1);
}

#[test]
fn embedding_failure_never_blocks_the_upsert() {
    let embedder: Arc<dyn EmbeddingClient> = Arc::new(FakeEmbeddingClient {
        dimension: 16,
        available: false,
    });
    let fx = fixture(embedder);
    let stats = fx.indexer.index_workspace(false, None, None, |_| {}).unwrap();

    // files and symbols committed, embeddings absent for both files
    assert_eq!(stats.files_failed, 0);
    assert_eq!(fx.store.file_count().unwrap(), 2);
    assert_eq!(fx.store.symbol_count().unwrap(), 2);
    assert_eq!(fx.store.embedding_count().unwrap(), 0);
}

#[test]
fn knn_resolves_symbols_with_rescaled_similarity() {
    let fake = FakeEmbeddingClient::new(16);
    let embedder: Arc<dyn EmbeddingClient> = Arc::new(FakeEmbeddingClient::new(16));
    let fx = fixture(embedder);
    fx.indexer.index_workspace(false, None, None, |_| {}).unwrap();

    // query with the exact embedding text of sym-1; the fake is
    // deterministic so the nearest neighbour is exact
    let rt = tokio::runtime::Runtime::new().unwrap();
    let query_text =
        symbol_embedding_text("function", "embed_me", Some("def embed_me()"), Some("Embeds nicely."));
    let query = rt.block_on(fake.embed(&query_text)).unwrap();

    let search = VectorSearch::new(fx.store.clone());
    let matches = search.knn(&query, 2).unwrap();
    assert_eq!(matches.len(), 2);
    assert_eq!(matches[0].symbol.name, "embed_me");
    assert!((matches[0].similarity - 1.0).abs() < 1e-5);
    assert!(matches[0].similarity >= matches[1].similarity);
    for m in &matches {
        assert!((0.0..=1.0).contains(&m.similarity));
    }
}
