//! End-to-end tests over the full engine: index a temp workspace, query
//! through the dispatcher, check the response envelopes.

use serde_json::{Value, json};
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use codesearch::Settings;
use codesearch::tools::Engines;

struct Fixture {
    engines: Engines,
    workspace: TempDir,
    _index_root: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let index_root = TempDir::new().unwrap();
        let workspace = TempDir::new().unwrap();
        let mut settings = Settings::default();
        settings.index_root = index_root.path().to_path_buf();
        // no extractor binary in the test environment
        settings.indexing.extractor = std::path::PathBuf::new();
        Self {
            engines: Engines::new(Arc::new(settings)),
            workspace,
            _index_root: index_root,
        }
    }

    fn write(&self, rel: &str, content: &str) {
        let path = self.workspace.path().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    fn ws(&self) -> String {
        self.workspace.path().display().to_string()
    }

    fn call(&self, tool: &str, mut params: Value) -> Value {
        params["workspace"] = json!(self.ws());
        let cancel = CancellationToken::new();
        let response = self.engines.dispatch(tool, params, &cancel);
        serde_json::to_value(&response).unwrap()
    }

    fn index(&self) -> Value {
        self.call("index_workspace", json!({}))
    }
}

#[test]
fn index_then_text_search_trivial() {
    let fx = Fixture::new();
    fx.write("a.txt", "hello world foo bar");

    let indexed = fx.index();
    assert_eq!(indexed["success"], true);

    let response = fx.call("text_search", json!({"query": "hello"}));
    assert_eq!(response["success"], true);
    assert_eq!(response["data"]["count"], 1);
    let hit = &response["data"]["results"][0];
    assert_eq!(hit["filePath"], "a.txt");
    assert!(hit["score"].as_f64().unwrap() > 0.0);
    assert!(hit["snippet"].as_str().unwrap().contains("hello"));
}

#[test]
fn missing_workspace_is_an_error_envelope() {
    let index_root = TempDir::new().unwrap();
    let mut settings = Settings::default();
    settings.index_root = index_root.path().to_path_buf();
    let engines = Engines::new(Arc::new(settings));

    let cancel = CancellationToken::new();
    let response = engines.dispatch(
        "text_search",
        json!({"workspace": "/no/such/dir", "query": "x"}),
        &cancel,
    );
    assert!(!response.success);
    assert_eq!(response.error.unwrap().code, "WORKSPACE_MISSING");
}

#[test]
fn query_before_indexing_reports_index_missing() {
    let fx = Fixture::new();
    fx.write("a.txt", "something");
    let response = fx.call("text_search", json!({"query": "something"}));
    assert_eq!(response["success"], false);
    assert_eq!(response["error"]["code"], "INDEX_MISSING");
    let steps = response["error"]["recovery"]["steps"].as_array().unwrap();
    assert!(steps[0].as_str().unwrap().contains("index_workspace"));
}

#[test]
fn find_references_falls_back_and_excludes_the_definition() {
    // without an extractor the identifier table stays empty, so
    // find_references exercises the text fallback
    let fx = Fixture::new();
    fx.write("s.py", "def foo():\n    pass\n");
    fx.write("u.py", "import s\n\nfoo()\n");
    fx.index();

    // the defining file advertises its definitions through type_names;
    // normally the extractor fills these in during indexing
    let engine = fx.engines.get_or_open(&fx.ws()).unwrap();
    engine
        .text_index()
        .upsert_document(&codesearch::storage::TextDocument {
            path: "s.py".to_string(),
            content: "def foo():\n    pass\n".to_string(),
            type_names: vec!["foo".to_string()],
            last_modified: 100,
        })
        .unwrap();

    let response = fx.call("find_references", json!({"symbol": "foo"}));
    assert_eq!(response["success"], true);
    assert_eq!(response["data"]["extensionData"]["route"], "text_fallback");

    let results = response["data"]["results"].as_array().unwrap();
    assert!(
        results.iter().all(|r| r["filePath"] != "s.py"),
        "defining file leaked into reference results"
    );
    let u_hit = results
        .iter()
        .find(|r| r["filePath"] == "u.py")
        .expect("u.py hit");
    assert_eq!(u_hit["line"], 3);
    let kind = u_hit["fields"]["referenceType"].as_str().unwrap();
    assert!(kind == "method-call" || kind == "usage", "got {kind}");
}

#[test]
fn token_budget_enforcement_truncates_and_spills() {
    let fx = Fixture::new();
    for i in 0..120 {
        fx.write(
            &format!("file_{i:03}.txt"),
            &format!("needle in haystack number {i}\nmore filler text here\n"),
        );
    }
    fx.index();

    let response = fx.call(
        "text_search",
        json!({"query": "needle", "max_tokens": 2000}),
    );
    assert_eq!(response["success"], true);
    assert_eq!(response["meta"]["truncated"], true);

    let shown = response["data"]["results"].as_array().unwrap().len();
    let count = response["data"]["count"].as_u64().unwrap() as usize;
    assert!(shown < count);
    assert!(response["meta"]["tokenInfo"]["estimated"].as_u64().unwrap() <= 2000);

    // the full set is retrievable through the resource store
    let uri = response["meta"]["resourceUri"].as_str().expect("uri");
    let engine = fx.engines.get_or_open(&fx.ws()).unwrap();
    let payload = engine.resources().fetch(uri).expect("resource");
    let full: Vec<Value> = serde_json::from_slice(&payload).unwrap();
    assert_eq!(full.len(), count);
}

#[test]
fn directory_search_matches_segment_glob() {
    let fx = Fixture::new();
    fx.write("src/core/mod.rs", "pub fn core() {}");
    fx.write("src/util/mod.rs", "pub fn util() {}");
    fx.write("tests/x.rs", "fn x() {}");
    fx.index();

    let response = fx.call("directory_search", json!({"pattern": "*ut*"}));
    assert_eq!(response["success"], true);
    let results = response["data"]["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0]["path"].as_str().unwrap().ends_with("src/util"));
    assert_eq!(results[0]["depth"], 2);
    assert_eq!(results[0]["fileCount"], 1);
}

#[test]
fn recent_files_respects_time_frame() {
    let fx = Fixture::new();
    fx.write("old.txt", "old content");
    fx.write("new.txt", "new content");
    fx.index();

    // age the old file ten days into the past, directly in the store
    let engine = fx.engines.get_or_open(&fx.ws()).unwrap();
    let mut record = engine_store_file(&engine, "old.txt");
    record.last_modified -= 10 * 86_400;
    engine_store_upsert(&engine, &record);

    let response = fx.call(
        "recent_files",
        json!({"time_frame": "1d", "no_cache": true}),
    );
    assert_eq!(response["success"], true);
    let results = response["data"]["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["filePath"], "new.txt");
}

fn engine_store_file(engine: &codesearch::SearchEngine, path: &str) -> codesearch::FileRecord {
    engine.store().get_file(path).unwrap().unwrap()
}

fn engine_store_upsert(engine: &codesearch::SearchEngine, record: &codesearch::FileRecord) {
    engine.store().upsert_file(record, &[], &[], None).unwrap();
}

#[test]
fn search_and_replace_preview_then_apply() {
    let fx = Fixture::new();
    fx.write("one.txt", "foo alpha\nfoo beta\n");
    fx.write("two.txt", "gamma foo\n");
    fx.write("three.txt", "foo foo\n");
    fx.index();

    let preview = fx.call(
        "search_and_replace",
        json!({"pattern": "foo", "replacement": "bar", "preview": true}),
    );
    assert_eq!(preview["success"], true);
    assert_eq!(preview["data"]["extensionData"]["totalReplacements"], 5);
    assert_eq!(preview["data"]["extensionData"]["totalFiles"], 3);
    // nothing written in preview mode
    let on_disk = std::fs::read_to_string(fx.workspace.path().join("one.txt")).unwrap();
    assert!(on_disk.contains("foo") && !on_disk.contains("bar"));

    let applied = fx.call(
        "search_and_replace",
        json!({"pattern": "foo", "replacement": "bar", "preview": false}),
    );
    assert_eq!(applied["success"], true);
    for name in ["one.txt", "two.txt", "three.txt"] {
        let content = std::fs::read_to_string(fx.workspace.path().join(name)).unwrap();
        assert!(!content.contains("foo"), "{name} still contains foo");
        assert!(content.contains("bar"), "{name} missing bar");
    }

    // idempotent: a second apply changes nothing
    let again = fx.call(
        "search_and_replace",
        json!({"pattern": "foo", "replacement": "bar", "preview": false, "no_cache": true}),
    );
    assert_eq!(again["data"]["extensionData"]["totalReplacements"], 0);
}

#[test]
fn file_search_glob_and_extension_filter() {
    let fx = Fixture::new();
    fx.write("src/parser.rs", "fn parse() {}");
    fx.write("src/parser_test.rs", "fn t() {}");
    fx.write("docs/parser.md", "# parser");
    fx.index();

    let response = fx.call(
        "file_search",
        json!({"pattern": "parser*", "extensions": ["rs"]}),
    );
    assert_eq!(response["success"], true);
    let paths: Vec<&str> = response["data"]["results"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|r| r["filePath"].as_str())
        .collect();
    assert!(paths.contains(&"src/parser.rs"));
    assert!(paths.contains(&"src/parser_test.rs"));
    assert!(!paths.iter().any(|p| p.ends_with(".md")));
}

#[test]
fn similar_files_never_returns_the_source() {
    let fx = Fixture::new();
    fx.write(
        "alpha.txt",
        "retry backoff queue worker schedule interval jitter threshold",
    );
    fx.write(
        "beta.txt",
        "retry backoff queue worker schedule interval jitter limit",
    );
    fx.write("unrelated.txt", "completely different vocabulary entirely");
    fx.index();

    let response = fx.call("similar_files", json!({"file_path": "alpha.txt"}));
    assert_eq!(response["success"], true);
    let results = response["data"]["results"].as_array().unwrap();
    assert!(
        results.iter().all(|r| r["filePath"] != "alpha.txt"),
        "source document leaked into similar-files results"
    );
    if let Some(best) = results.first() {
        assert_eq!(best["filePath"], "beta.txt");
        assert!(best.get("reason").is_some());
    }

    let response = fx.call("similar_files", json!({"file_path": "absent.txt"}));
    assert_eq!(response["success"], true);
    assert_eq!(response["data"]["count"], 0);
}

#[test]
fn cache_returns_equal_responses_and_invalidates_on_write() {
    let fx = Fixture::new();
    fx.write("a.txt", "cachable content here");
    fx.index();

    let first = fx.call("text_search", json!({"query": "cachable"}));
    let second = fx.call("text_search", json!({"query": "cachable"}));
    assert_eq!(second["data"]["extensionData"]["cacheHit"], true);
    // equal up to executionTime and the cacheHit marker
    assert_eq!(first["data"]["results"], second["data"]["results"]);
    assert_eq!(first["data"]["count"], second["data"]["count"]);
    assert_eq!(first["insights"], second["insights"]);

    // a write invalidates: re-index after touching the file
    fx.write("a.txt", "cachable content changed");
    fx.index();
    let third = fx.call("text_search", json!({"query": "cachable"}));
    assert!(third["data"]["extensionData"].get("cacheHit").is_none());
}

#[test]
fn invalid_queries_surface_structured_errors() {
    let fx = Fixture::new();
    fx.write("a.txt", "content");
    fx.index();

    let response = fx.call("text_search", json!({"query": "***"}));
    assert_eq!(response["success"], false);
    assert_eq!(response["error"]["code"], "INVALID_QUERY");

    let response = fx.call("recent_files", json!({"time_frame": "soon"}));
    assert_eq!(response["error"]["code"], "INVALID_QUERY");

    let response = fx.call(
        "file_search",
        json!({"pattern": "(bad", "use_regex": true}),
    );
    assert_eq!(response["error"]["code"], "INVALID_PATTERN");
}

#[test]
fn goto_definition_and_symbol_search_via_store() {
    use codesearch::{Identifier, Symbol};

    let fx = Fixture::new();
    fx.write("s.py", "def foo():\n    pass\n");
    fx.write("u.py", "import s\n\nfoo()\n");
    fx.index();

    // simulate extractor output: a definition and a resolved call site
    let engine = fx.engines.get_or_open(&fx.ws()).unwrap();
    let store = engine.store();
    let mut def_file = store.get_file("s.py").unwrap().unwrap();
    def_file.content = Some("def foo():\n    pass\n".to_string());
    let symbol = Symbol {
        id: "sym-foo".into(),
        name: "foo".into(),
        kind: "function".into(),
        language: "python".into(),
        file_path: "s.py".into(),
        signature: Some("def foo()".into()),
        start_line: 1,
        start_col: 0,
        end_line: 2,
        end_col: 8,
        start_byte: 0,
        end_byte: 20,
        doc_comment: None,
        visibility: None,
        parent_id: None,
        confidence: 1.0,
        file_hash: def_file.hash.clone(),
    };
    store.upsert_file(&def_file, &[symbol], &[], None).unwrap();

    let mut use_file = store.get_file("u.py").unwrap().unwrap();
    use_file.content = Some("import s\n\nfoo()\n".to_string());
    let identifier = Identifier {
        id: "id-1".into(),
        name: "foo".into(),
        kind: "call".into(),
        language: "python".into(),
        file_path: "u.py".into(),
        start_line: 3,
        start_col: 0,
        end_line: 3,
        end_col: 3,
        containing_symbol_id: None,
        target_symbol_id: Some("sym-foo".into()),
        confidence: 1.0,
        code_context: Some("foo()".into()),
    };
    store
        .upsert_file(&use_file, &[], &[identifier], None)
        .unwrap();

    // fast path now wins: one resolved call hit on u.py line 3
    let response = fx.call("find_references", json!({"symbol": "foo", "no_cache": true}));
    assert_eq!(
        response["data"]["extensionData"]["route"],
        "identifier_fast_path"
    );
    let results = response["data"]["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["filePath"], "u.py");
    assert_eq!(results[0]["line"], 3);
    assert_eq!(results[0]["fields"]["referenceType"], "call");
    assert_eq!(results[0]["fields"]["resolved"], "true");

    let response = fx.call("goto_definition", json!({"symbol": "foo", "no_cache": true}));
    assert_eq!(response["success"], true);
    let result = &response["data"]["results"][0];
    assert_eq!(result["filePath"], "s.py");
    assert_eq!(result["line"], 1);
    assert_eq!(result["signature"], "def foo()");
    assert!(result["snippet"].as_str().unwrap().contains("def foo"));

    let response = fx.call("symbol_search", json!({"query": "fo*", "no_cache": true}));
    assert_eq!(response["data"]["count"], 1);
    assert_eq!(response["data"]["results"][0]["name"], "foo");
}

#[test]
fn incremental_update_after_file_change() {
    let fx = Fixture::new();
    fx.write("w.txt", "original marker alpha");
    fx.index();

    let response = fx.call("text_search", json!({"query": "alpha"}));
    assert_eq!(response["data"]["count"], 1);

    // modify + delete, then apply through the indexer as the watcher would
    fx.write("w.txt", "rewritten marker beta");
    let engine = fx.engines.get_or_open(&fx.ws()).unwrap();
    engine
        .indexer()
        .index_file(&fx.workspace.path().join("w.txt"), false)
        .unwrap();
    engine.cache().invalidate_all();

    let response = fx.call("text_search", json!({"query": "beta"}));
    assert_eq!(response["data"]["count"], 1);
    let response = fx.call("text_search", json!({"query": "alpha", "no_cache": true}));
    assert_eq!(response["data"]["count"], 0);

    std::fs::remove_file(fx.workspace.path().join("w.txt")).unwrap();
    engine
        .indexer()
        .remove_file(&fx.workspace.path().join("w.txt"))
        .unwrap();
    engine.cache().invalidate_all();

    let response = fx.call("text_search", json!({"query": "beta", "no_cache": true}));
    assert_eq!(response["data"]["count"], 0);
}

#[test]
fn responses_fit_declared_budgets_across_tools() {
    let fx = Fixture::new();
    for i in 0..40 {
        fx.write(
            &format!("mod_{i}.rs"),
            &format!("pub fn shared_target() {{ /* {i} */ }}\n"),
        );
    }
    fx.index();

    for (tool, params) in [
        ("text_search", json!({"query": "shared_target"})),
        ("file_search", json!({"pattern": "mod_*"})),
        ("find_references", json!({"symbol": "shared_target"})),
    ] {
        let mut p = params.clone();
        p["max_tokens"] = json!(1500);
        let response = fx.call(tool, p);
        assert_eq!(response["success"], true, "{tool} failed");
        let estimated = response["meta"]["tokenInfo"]["estimated"].as_u64().unwrap();
        assert!(
            estimated <= 1500,
            "{tool} overflowed its budget: {estimated}"
        );
    }
}

/// Watcher-level test: events on disk propagate into query results.
#[test]
fn watcher_applies_create_modify_delete() {
    use codesearch::WatchService;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    let fx = Fixture::new();
    fx.write("seed.txt", "seed content");
    fx.index();

    let engine = fx.engines.get_or_open(&fx.ws()).unwrap();
    let writes = Arc::new(AtomicUsize::new(0));
    let writes_probe = writes.clone();
    let cache = engine.cache();
    let _service = WatchService::start(
        fx.engines.settings(),
        engine.indexer(),
        Arc::new(move || {
            writes_probe.fetch_add(1, Ordering::SeqCst);
            cache.invalidate_all();
        }),
    )
    .unwrap();

    fx.write("watched.txt", "freshly watched zeta");
    // coalescing window (250ms) plus slack for the event to arrive
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    loop {
        let response = fx.call("text_search", json!({"query": "zeta", "no_cache": true}));
        if response["data"]["count"] == 1 {
            break;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "watcher never indexed the new file"
        );
        std::thread::sleep(Duration::from_millis(100));
    }
    assert!(writes.load(Ordering::SeqCst) >= 1);

    std::fs::remove_file(fx.workspace.path().join("watched.txt")).unwrap();
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    loop {
        let response = fx.call("text_search", json!({"query": "zeta", "no_cache": true}));
        if response["data"]["count"] == 0 {
            break;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "watcher never removed the deleted file"
        );
        std::thread::sleep(Duration::from_millis(100));
    }
}

#[test]
fn cancellation_produces_cancelled_envelope() {
    let fx = Fixture::new();
    fx.write("a.txt", "content");
    fx.index();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let response = fx.engines.dispatch(
        "text_search",
        json!({"workspace": fx.ws(), "query": "content", "no_cache": true}),
        &cancel,
    );
    assert!(!response.success);
    assert_eq!(response.error.unwrap().code, "CANCELLED");
}
