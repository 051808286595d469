use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn recall_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("recall");
    path
}

struct TestEnv {
    _tmp: TempDir,
    config: PathBuf,
    files: PathBuf,
}

fn setup_test_env(provider: &str) -> TestEnv {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(files_dir.join("2025-07-30")).unwrap();
    fs::write(
        files_dir.join("alpha.md"),
        "# Alpha notes\n\nThoughts about Rust programming, cargo and crates.",
    )
    .unwrap();
    fs::write(
        files_dir.join("beta.md"),
        "# Beta notes\n\nPython and machine learning. PyTorch experiments.",
    )
    .unwrap();
    fs::write(
        files_dir.join("2025-07-30/gamma.txt"),
        "Generated: 2025-07-30 09:15:00\nEngine: whisper\n---\n\
         Standup: we decided to delay the launch. Kubernetes upgrade first.",
    )
    .unwrap();
    fs::write(
        files_dir.join("2025-07-30/gamma.analysis.md"),
        "**Mode:** local\n\n## Summary\n\nLaunch delayed.\n\n## Classification\n\nmeeting\n",
    )
    .unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/recall.sqlite"

[retrieval]
final_limit = 12

[embedding]
provider = "{}"
timeout_secs = 5
"#,
        root.display(),
        provider
    );

    let config_path = config_dir.join("recall.toml");
    fs::write(&config_path, config_content).unwrap();

    TestEnv {
        _tmp: tmp,
        config: config_path,
        files: files_dir,
    }
}

fn run_recall(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = recall_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run recall binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn indexed_env(provider: &str) -> TestEnv {
    let env = setup_test_env(provider);
    let (stdout, stderr, success) = run_recall(
        &env.config,
        &["index", env.files.to_str().unwrap()],
    );
    assert!(success, "index failed: stdout={}, stderr={}", stdout, stderr);
    env
}

fn search_json(env: &TestEnv, args: &[&str]) -> serde_json::Value {
    let mut full = vec!["search"];
    full.extend_from_slice(args);
    full.push("--json");
    let (stdout, stderr, success) = run_recall(&env.config, &full);
    assert!(success, "search failed: stderr={}", stderr);
    serde_json::from_str(&stdout).unwrap()
}

#[test]
fn test_init_creates_database() {
    let env = setup_test_env("disabled");

    let (stdout, stderr, success) = run_recall(&env.config, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
}

#[test]
fn test_init_idempotent() {
    let env = setup_test_env("disabled");

    let (_, _, success1) = run_recall(&env.config, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_recall(&env.config, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_index_directory() {
    let env = setup_test_env("disabled");

    let (stdout, stderr, success) =
        run_recall(&env.config, &["index", env.files.to_str().unwrap()]);
    assert!(success, "index failed: stdout={}, stderr={}", stdout, stderr);
    // The analysis sidecar is metadata, not a document.
    assert!(stdout.contains("scanned: 3"), "stdout={}", stdout);
    assert!(stdout.contains("indexed: 3"));
    assert!(stdout.contains("errors: 0"));
}

#[test]
fn test_index_idempotent_no_duplicates() {
    let env = indexed_env("disabled");

    let (stdout, _, success) = run_recall(&env.config, &["index", env.files.to_str().unwrap()]);
    assert!(success);
    assert!(stdout.contains("indexed: 0"), "stdout={}", stdout);
    assert!(stdout.contains("skipped: 3"));

    let (stats, _, _) = run_recall(&env.config, &["stats"]);
    assert!(stats.contains("Documents:   3"), "stats={}", stats);
}

#[test]
fn test_index_picks_up_edits() {
    let env = indexed_env("disabled");
    fs::write(env.files.join("beta.md"), "Rewritten beta notes about zebras.").unwrap();

    let (stdout, _, _) = run_recall(&env.config, &["index", env.files.to_str().unwrap()]);
    assert!(stdout.contains("indexed: 1"), "stdout={}", stdout);
    assert!(stdout.contains("skipped: 2"));

    let (stdout, _, _) = run_recall(&env.config, &["search", "zebras", "--mode", "keyword"]);
    assert!(stdout.contains("beta.md"));
}

#[test]
fn test_index_missing_directory_fails() {
    let env = setup_test_env("disabled");
    let (_, stderr, success) = run_recall(&env.config, &["index", "/no/such/dir/anywhere"]);
    assert!(!success);
    assert!(stderr.contains("does not exist"), "stderr={}", stderr);
}

#[test]
fn test_index_reports_invalid_utf8_and_continues() {
    let env = setup_test_env("disabled");
    fs::write(env.files.join("broken.txt"), [0xffu8, 0xfe, 0x80]).unwrap();

    let (stdout, _, success) = run_recall(&env.config, &["index", env.files.to_str().unwrap()]);
    assert!(success, "partial errors must not fail the run");
    assert!(stdout.contains("indexed: 3"));
    assert!(stdout.contains("errors: 1"));
    assert!(stdout.contains("broken.txt"));
}

#[test]
fn test_search_keyword() {
    let env = indexed_env("disabled");

    let (stdout, stderr, success) =
        run_recall(&env.config, &["search", "kubernetes", "--mode", "keyword"]);
    assert!(success, "search failed: stderr={}", stderr);
    assert!(stdout.contains("gamma.txt"), "stdout={}", stdout);
    assert!(stdout.contains("1. ["));
}

#[test]
fn test_search_deterministic() {
    let env = indexed_env("disabled");

    let (first, _, _) = run_recall(&env.config, &["search", "notes", "--mode", "keyword"]);
    for _ in 0..3 {
        let (again, _, _) = run_recall(&env.config, &["search", "notes", "--mode", "keyword"]);
        assert_eq!(first, again);
    }
}

#[test]
fn test_search_no_results() {
    let env = indexed_env("disabled");

    let (stdout, _, success) = run_recall(&env.config, &["search", "zzyxqrst", "--mode", "keyword"]);
    assert!(success, "zero results must still exit 0");
    assert!(stdout.contains("No results."));
}

#[test]
fn test_search_hybrid_degrades_when_provider_disabled() {
    let env = indexed_env("disabled");

    let (stdout, stderr, success) = run_recall(&env.config, &["search", "launch"]);
    assert!(success, "hybrid search must not fail: stderr={}", stderr);
    assert!(stdout.contains("gamma.txt"));
    assert!(stderr.contains("semantic search unavailable"));

    let value = search_json(&env, &["launch"]);
    assert_eq!(value["mode"], "hybrid");
    assert_eq!(value["effective_mode"], "keyword");
    assert_eq!(value["degraded"], true);
}

#[test]
fn test_search_semantic_empty_when_provider_disabled() {
    let env = indexed_env("disabled");

    let value = search_json(&env, &["launch", "--mode", "semantic"]);
    assert_eq!(value["degraded"], true);
    assert_eq!(value["results"].as_array().unwrap().len(), 0);
}

#[test]
fn test_search_invalid_date_is_warning() {
    let env = indexed_env("disabled");

    let (stdout, stderr, success) = run_recall(
        &env.config,
        &["search", "launch", "--mode", "keyword", "--from", "last-tuesday"],
    );
    assert!(success);
    assert!(stdout.contains("No results."));
    assert!(stderr.contains("YYYY-MM-DD"), "stderr={}", stderr);
}

#[test]
fn test_search_filters_by_classification_and_date() {
    let env = indexed_env("disabled");

    let value = search_json(&env, &["notes launch", "--mode", "keyword", "--classification", "meeting"]);
    let results = value["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["filename"], "2025-07-30/gamma.txt");
    assert_eq!(results[0]["summary"], "Launch delayed.");

    let value = search_json(
        &env,
        &["launch", "--mode", "keyword", "--from", "2025-07-31", "--to", "2025-08-31"],
    );
    assert_eq!(value["results"].as_array().unwrap().len(), 0);
}

#[test]
fn test_search_hybrid_with_hash_provider() {
    let env = indexed_env("hash");

    let value = search_json(&env, &["machine learning experiments"]);
    assert_eq!(value["degraded"], false);
    let results = value["results"].as_array().unwrap();
    assert_eq!(results[0]["filename"], "beta.md");
    let score = results[0]["score"].as_f64().unwrap();
    assert!((0.0..=1.0).contains(&score));
}

#[test]
fn test_get_document() {
    let env = indexed_env("disabled");

    let value = search_json(&env, &["kubernetes", "--mode", "keyword"]);
    let id = value["results"][0]["document_id"].as_i64().unwrap().to_string();

    let (stdout, stderr, success) = run_recall(&env.config, &["get", &id]);
    assert!(success, "get failed: stderr={}", stderr);
    assert!(stdout.contains("--- Document ---"));
    assert!(stdout.contains("2025-07-30/gamma.txt"));
    assert!(stdout.contains("engine:         whisper"));
    assert!(stdout.contains("classification: meeting"));
    // Header stripped from content.
    assert!(!stdout.contains("Generated: 2025-07-30"));
    assert!(stdout.contains("--- Chunks (1) ---"));
}

#[test]
fn test_get_missing_document() {
    let env = indexed_env("disabled");

    let (_, stderr, success) = run_recall(&env.config, &["get", "9999"]);
    assert!(!success);
    assert!(stderr.contains("not found"));
}

#[test]
fn test_delete_document() {
    let env = indexed_env("disabled");

    let (_, _, success) = run_recall(&env.config, &["delete", "1"]);
    assert!(success);
    let (_, _, success) = run_recall(&env.config, &["get", "1"]);
    assert!(!success);
    let (_, _, success) = run_recall(&env.config, &["delete", "1"]);
    assert!(!success);

    let (_, _, success) = run_recall(&env.config, &["check"]);
    assert!(success, "delete must leave the index consistent");
}

#[test]
fn test_reembed_errors_when_disabled() {
    let env = indexed_env("disabled");

    let (_, stderr, success) = run_recall(&env.config, &["reembed"]);
    assert!(!success);
    assert!(stderr.contains("disabled"));
}

#[test]
fn test_index_embeds_with_hash_provider() {
    let env = setup_test_env("hash");

    let (stdout, _, success) = run_recall(&env.config, &["index", env.files.to_str().unwrap()]);
    assert!(success);
    assert!(stdout.contains("generated: 3"), "stdout={}", stdout);

    let (stdout, _, _) = run_recall(&env.config, &["reembed"]);
    assert!(stdout.contains("generated: 0"));
    assert!(stdout.contains("skipped: 3"));

    let (stdout, _, _) = run_recall(&env.config, &["reembed", "--force"]);
    assert!(stdout.contains("generated: 3"));
}

#[test]
fn test_stats() {
    let env = indexed_env("disabled");

    let (stdout, _, success) = run_recall(&env.config, &["stats"]);
    assert!(success);
    assert!(stdout.contains("Documents:   3"));
    assert!(stdout.contains("Embedded:    0 / 3"));
    assert!(stdout.contains("meeting"));
}

#[test]
fn test_timeline() {
    let env = indexed_env("disabled");

    let (stdout, _, success) = run_recall(
        &env.config,
        &["timeline", "--from", "2025-07-01", "--to", "2025-07-31"],
    );
    assert!(success);
    assert!(stdout.contains("2025-07-30"));
    assert!(stdout.contains("meeting"));

    let (stdout, _, _) = run_recall(
        &env.config,
        &["timeline", "--from", "2020-01-01", "--to", "2020-01-31"],
    );
    assert!(stdout.contains("No documents in range."));
}

#[test]
fn test_export_csv_to_file() {
    let env = indexed_env("disabled");
    let out = env.files.parent().unwrap().join("out/results.csv");

    let (_, stderr, success) = run_recall(
        &env.config,
        &[
            "export",
            "launch",
            "--mode",
            "keyword",
            "--format",
            "csv",
            "--output",
            out.to_str().unwrap(),
        ],
    );
    assert!(success, "export failed: stderr={}", stderr);
    let csv = fs::read_to_string(&out).unwrap();
    assert!(csv.starts_with("document_id,filename,date,"));
    assert!(csv.contains("2025-07-30/gamma.txt"));
}

#[test]
fn test_export_markdown_to_stdout() {
    let env = indexed_env("disabled");

    let (stdout, _, success) = run_recall(
        &env.config,
        &["export", "launch", "--mode", "keyword", "--format", "markdown"],
    );
    assert!(success);
    assert!(stdout.starts_with("# Search Results"));
    assert!(stdout.contains("## 1. 2025-07-30/gamma.txt"));
}

#[test]
fn test_check_and_rebuild() {
    let env = indexed_env("disabled");

    let (stdout, _, success) = run_recall(&env.config, &["check"]);
    assert!(success);
    assert!(stdout.contains("ok"));

    let (_, _, success) = run_recall(&env.config, &["rebuild-index"]);
    assert!(success);
    let (_, _, success) = run_recall(&env.config, &["check"]);
    assert!(success);
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_recall(&tmp.path().join("nope.toml"), &["stats"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}
