use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn mrag_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("mrag");
    path
}

const MANUAL: &str = "1 Overview\nThis manual describes the Acme editor.\n\n\
1.1 Getting Started\nInstall the editor and sign in with your account.\n\
\x0c2 Export\nCSV and JSON are supported.\n\
\x0c3 Troubleshooting\nIf the editor crashes, restart it and check the log file.\n";

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::write(root.join("manual.txt"), MANUAL).unwrap();

    // No network: lexical-only retrieval, no generator, no reranking.
    let config_content = r#"[chunking]
chunk_tokens = 200
overlap_tokens = 20

[rerank]
enabled = false

[embedding]
provider = "disabled"

[generation]
provider = "disabled"
"#;

    let config_path = config_dir.join("mrag.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_mrag(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = mrag_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run mrag binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn build(tmp: &TempDir, config_path: &Path) -> PathBuf {
    let input = tmp.path().join("manual.txt");
    let index = tmp.path().join("index");
    let (stdout, stderr, success) = run_mrag(
        config_path,
        &[
            "build",
            "--input",
            input.to_str().unwrap(),
            "--output",
            index.to_str().unwrap(),
            "--progress",
            "off",
        ],
    );
    assert!(success, "build failed: stdout={}, stderr={}", stdout, stderr);
    index
}

#[test]
fn test_build_writes_index() {
    let (tmp, config_path) = setup_test_env();
    let index = build(&tmp, &config_path);

    assert!(index.join("index.json").exists());
    assert!(!index.join("dense.bin").exists());
}

#[test]
fn test_build_reports_counts() {
    let (tmp, config_path) = setup_test_env();
    let input = tmp.path().join("manual.txt");
    let index = tmp.path().join("index");
    let (stdout, _, success) = run_mrag(
        &config_path,
        &[
            "build",
            "--input",
            input.to_str().unwrap(),
            "--output",
            index.to_str().unwrap(),
            "--progress",
            "off",
        ],
    );
    assert!(success);
    assert!(stdout.contains("sections: 4"), "got: {}", stdout);
    assert!(stdout.contains("chunks: 4"), "got: {}", stdout);
    assert!(stdout.contains("lexical only"));
    assert!(stdout.contains("ok"));
}

#[test]
fn test_rebuild_replaces_index() {
    let (tmp, config_path) = setup_test_env();
    build(&tmp, &config_path);
    build(&tmp, &config_path);

    let entries: Vec<String> = fs::read_dir(tmp.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    assert!(
        entries.iter().all(|e| !e.contains(".tmp-") && !e.contains(".old-")),
        "leftover staging directories: {:?}",
        entries
    );
}

#[test]
fn test_search_ranks_export_first() {
    let (tmp, config_path) = setup_test_env();
    let index = build(&tmp, &config_path);

    let (stdout, stderr, success) = run_mrag(
        &config_path,
        &[
            "search",
            "What export formats are supported?",
            "--index",
            index.to_str().unwrap(),
        ],
    );
    assert!(success, "search failed: stdout={}, stderr={}", stdout, stderr);
    let first = stdout.lines().next().unwrap_or_default();
    assert_eq!(first, "1. [Export — p2]");
    assert!(stdout.contains("CSV and JSON are supported."));
}

#[test]
fn test_search_no_results() {
    let (tmp, config_path) = setup_test_env();
    let index = build(&tmp, &config_path);

    let (stdout, _, success) = run_mrag(
        &config_path,
        &["search", "zzzz qqqq", "--index", index.to_str().unwrap()],
    );
    assert!(success);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_search_missing_index_fails() {
    let (tmp, config_path) = setup_test_env();
    let missing = tmp.path().join("nope");

    let (_, stderr, success) = run_mrag(
        &config_path,
        &["search", "export", "--index", missing.to_str().unwrap()],
    );
    assert!(!success);
    assert!(stderr.contains("index artifact missing"), "stderr: {}", stderr);
}

#[test]
fn test_ask_without_generator_fails_cleanly() {
    let (tmp, config_path) = setup_test_env();
    let index = build(&tmp, &config_path);

    let (_, stderr, success) = run_mrag(
        &config_path,
        &["ask", "What export formats are supported?", "--index", index.to_str().unwrap()],
    );
    assert!(!success);
    assert!(stderr.contains("Answer generation failed"), "stderr: {}", stderr);
}

#[test]
fn test_inspect() {
    let (tmp, config_path) = setup_test_env();
    let index = build(&tmp, &config_path);

    let (stdout, stderr, success) = run_mrag(&config_path, &["inspect", "--index", index.to_str().unwrap()]);
    assert!(success, "inspect failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Chunks:      4"));
    assert!(stdout.contains("Export"));
    assert!(stdout.contains("none (lexical only)"));
}

#[test]
fn test_missing_input_fails() {
    let (tmp, config_path) = setup_test_env();
    let missing = tmp.path().join("absent.txt");
    let index = tmp.path().join("index");

    let (_, stderr, success) = run_mrag(
        &config_path,
        &[
            "build",
            "--input",
            missing.to_str().unwrap(),
            "--output",
            index.to_str().unwrap(),
        ],
    );
    assert!(!success);
    assert!(stderr.contains("not found"), "stderr: {}", stderr);
    assert!(!index.exists());
}

#[test]
fn test_invalid_override_fails_fast() {
    let (tmp, config_path) = setup_test_env();
    let input = tmp.path().join("manual.txt");

    let (_, stderr, success) = run_mrag(
        &config_path,
        &["build", "--input", input.to_str().unwrap(), "--footer-regex", "(unclosed"],
    );
    assert!(!success);
    assert!(stderr.contains("footer_regex"), "stderr: {}", stderr);
}
