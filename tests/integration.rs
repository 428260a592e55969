use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn krag_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_krag"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[index]
dir = "{root}/data/vector_index"

[documents]
uploads_dir = "{root}/data/uploads"

[chunking]
chunk_size = 200
overlap = 40

[retrieval]
top_k = 3
"#,
        root = root.display()
    );

    let config_path = config_dir.join("krag.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_krag(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = krag_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run krag binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn write_upload(root: &Path, id: &str, filename: &str, body: Option<&str>, status: &str) {
    let uploads = root.join("data/uploads");
    fs::create_dir_all(&uploads).unwrap();
    if let Some(body) = body {
        fs::write(uploads.join(filename), body).unwrap();
    }
    fs::write(
        uploads.join(format!("{}.json", id)),
        format!(
            r#"{{"id": "{}", "title": "{}", "filename": "{}", "status": "{}", "timestamp": 1700000000.0}}"#,
            id, id, filename, status
        ),
    )
    .unwrap();
}

#[test]
fn test_init_creates_directories() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_krag(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/uploads").is_dir());
    assert!(tmp.path().join("data/vector_index/CURRENT").is_file());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_krag(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_krag(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_stats_on_empty_index() {
    let (_tmp, config_path) = setup_test_env();
    run_krag(&config_path, &["init"]);

    let (stdout, stderr, success) = run_krag(&config_path, &["stats"]);
    assert!(success, "stats failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Chunks:      0"));
    assert!(stdout.contains("Uploads:     0"));
}

#[test]
fn test_stats_counts_uploads_by_status() {
    let (tmp, config_path) = setup_test_env();
    write_upload(tmp.path(), "a", "a.md", Some("Alpha body text."), "indexed");
    write_upload(tmp.path(), "b", "b.md", Some("Beta body text."), "uploaded");
    write_upload(tmp.path(), "c", "c.pdf", None, "error");

    let (stdout, stderr, success) = run_krag(&config_path, &["stats"]);
    assert!(success, "stats failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Uploads:     3"));
    assert!(stdout.contains("indexed"));
    assert!(stdout.contains("Last upload:"));
}

#[test]
fn test_missing_config_errors() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_krag(&tmp.path().join("nope.toml"), &["stats"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}

#[test]
fn test_invalid_chunking_rejected() {
    let (_tmp, config_path) = setup_test_env();
    let content = fs::read_to_string(&config_path)
        .unwrap()
        .replace("overlap = 40", "overlap = 200");
    fs::write(&config_path, content).unwrap();

    let (_, stderr, success) = run_krag(&config_path, &["init"]);
    assert!(!success);
    assert!(stderr.contains("overlap"), "stderr={}", stderr);
}

#[test]
fn test_search_errors_when_disabled() {
    let (_tmp, config_path) = setup_test_env();
    run_krag(&config_path, &["init"]);

    let (_, stderr, success) = run_krag(&config_path, &["search", "deployment"]);
    assert!(!success);
    assert!(stderr.contains("embedding provider"));
}

#[test]
fn test_ask_errors_when_disabled() {
    let (_tmp, config_path) = setup_test_env();
    run_krag(&config_path, &["init"]);

    let (_, stderr, success) = run_krag(&config_path, &["ask", "how do I deploy?"]);
    assert!(!success);
    assert!(stderr.contains("embedding provider"));
}

#[test]
fn test_rebuild_errors_when_disabled() {
    let (_tmp, config_path) = setup_test_env();
    let (_, stderr, success) = run_krag(&config_path, &["rebuild"]);
    assert!(!success);
    assert!(stderr.contains("embedding provider"));
}

#[test]
fn test_add_errors_when_disabled_and_registers_nothing() {
    let (tmp, config_path) = setup_test_env();
    run_krag(&config_path, &["init"]);
    let file = tmp.path().join("notes.md");
    fs::write(&file, "Some notes about the deploy pipeline.").unwrap();

    let (_, stderr, success) = run_krag(
        &config_path,
        &["add", file.to_str().unwrap(), "--title", "Notes"],
    );
    assert!(!success);
    assert!(stderr.contains("embedding provider"));
    assert_eq!(fs::read_dir(tmp.path().join("data/uploads")).unwrap().count(), 0);
}

#[test]
fn test_stats_reports_corrupt_index() {
    let (tmp, config_path) = setup_test_env();
    run_krag(&config_path, &["init"]);

    let index = tmp.path().join("data/vector_index");
    let current = fs::read_to_string(index.join("CURRENT")).unwrap();
    fs::write(index.join(current.trim()).join("vectors.bin"), b"not an index").unwrap();

    let (_, stderr, success) = run_krag(&config_path, &["stats"]);
    assert!(!success);
    assert!(stderr.contains("krag rebuild"), "stderr={}", stderr);
}
