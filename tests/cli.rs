//! Binary-level tests for `paperx`. None of these reach an embedding API.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn paperx() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_paperx"));
    cmd.env_remove("VOYAGE_API_KEY")
        .env_remove("OPENAI_API_KEY")
        .env("RUST_LOG", "warn");
    cmd
}

fn write_config(dir: &Path) -> PathBuf {
    let path = dir.join("paperx.toml");
    let db_path = dir.join("data").join("paperx.sqlite");
    std::fs::write(
        &path,
        format!(
            r#"[db]
path = "{}"

[embedding]
provider = "voyage"
max_retries = 0
"#,
            db_path.display().to_string().replace('\\', "/")
        ),
    )
    .unwrap();
    path
}

fn run(config: &Path, args: &[&str]) -> Output {
    paperx()
        .arg("--config")
        .arg(config)
        .args(args)
        .output()
        .unwrap()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

#[test]
fn test_init_creates_database() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());

    let output = run(&config, &["init"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("Database initialized successfully."));
    assert!(dir.path().join("data").join("paperx.sqlite").exists());

    // Idempotent.
    assert!(run(&config, &["init"]).status.success());
}

#[test]
fn test_stats_on_empty_index() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    assert!(run(&config, &["init"]).status.success());

    let output = run(&config, &["stats"]);
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("Collection:  papers"));
    assert!(text.contains("Model:       voyage-2"));
    assert!(text.contains("Chunks:      0"));
    assert!(text.contains("Dimension:   (unset)"));
}

#[test]
fn test_search_without_api_key_prints_no_results() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    assert!(run(&config, &["init"]).status.success());

    let output = run(&config, &["search", "attention heads"]);
    assert!(output.status.success());
    assert_eq!(stdout(&output).trim(), "No results.");

    let output = run(&config, &["search", "attention heads", "--json"]);
    assert!(output.status.success());
    let bundle: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(bundle["chunks"], serde_json::json!([]));
}

#[test]
fn test_ingest_without_api_key_fails_and_records_failure() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    let paper = dir.path().join("paper.json");
    std::fs::write(
        &paper,
        r#"{"paper_id": "p1", "title": "A Paper", "cleaned_text": "Some text here.\n\nMore text."}"#,
    )
    .unwrap();

    let output = run(&config, &["ingest", paper.to_str().unwrap()]);
    assert!(!output.status.success());
    assert!(stdout(&output).contains("failed: 1"));

    let output = run(&config, &["status", "p1"]);
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("status:      failed"));
    assert!(text.contains("VOYAGE_API_KEY"));
}

#[test]
fn test_status_and_delete_unknown_paper_fail() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    assert!(run(&config, &["init"]).status.success());

    assert!(!run(&config, &["status", "missing"]).status.success());
    assert!(!run(&config, &["delete", "missing"]).status.success());

    let output = run(&config, &["papers"]);
    assert!(output.status.success());
    assert_eq!(stdout(&output).trim(), "No papers.");
}

#[test]
fn test_missing_config_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let output = run(&dir.path().join("nope.toml"), &["stats"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Failed to read config file"));
}
