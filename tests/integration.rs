use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn atlascope_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("atlascope");
    path
}

fn setup_test_env_with(extra: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/atlascope.sqlite"

[server]
bind = "127.0.0.1:7331"

[logging]
level = "warn"
{}
"#,
        root.display(),
        extra
    );

    let config_path = config_dir.join("atlascope.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn setup_test_env() -> (TempDir, PathBuf) {
    setup_test_env_with("")
}

fn run_atlascope(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = atlascope_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run atlascope binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_creates_database() {
    let (tmp, config) = setup_test_env();
    let (stdout, stderr, success) = run_atlascope(&config, &["init"]);
    assert!(success, "init failed: {}", stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/atlascope.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config) = setup_test_env();
    let (_, _, first) = run_atlascope(&config, &["init"]);
    let (_, stderr, second) = run_atlascope(&config, &["init"]);
    assert!(first);
    assert!(second, "second init failed: {}", stderr);
}

#[test]
fn test_get_missing_report() {
    let (_tmp, config) = setup_test_env();
    run_atlascope(&config, &["init"]);
    let (_, stderr, success) = run_atlascope(&config, &["get", "999999"]);
    assert!(!success);
    assert!(stderr.contains("report not found: 999999"));
}

#[test]
fn test_last_updated_on_empty_store() {
    let (_tmp, config) = setup_test_env();
    run_atlascope(&config, &["init"]);
    let (stdout, stderr, success) = run_atlascope(&config, &["last-updated"]);
    assert!(success, "last-updated failed: {}", stderr);
    assert!(stdout.contains("No reports stored yet."));
}

#[test]
fn test_recent_on_empty_store() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, success) = run_atlascope(&config, &["recent", "--days", "3"]);
    assert!(success, "recent failed: {}", stderr);
    assert!(stdout.contains("No reports since"));
}

#[test]
fn test_reset_then_reads_still_work() {
    let (_tmp, config) = setup_test_env();
    run_atlascope(&config, &["init"]);
    let (stdout, stderr, success) = run_atlascope(&config, &["reset"]);
    assert!(success, "reset failed: {}", stderr);
    assert!(stdout.contains("dropped"));

    let (stdout, _, success) = run_atlascope(&config, &["last-updated"]);
    assert!(success);
    assert!(stdout.contains("No reports stored yet."));
}

#[test]
fn test_query_errors_when_model_disabled() {
    let (_tmp, config) = setup_test_env();
    run_atlascope(&config, &["init"]);
    let (stdout, stderr, success) =
        run_atlascope(&config, &["query", "floods in Kenya", "--authenticated"]);
    assert!(!success);
    assert!(stdout.is_empty());
    assert!(stderr.contains("disabled"), "stderr: {}", stderr);
}

#[test]
fn test_invalid_page_size_rejected() {
    let (_tmp, config) = setup_test_env_with("\n[feed]\npage_size = 5000\n");
    let (_, stderr, success) = run_atlascope(&config, &["init"]);
    assert!(!success);
    assert!(stderr.contains("feed.page_size"));
}

#[test]
fn test_backfill_rejects_both_days_and_hours() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, success) =
        run_atlascope(&config, &["backfill", "--days", "1", "--hours", "2"]);
    assert!(!success);
    assert!(stderr.contains("cannot be used with"));
}

#[test]
fn test_missing_config_file() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("nope.toml");
    let (_, stderr, success) = run_atlascope(&missing, &["init"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}

#[test]
fn test_recent_rejects_unbounded_days() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, success) = run_atlascope(&config, &["recent", "--days", "100000000"]);
    assert!(!success);
    assert!(stderr.contains("days must be between"), "stderr: {}", stderr);
}
