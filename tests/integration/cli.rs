//! Integration tests for the `luahost` binary

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::TempDir;

/// Helper function to create a file inside the test directory
fn create_test_file(
    dir: &TempDir,
    name: &str,
    content: &str,
) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

/// Run the binary with an explicit config so the user's own config and
/// environment never leak into the test.
fn run_luahost(
    config: &Path,
    args: &[&str],
) -> Output {
    Command::new(env!("CARGO_BIN_EXE_luahost"))
        .arg("--config")
        .arg(config)
        .args(args)
        .env_remove("LUAHOST_LOG")
        .output()
        .unwrap()
}

fn default_config(dir: &TempDir) -> PathBuf {
    create_test_file(dir, "config.toml", "[log]\nlevel = \"error\"\n")
}

#[test]
fn test_eval_prints_values() {
    let dir = TempDir::new().unwrap();
    let config = default_config(&dir);

    let output = run_luahost(&config, &["eval", "return 40 + 2, 'done'"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.lines().collect::<Vec<_>>(), vec!["42", "done"]);
}

#[test]
fn test_run_file() {
    let dir = TempDir::new().unwrap();
    let config = default_config(&dir);
    let script = create_test_file(&dir, "main.lua", "return host_version() ~= nil, 7");

    let output = run_luahost(&config, &["run", script.to_str().unwrap()]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.lines().collect::<Vec<_>>(), vec!["true", "7"]);
}

#[test]
fn test_run_missing_file_fails() {
    let dir = TempDir::new().unwrap();
    let config = default_config(&dir);
    let missing = dir.path().join("absent.lua");

    let output = run_luahost(&config, &["run", missing.to_str().unwrap()]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("absent.lua"));
}

#[test]
fn test_exit_policy_terminates_with_diagnostic() {
    let dir = TempDir::new().unwrap();
    let config = create_test_file(
        &dir,
        "config.toml",
        "[bridge]\nfault_policy = \"exit\"\n\n[log]\nlevel = \"error\"\n",
    );

    let output = run_luahost(&config, &["eval", "error('boom')"]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("boom"));
    assert!(stderr.contains("stack traceback:"));
    assert!(output.stdout.is_empty());
}

#[test]
fn test_propagate_policy_reports_error() {
    let dir = TempDir::new().unwrap();
    let config = default_config(&dir);

    let output = run_luahost(&config, &["eval", "error('boom')"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Failed to evaluate code"));
    assert!(stderr.contains("boom"));
}

#[test]
fn test_preload_module() {
    let dir = TempDir::new().unwrap();
    let config = default_config(&dir);
    let module = create_test_file(&dir, "m.lua", "return { x = 42 }");
    let preload = format!("m={}", module.display());

    let output = run_luahost(
        &config,
        &["--preload", &preload, "eval", "return require('m').x"],
    );
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "42");
}

#[test]
fn test_malformed_preload_is_rejected() {
    let dir = TempDir::new().unwrap();
    let config = default_config(&dir);

    for entry in ["nonsense", "=path.lua", "name="] {
        let output = run_luahost(&config, &["--preload", entry, "eval", "return 1"]);
        assert!(!output.status.success());
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(stderr.contains("expected NAME=PATH"));
        assert!(output.stdout.is_empty());
    }
}

#[test]
fn test_version() {
    let dir = TempDir::new().unwrap();
    let config = default_config(&dir);

    let output = run_luahost(&config, &["version"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("luahost "));
}
