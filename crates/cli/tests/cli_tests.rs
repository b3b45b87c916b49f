// Binary-level tests: exit codes and stderr contract.
// Run with: cargo test -p gorodindex-cli --test cli_tests

use std::path::Path;
use std::process::{Command, Output};

use httpmock::prelude::*;

use gorodindex_io::Store;

fn gorodindex(config: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_gorodindex"))
        .arg("--config")
        .arg(config)
        .args(args)
        .env_remove("GORODINDEX_EMAIL")
        .env_remove("GORODINDEX_CONFIG")
        .env("RUST_LOG", "off")
        .output()
        .expect("failed to run gorodindex")
}

fn write_config(dir: &Path, body: &str) -> std::path::PathBuf {
    let path = dir.join("settings.toml");
    std::fs::write(&path, body).unwrap();
    path
}

#[test]
fn fetch_with_missing_inputs_exits_before_network() {
    let server = MockServer::start();
    let geocoder = server.mock(|when, then| {
        when.method(GET).path("/search");
        then.status(200).json_body(serde_json::json!([]));
    });

    let dir = tempfile::tempdir().unwrap();
    let config = write_config(
        dir.path(),
        &format!(
            "store_path = {:?}\n\n[inputs]\ndata_dir = {:?}\n\n[geocoder]\nurl = {:?}\n\n[overpass]\nurl = {:?}\n",
            dir.path().join("store.sqlite3").display().to_string(),
            dir.path().join("no-such-dir").display().to_string(),
            server.url("/search"),
            server.url("/api/interpreter"),
        ),
    );

    let output = gorodindex(&config, &["fetch"]);

    assert_eq!(output.status.code(), Some(3));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("error: input file not found"), "stderr: {stderr}");
    assert!(stderr.contains("hint:"), "stderr: {stderr}");
    geocoder.assert_calls(0);
    assert!(!dir.path().join("store.sqlite3").exists());
}

#[test]
fn invalid_settings_exit_with_config_code() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(
        dir.path(),
        "[reconcile]\nmin_population = 50000\nmax_population = 10000\n",
    );

    let output = gorodindex(&config, &["config"]);

    assert_eq!(output.status.code(), Some(12));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("invalid settings"), "stderr: {stderr}");
}

#[test]
fn missing_config_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let output = gorodindex(&dir.path().join("absent.toml"), &["config"]);
    assert_eq!(output.status.code(), Some(10));
}

#[test]
fn config_prints_effective_settings_with_email_override() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "data_year = 2022\n");

    let output = Command::new(env!("CARGO_BIN_EXE_gorodindex"))
        .arg("--config")
        .arg(&config)
        .arg("config")
        .env("GORODINDEX_EMAIL", "ops@example.org")
        .output()
        .expect("failed to run gorodindex");

    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("contact_email = \"ops@example.org\""), "stdout: {stdout}");
    assert!(stdout.contains("data_year = 2022"), "stdout: {stdout}");
}

#[test]
fn list_rejects_inverted_population_range() {
    let dir = tempfile::tempdir().unwrap();
    let store_path = dir.path().join("store.sqlite3");
    Store::open(&store_path).unwrap();
    let config = write_config(
        dir.path(),
        &format!("store_path = {:?}\n", store_path.display().to_string()),
    );

    let output = gorodindex(&config, &["list", "--min", "50000", "--max", "10000"]);

    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn list_on_empty_store_prints_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let store_path = dir.path().join("store.sqlite3");
    Store::open(&store_path).unwrap();
    let config = write_config(
        dir.path(),
        &format!("store_path = {:?}\n", store_path.display().to_string()),
    );

    let output = gorodindex(&config, &["list", "--json"]);

    assert_eq!(output.status.code(), Some(0));
    let rows: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(rows, serde_json::json!([]));
}
