use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::{TempDir, tempdir};

const APPS: &str = r#"{
    "42": {"common": {"name": "Foo", "type": "Game"}, "config": {"installdir": "Foo"}},
    "7": {"common": {"name": "Bar Tool", "type": "Tool"}},
    "10": {"common": {"name": "alpha", "type": "game"}},
    "11": {"common": {"name": "Driver", "type": "Game", "driverversion": "1.0"}}
}"#;

const PACKAGES: &str = r#"{
    "1": {"packageid": "1", "appids": {"0": "42", "1": "7", "2": "10", "3": "11"}}
}"#;

fn seeded_cache() -> TempDir {
    let dir = tempdir().expect("Failed to create cache dir");
    fs::write(dir.path().join("licenses.json"), "[1]").expect("Failed to seed licenses.json");
    fs::write(dir.path().join("pkgs.json"), PACKAGES).expect("Failed to seed pkgs.json");
    fs::write(dir.path().join("apps.json"), APPS).expect("Failed to seed apps.json");
    dir
}

#[test]
fn test_missing_app_record_needs_steamcmd() {
    let cache = seeded_cache();
    fs::write(
        cache.path().join("pkgs.json"),
        r#"{"1": {"appids": {"0": "42", "1": "99"}}}"#,
    )
    .expect("Failed to seed pkgs.json");
    let output = steam_cli(cache.path(), &["show", "--id", "42"]);

    assert!(
        !output.status.success(),
        "An app missing from the cache must be fetched from steamcmd"
    );
}

fn steam_cli(cache: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_steam-cli"))
        .args(args)
        .arg("--cache-dir")
        .arg(cache)
        .arg("--steamcmd")
        .arg("/nonexistent/steamcmd")
        .env_remove("STEAM_CLI_CACHE_DIR")
        .env_remove("STEAM_CLI_USERNAME")
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute steam-cli")
}

#[test]
fn test_show_prints_cached_record() {
    let cache = seeded_cache();
    let output = steam_cli(cache.path(), &["show", "--id", "42"]);

    assert!(
        output.status.success(),
        "steam-cli failed with stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let record: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("show should print JSON");
    assert_eq!(record["common"]["name"], "Foo");
    assert_eq!(record["config"]["installdir"], "Foo");
}

#[test]
fn test_show_by_name() {
    let cache = seeded_cache();
    let output = steam_cli(cache.path(), &["show", "--name", "Bar Tool"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"Tool\""), "Output should be the tool record");
}

#[test]
fn test_list_sorts_by_name() {
    let cache = seeded_cache();
    let output = steam_cli(cache.path(), &["list"]);

    assert!(
        output.status.success(),
        "steam-cli failed with stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert_eq!(String::from_utf8_lossy(&output.stdout), "10\talpha\n42\tFoo\n");
}

#[test]
fn test_list_other_kind() {
    let cache = seeded_cache();
    let output = steam_cli(cache.path(), &["list", "--kind", "tool"]);

    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout), "7\tBar Tool\n");
}

#[test]
fn test_unknown_app() {
    let cache = seeded_cache();
    let output = steam_cli(cache.path(), &["show", "--id", "99"]);

    assert!(!output.status.success(), "Unknown id should fail");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("No application matches '99'"),
        "Unexpected stderr: {stderr}"
    );
}

#[test]
fn test_missing_target() {
    let cache = seeded_cache();
    let output = steam_cli(cache.path(), &["show"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("--id or --name"), "Unexpected stderr: {stderr}");
}

#[test]
fn test_empty_cache_needs_steamcmd() {
    let cache = tempdir().expect("Failed to create cache dir");
    let output = steam_cli(cache.path(), &["list"]);

    assert!(
        !output.status.success(),
        "An empty cache cannot be filled without steamcmd"
    );
}
