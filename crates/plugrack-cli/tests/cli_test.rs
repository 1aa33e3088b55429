//! Tests for the plugrack command-line interface.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use plugrack_sdk::record::encode;
use predicates::prelude::*;
use tempfile::TempDir;

fn so(stem: &str) -> String {
    format!("{stem}{}", std::env::consts::DLL_SUFFIX)
}

/// Write a file that carries a module record but is not a loadable library.
fn write_module(dir: &Path, stem: &str, full_type: &str, plugin_id: u32) -> PathBuf {
    let path = dir.join(so(stem));
    let mut bytes = b"\x7fELF header noise".to_vec();
    bytes.extend_from_slice(&encode(full_type, plugin_id, "1.4.0", "*", "Test module"));
    std::fs::write(&path, bytes).unwrap();
    path
}

fn plugrack() -> Command {
    let mut cmd = Command::cargo_bin("plugrack").unwrap();
    cmd.env_remove("PLUGRACK_CONFIG")
        .env_remove("PLUGRACK_PLUGIN_DIR")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_cli_help() {
    plugrack()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("list"))
        .stdout(predicate::str::contains("probe"))
        .stdout(predicate::str::contains("check"));
}

#[test]
fn test_cli_version() {
    plugrack()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("plugrack"));
}

#[test]
fn test_no_subcommand_shows_error() {
    plugrack().assert().failure().code(2);
}

#[test]
fn test_probe_prints_record() {
    let dir = TempDir::new().unwrap();
    let path = write_module(dir.path(), "checkpoint_blcr", "checkpoint/blcr", 101);

    plugrack()
        .arg("probe")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("checkpoint/blcr"))
        .stdout(predicate::str::contains("1.4.0"))
        .stdout(predicate::str::contains("101"));
}

#[test]
fn test_probe_json() {
    let dir = TempDir::new().unwrap();
    let path = write_module(dir.path(), "namespace_tmpfs", "namespace/tmpfs", 0);

    let output = plugrack()
        .arg("probe")
        .arg(&path)
        .arg("--json")
        .output()
        .unwrap();
    assert!(output.status.success());

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["full_type"], "namespace/tmpfs");
    assert_eq!(value["layout"], 1);
}

#[test]
fn test_probe_rejects_plain_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(so("checkpoint_blcr"));
    std::fs::write(&path, b"no record here").unwrap();

    plugrack()
        .arg("probe")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("no module record"));
}

#[test]
fn test_list_category() {
    let dir = TempDir::new().unwrap();
    write_module(dir.path(), "checkpoint_blcr", "checkpoint/blcr", 0);
    write_module(dir.path(), "checkpoint_none", "checkpoint/none", 0);
    write_module(dir.path(), "mpi_pmix", "mpi/pmix", 0);

    plugrack()
        .arg("list")
        .arg("checkpoint")
        .arg("--dir")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("checkpoint/blcr"))
        .stdout(predicate::str::contains("checkpoint/none"))
        .stdout(predicate::str::contains("mpi/pmix").not())
        .stdout(predicate::str::contains("2 plugin(s)"));
}

#[test]
fn test_list_json() {
    let dir = TempDir::new().unwrap();
    write_module(dir.path(), "job_submit_lua", "job_submit/lua", 7);

    let output = plugrack()
        .args(["list", "job_submit", "--json", "--dir"])
        .arg(dir.path())
        .output()
        .unwrap();
    assert!(output.status.success());

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let modules = value.as_array().unwrap();
    assert_eq!(modules.len(), 1);
    assert_eq!(modules[0]["full_type"], "job_submit/lua");
    assert_eq!(modules[0]["plugin_id"], 7);
    assert_eq!(modules[0]["loaded"], false);
}

#[test]
fn test_list_empty_directory() {
    let dir = TempDir::new().unwrap();

    plugrack()
        .args(["list", "checkpoint", "--dir"])
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("(none)"));
}

#[test]
fn test_list_uses_environment_search_path() {
    let dir = TempDir::new().unwrap();
    write_module(dir.path(), "checkpoint_blcr", "checkpoint/blcr", 0);

    plugrack()
        .env("PLUGRACK_PLUGIN_DIR", dir.path())
        .args(["list", "checkpoint"])
        .assert()
        .success()
        .stdout(predicate::str::contains("checkpoint/blcr"));
}

#[test]
fn test_list_uses_config_file() {
    let dir = TempDir::new().unwrap();
    let plugins = dir.path().join("plugins");
    std::fs::create_dir(&plugins).unwrap();
    write_module(&plugins, "checkpoint_blcr", "checkpoint/blcr", 0);

    let config = dir.path().join("plugrack.toml");
    std::fs::write(&config, format!("plugin_dir = \"{}\"\n", plugins.display())).unwrap();

    plugrack()
        .arg("--config")
        .arg(&config)
        .args(["list", "checkpoint"])
        .assert()
        .success()
        .stdout(predicate::str::contains("checkpoint/blcr"));
}

#[test]
fn test_bad_config_file() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("plugrack.toml");
    std::fs::write(&config, "plugins = 3\n").unwrap();

    plugrack()
        .arg("--config")
        .arg(&config)
        .args(["list", "checkpoint"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("configuration"));
}

#[test]
fn test_check_requires_symbols() {
    plugrack()
        .args(["check", "checkpoint/blcr"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("--symbols"));
}

#[test]
fn test_check_missing_module() {
    let dir = TempDir::new().unwrap();

    plugrack()
        .args(["check", "nope", "--category", "checkpoint", "--symbols", "checkpoint_init"])
        .arg("--dir")
        .arg(dir.path())
        .assert()
        .failure()
        .stdout(predicate::str::contains("FAILED"))
        .stdout(predicate::str::contains("checkpoint plugin 'checkpoint/nope' not found"));
}

#[test]
fn test_check_unloadable_module() {
    let dir = TempDir::new().unwrap();
    let path = write_module(dir.path(), "checkpoint_blcr", "checkpoint/blcr", 0);

    plugrack()
        .args(["check", "checkpoint/blcr", "--symbols", "checkpoint_init,checkpoint_fini"])
        .arg("--dir")
        .arg(dir.path())
        .assert()
        .failure()
        .stdout(predicate::str::contains(
            "checkpoint plugin 'checkpoint/blcr' failed to load: dynamic linker rejected the module",
        ))
        .stdout(predicate::str::contains(path.to_string_lossy().into_owned()).not());
}

#[test]
fn test_check_rejects_bad_type() {
    plugrack()
        .args(["check", "blcr", "--symbols", "checkpoint_init"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid plugin type"));
}
