//! CLI tests that need no Mercurial installation.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const PATCH_NORMAL: &str = "# HG changeset patch
# User Test User <test@example.com>
# Date 0 0
#      Thu Jan 01 00:00:00 1970 +0000
# Diff Start Line 7
add another file.
diff --git a/test.txt b/test.txt
--- a/test.txt
+++ b/test.txt
@@ -1,1 +1,2 @@
 TEST
+adding another line
";

const PATCH_WITHOUT_STARTLINE: &str = "# HG changeset patch
# User Test User <test@example.com>
# Date 0 0
add another file.
diff --git a/test.txt b/test.txt
";

/// Get a command for running hgland with no user configuration.
fn hgland(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("hgland").unwrap();
    cmd.env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path().join("xdg"))
        .env_remove("HGLAND_CONFIG")
        .env_remove("HGLAND_LOG");
    cmd
}

fn write_patch(dir: &TempDir, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

#[test]
fn help_lists_commands() {
    let home = TempDir::new().unwrap();
    hgland(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("apply"))
        .stdout(predicate::str::contains("inspect"))
        .stdout(predicate::str::contains("outgoing"));
}

#[test]
fn version_flag_works() {
    let home = TempDir::new().unwrap();
    hgland(&home)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("hgland"));
}

#[test]
fn inspect_prints_metadata() {
    let home = TempDir::new().unwrap();
    let patch = write_patch(&home, "normal.patch", PATCH_NORMAL);

    hgland(&home)
        .arg("inspect")
        .arg(&patch)
        .assert()
        .success()
        .stdout(predicate::str::contains("Test User <test@example.com>"))
        .stdout(predicate::str::contains("Diff start line: 7"))
        .stdout(predicate::str::contains("add another file."));
}

#[test]
fn inspect_json_reads_stdin() {
    let home = TempDir::new().unwrap();
    let output = hgland(&home)
        .args(["inspect", "--json", "-"])
        .write_stdin(PATCH_NORMAL)
        .output()
        .unwrap();
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["attribution"]["user"], "Test User <test@example.com>");
    assert_eq!(json["diff_start_line"], 7);
    assert_eq!(json["timestamp"], "1970-01-01T00:00:00+00:00");
    assert_eq!(json["patch_sha256"].as_str().unwrap().len(), 64);
}

#[test]
fn inspect_rejects_missing_start_line() {
    let home = TempDir::new().unwrap();
    let patch = write_patch(&home, "bad.patch", PATCH_WITHOUT_STARTLINE);

    hgland(&home)
        .arg("inspect")
        .arg(&patch)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Diff Start Line"));
}

#[test]
fn apply_rejects_malformed_patch_before_opening_repo() {
    let home = TempDir::new().unwrap();
    let patch = write_patch(&home, "bad.patch", PATCH_WITHOUT_STARTLINE);

    // The repo does not exist; parsing must fail first.
    let output = hgland(&home)
        .args(["apply", "--json", "--repo"])
        .arg(home.path().join("nowhere"))
        .arg(&patch)
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["status"], "structural");
    assert!(json.get("session_id").is_none());
}

#[test]
fn apply_outside_working_copy_fails() {
    let home = TempDir::new().unwrap();
    let patch = write_patch(&home, "normal.patch", PATCH_NORMAL);

    hgland(&home)
        .args(["apply", "--repo"])
        .arg(home.path())
        .arg(&patch)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("no mercurial working copy"));
}

#[test]
fn missing_patch_file_fails() {
    let home = TempDir::new().unwrap();
    hgland(&home)
        .args(["inspect", "does-not-exist.patch"])
        .current_dir(home.path())
        .assert()
        .code(2)
        .stderr(predicate::str::contains("cannot open patch"));
}

#[test]
fn unknown_config_key_is_reported() {
    let home = TempDir::new().unwrap();
    let config = write_patch(&home, "config.toml", "[hg]\nbinray = \"hg\"\n");
    std::fs::create_dir_all(home.path().join(".hg")).unwrap();
    let patch = write_patch(&home, "normal.patch", PATCH_NORMAL);

    hgland(&home)
        .args(["apply", "--config"])
        .arg(&config)
        .arg("--repo")
        .arg(home.path())
        .arg(&patch)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("failed to parse config file"));
}
