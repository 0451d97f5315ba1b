use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

fn archivist_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_archivist"))
}

fn run_cli(args: &[String], envs: &[(&str, &str)]) -> Output {
    let mut cmd = Command::new(archivist_bin());
    cmd.args(args);
    for (key, value) in envs {
        cmd.env(key, value);
    }
    cmd.output().expect("failed to execute archivist CLI")
}

fn assert_cli_success(output: &Output, args: &[String]) {
    assert!(
        output.status.success(),
        "command failed: {}\nstdout:\n{}\nstderr:\n{}",
        args.join(" "),
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
}

fn parse_json_output(output: &Output) -> serde_json::Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let json_start = stdout.find(['{', '[']).unwrap_or_else(|| {
        panic!(
            "no JSON payload found in output\nstdout:\n{}\nstderr:\n{}",
            stdout,
            String::from_utf8_lossy(&output.stderr)
        )
    });
    let mut deserializer = serde_json::Deserializer::from_str(&stdout[json_start..]);
    serde_json::Value::deserialize(&mut deserializer).unwrap_or_else(|err| {
        panic!(
            "failed to parse JSON output: {}\nstdout:\n{}\nstderr:\n{}",
            err,
            stdout,
            String::from_utf8_lossy(&output.stderr)
        )
    })
}

/// An archive root plus an isolated Archivist home.
struct TestArchive {
    home: TempDir,
    root: TempDir,
}

impl TestArchive {
    fn new(files: &[&str]) -> Self {
        let home = TempDir::new().expect("create temp home");
        let root = TempDir::new().expect("create archive root");
        for relative in files {
            let path = root.path().join(relative);
            fs::create_dir_all(path.parent().unwrap()).expect("create parent dir");
            fs::write(&path, relative.as_bytes()).expect("write file");
        }
        Self { home, root }
    }

    fn root(&self) -> &Path {
        self.root.path()
    }

    fn run(&self, args: &[&str]) -> Output {
        let args: Vec<String> = args.iter().map(|arg| arg.to_string()).collect();
        let root = self.root().to_string_lossy().to_string();
        let home = self.home.path().to_string_lossy().to_string();
        run_cli(
            &args,
            &[
                ("ARCHIVIST_ROOT", root.as_str()),
                ("ARCHIVIST_HOME", home.as_str()),
                // Never picks up a real siegfried install.
                ("ARCHIVIST_SIEGFRIED", "archivist-test-no-such-identifier"),
                ("RUST_LOG", "error"),
            ],
        )
    }

    fn run_ok(&self, args: &[&str]) -> Output {
        let output = self.run(args);
        let owned: Vec<String> = args.iter().map(|arg| arg.to_string()).collect();
        assert_cli_success(&output, &owned);
        output
    }

    fn json(&self, args: &[&str]) -> serde_json::Value {
        parse_json_output(&self.run_ok(args))
    }
}

fn originals(archive: &TestArchive) -> Vec<serde_json::Value> {
    archive
        .json(&["search", "@lock @true @false", "--json"])
        .as_array()
        .expect("search output is an array")
        .clone()
}

#[test]
fn test_commands_require_initialized_archive() {
    let archive = TestArchive::new(&["a.txt"]);
    let output = archive.run(&["search", "@lock @false", "--json"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("archivist init"), "stderr:\n{}", stderr);
}

#[test]
fn test_identify_registers_unidentified_files_as_manual() {
    let archive = TestArchive::new(&["docs/b.txt", "A.txt", "docs/c.txt"]);
    archive.run_ok(&["init"]);
    archive.run_ok(&["identify"]);

    let records = originals(&archive);
    let paths: Vec<&str> = records
        .iter()
        .map(|record| record["relative_path"].as_str().unwrap())
        .collect();
    assert_eq!(paths, vec!["A.txt", "docs/b.txt", "docs/c.txt"]);
    for record in &records {
        assert_eq!(record["kind"], "original");
        assert_eq!(record["action"], "manual");
        assert!(record["puid"].is_null());
    }

    // Nothing new the second time.
    archive.run_ok(&["identify"]);
    assert_eq!(originals(&archive).len(), 3);
}

#[test]
fn test_lock_then_rollback_via_runs() {
    let archive = TestArchive::new(&["one.doc", "two.doc"]);
    archive.run_ok(&["init"]);
    archive.run_ok(&["identify"]);

    let output = archive.run(&["edit", "lock", "@relative_path one.doc", ""]);
    assert!(!output.status.success(), "edits need a reason");

    archive.run_ok(&["edit", "lock", "@relative_path one.doc", "hold for review"]);
    let locked: Vec<bool> = originals(&archive)
        .iter()
        .map(|record| record["lock"].as_bool().unwrap())
        .collect();
    assert_eq!(locked, vec![true, false]);

    let runs = archive.json(&["log", "--runs", "--json"]);
    let runs = runs.as_array().expect("runs output is an array");
    assert_eq!(runs[0]["index"], 1);
    assert_eq!(runs[0]["command"], "archivist.edit.lock");
    assert_eq!(runs[0]["reason"], "hold for review");
    assert_eq!(runs[0]["rollback"], "");

    archive.run_ok(&["edit", "rollback", "1", "locked by mistake"]);
    assert!(originals(&archive)
        .iter()
        .all(|record| record["lock"] == false));

    let runs = archive.json(&["log", "--runs", "--json"]);
    let runs = runs.as_array().expect("runs output is an array");
    assert_eq!(runs[0]["command"], "archivist.edit.rollback");
    assert!(runs[0]["index"].is_null());
    assert_eq!(runs[1]["command"], "archivist.edit.lock");
    assert_eq!(runs[1]["rollback"], "rolled back");
}

#[test]
fn test_dry_run_edit_changes_nothing() {
    let archive = TestArchive::new(&["scan"]);
    archive.run_ok(&["init"]);
    archive.run_ok(&["identify"]);

    archive.run_ok(&[
        "edit",
        "rename",
        ".tif",
        "@relative_path scan",
        "scanner output",
        "--dry-run",
    ]);
    assert!(archive.root().join("scan").is_file());
    assert_eq!(originals(&archive)[0]["relative_path"], "scan");

    archive.run_ok(&["edit", "rename", ".tif", "@relative_path scan", "scanner output"]);
    assert!(archive.root().join("scan.tif").is_file());
    assert_eq!(originals(&archive)[0]["relative_path"], "scan.tif");
}
