//! End-to-end tests for shipwright CLI commands.
//!
//! Pipeline runs use stub rustup/cargo shell scripts inside a temp
//! directory, so no real toolchain is touched.

#![allow(deprecated)] // Allow deprecated Command::cargo_bin for tests

use assert_cmd::Command;
use predicates::prelude::*;

// =============================================================================
// General CLI Tests
// =============================================================================

#[test]
fn test_help() {
    Command::cargo_bin("shipwright")
        .expect("Failed to find shipwright binary")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("pipeline config"));
}

#[test]
fn test_version() {
    Command::cargo_bin("shipwright")
        .expect("Failed to find shipwright binary")
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("shipwright"));
}

#[test]
fn test_run_nonexistent_config() {
    Command::cargo_bin("shipwright")
        .expect("Failed to find shipwright binary")
        .args(["run", "/nonexistent/shipwright.toml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_plan_nonexistent_config() {
    Command::cargo_bin("shipwright")
        .expect("Failed to find shipwright binary")
        .args(["plan", "/nonexistent/shipwright.toml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

// =============================================================================
// Fixture-backed tests (stub toolchain)
// =============================================================================

#[cfg(unix)]
mod fixtures {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    fn write_exec(path: &Path, script: &str) {
        fs::write(path, script).expect("Failed to write script");
        let mut perms = fs::metadata(path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(path, perms).unwrap();
    }

    /// A config directory with stub rustup/cargo and two packages.
    struct Fixture {
        temp: TempDir,
    }

    impl Fixture {
        fn new(failing_pkg: &str) -> Self {
            let temp = TempDir::new().expect("Failed to create temp directory");

            let rustup = temp.path().join("rustup");
            write_exec(
                &rustup,
                &format!(
                    r#"#!/bin/sh
state="{state}"
case "$1 $2" in
  "toolchain list") [ -f "$state/installed" ] && cat "$state/installed"; exit 0 ;;
  "toolchain install") echo "$3-x86_64-unknown-linux-gnu" >> "$state/installed"; exit 0 ;;
esac
[ "$1" = "run" ] && {{ echo "rustc $2 (stub)"; exit 0; }}
exit 1
"#,
                    state = temp.path().display()
                ),
            );

            let cargo = temp.path().join("cargo");
            write_exec(
                &cargo,
                &format!(
                    r#"#!/bin/sh
pkg=""
prev=""
for arg in "$@"; do
  [ "$prev" = "-p" ] && pkg="$arg"
  prev="$arg"
done
if [ "$pkg" = "{failing_pkg}" ]; then
  echo "error: missing symbol" >&2
  exit 101
fi
mkdir -p target/release
[ "$pkg" = "cli-tool" ] && touch target/release/sw-align
exit 0
"#
                ),
            );

            let config = format!(
                r#"
                    [toolchain]
                    channel = "1.75.0"
                    rustup = "{rustup}"
                    cargo = "{cargo}"
                    ctools = []

                    [workspace]
                    profile = "release"

                    [[workspace.package]]
                    name = "core-library"

                    [[workspace.package]]
                    name = "cli-tool"
                    artifacts = ["sw-align"]
                    depends-on = ["core-library"]
                "#,
                rustup = rustup.display(),
                cargo = cargo.display(),
            );
            fs::write(temp.path().join("shipwright.toml"), config)
                .expect("Failed to write config");

            Self { temp }
        }

        fn config_path(&self) -> PathBuf {
            self.temp.path().join("shipwright.toml")
        }
    }

    #[test]
    fn test_plan_prints_build_order() {
        let fixture = Fixture::new("none");

        let output = Command::cargo_bin("shipwright")
            .expect("Failed to find shipwright binary")
            .args(["plan", fixture.config_path().to_str().unwrap()])
            .output()
            .expect("Failed to execute command");

        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(output.status.success(), "plan should succeed: {stdout}");

        // Dependency order: core-library before cli-tool.
        let core = stdout.find("1. core-library").expect("missing core-library");
        let cli = stdout.find("2. cli-tool").expect("missing cli-tool");
        assert!(core < cli);
        assert!(stdout.contains("rust 1.75.0"));
        assert!(stdout.contains("sw-align"));
    }

    #[test]
    fn test_run_success_exits_zero() {
        let fixture = Fixture::new("none");

        let output = Command::cargo_bin("shipwright")
            .expect("Failed to find shipwright binary")
            .args(["run", fixture.config_path().to_str().unwrap()])
            .output()
            .expect("Failed to execute command");

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(
            output.status.success(),
            "run should succeed. stdout: {stdout} stderr: {stderr}"
        );
        assert!(stdout.contains("Completed"), "stdout: {stdout}");
        assert!(fixture
            .temp
            .path()
            .join(".shipwright/artifacts/sw-align")
            .exists());
    }

    #[test]
    fn test_run_failure_names_package_and_exits_nonzero() {
        let fixture = Fixture::new("core-library");

        let output = Command::cargo_bin("shipwright")
            .expect("Failed to find shipwright binary")
            .args(["run", fixture.config_path().to_str().unwrap()])
            .output()
            .expect("Failed to execute command");

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        assert!(!output.status.success(), "run should fail. stdout: {stdout}");
        assert!(
            stderr.contains("package:core-library"),
            "stderr should name the failing step: {stderr}"
        );
        assert!(
            stdout.contains("missing symbol"),
            "captured diagnostics should surface: {stdout}"
        );
    }

    #[test]
    fn test_run_writes_json_report() {
        let fixture = Fixture::new("none");
        let report_path = fixture.temp.path().join("report.json");

        Command::cargo_bin("shipwright")
            .expect("Failed to find shipwright binary")
            .args([
                "run",
                fixture.config_path().to_str().unwrap(),
                "--report",
                report_path.to_str().unwrap(),
            ])
            .assert()
            .success();

        let report: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&report_path).unwrap())
                .expect("report should be valid JSON");
        let steps = report["steps"].as_array().expect("steps should be array");
        assert!(steps.iter().any(|s| s["status"] == "success"));
    }

    #[test]
    fn test_provision_is_idempotent() {
        let fixture = Fixture::new("none");

        for _ in 0..2 {
            Command::cargo_bin("shipwright")
                .expect("Failed to find shipwright binary")
                .args(["provision", fixture.config_path().to_str().unwrap()])
                .assert()
                .success()
                .stdout(predicate::str::contains("Provisioned"));
        }

        // The stub records one install despite two provision runs.
        let installed = fs::read_to_string(fixture.temp.path().join("installed")).unwrap();
        assert_eq!(installed.lines().count(), 1);
    }

    #[test]
    fn test_clean_removes_working_tree() {
        let fixture = Fixture::new("none");

        Command::cargo_bin("shipwright")
            .expect("Failed to find shipwright binary")
            .args(["run", fixture.config_path().to_str().unwrap()])
            .assert()
            .success();
        assert!(fixture.temp.path().join(".shipwright/artifacts/sw-align").exists());

        Command::cargo_bin("shipwright")
            .expect("Failed to find shipwright binary")
            .args(["clean", fixture.config_path().to_str().unwrap()])
            .assert()
            .success();
        assert!(!fixture.temp.path().join(".shipwright/artifacts/sw-align").exists());
    }
}
