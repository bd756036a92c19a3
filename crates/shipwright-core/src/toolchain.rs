//! Toolchain provisioning.
//!
//! Acquires and pins the Rust toolchain through rustup, and verifies the
//! host C toolchain. Provisioning produces an explicit [`ToolchainEnv`]
//! that the builders take as a parameter; no process-wide environment is
//! mutated, so no build can start before its toolchain exists.

use std::path::PathBuf;
use std::process::Command;

use crate::config::ToolchainConfig;
use crate::error::{Error, Result};

/// The environment a provisioned toolchain exposes to the builders.
///
/// Exactly one toolchain version is active per environment: the pin is the
/// `RUSTUP_TOOLCHAIN` value applied to every cargo invocation, so
/// re-provisioning with a different channel replaces the pin rather than
/// coexisting with it.
#[derive(Debug, Clone)]
pub struct ToolchainEnv {
    /// Pinned toolchain channel, e.g. `1.75.0`.
    channel: String,

    /// Cargo binary to invoke.
    cargo: PathBuf,

    /// Isolated rustup root, if configured.
    rustup_home: Option<PathBuf>,

    /// Isolated cargo root, if configured.
    cargo_home: Option<PathBuf>,

    /// `rustc --version` output captured at verification time.
    rustc_version: String,
}

impl ToolchainEnv {
    /// Environment for a host whose toolchain is already pinned outside
    /// shipwright (e.g. a CI runner with a fixed rust-toolchain file).
    /// Prefer [`ToolchainProvisioner::provision`], which verifies the pin.
    pub fn pre_provisioned(channel: impl Into<String>, cargo: impl Into<PathBuf>) -> Self {
        Self {
            channel: channel.into(),
            cargo: cargo.into(),
            rustup_home: None,
            cargo_home: None,
            rustc_version: String::new(),
        }
    }

    /// The pinned channel.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// The verified compiler version string.
    pub fn rustc_version(&self) -> &str {
        &self.rustc_version
    }

    /// Apply the pin and roots to a command.
    pub fn apply(&self, cmd: &mut Command) {
        cmd.env("RUSTUP_TOOLCHAIN", &self.channel);
        if let Some(home) = &self.rustup_home {
            cmd.env("RUSTUP_HOME", home);
        }
        if let Some(home) = &self.cargo_home {
            cmd.env("CARGO_HOME", home);
        }
    }

    /// A cargo command with the toolchain pin applied.
    pub fn cargo_command(&self) -> Command {
        let mut cmd = Command::new(&self.cargo);
        self.apply(&mut cmd);
        cmd
    }
}

/// Provisions the pinned Rust toolchain.
pub struct ToolchainProvisioner {
    config: ToolchainConfig,
    rustup: PathBuf,
}

impl ToolchainProvisioner {
    /// Create a provisioner, locating rustup.
    pub fn new(config: &ToolchainConfig) -> Result<Self> {
        let rustup = match &config.rustup {
            Some(path) => path.clone(),
            None => Self::find_rustup().ok_or_else(|| Error::Provision {
                toolchain: config.channel.clone(),
                message: "rustup not found in PATH".to_string(),
            })?,
        };

        Ok(Self {
            config: config.clone(),
            rustup,
        })
    }

    /// Find rustup in PATH, falling back to the conventional cargo home.
    fn find_rustup() -> Option<PathBuf> {
        which::which("rustup").ok().or_else(|| {
            dirs::home_dir()
                .map(|home| home.join(".cargo/bin/rustup"))
                .filter(|path| path.exists())
        })
    }

    /// Acquire the toolchain if absent, then verify it.
    ///
    /// Idempotent: re-running against an already-provisioned root is a
    /// logged no-op success.
    pub fn provision(&self) -> Result<ToolchainEnv> {
        let channel = &self.config.channel;

        let installed = self.installed_toolchains()?;
        if toolchain_installed(&installed, channel) {
            tracing::info!("toolchain {} already provisioned", channel);
        } else {
            tracing::info!("installing toolchain {}", channel);
            self.install()?;
        }

        let rustc_version = self.verify()?;
        tracing::debug!("pinned {}", rustc_version);

        let cargo = self
            .config
            .cargo
            .clone()
            .unwrap_or_else(|| PathBuf::from("cargo"));

        Ok(ToolchainEnv {
            channel: channel.clone(),
            cargo,
            rustup_home: self.config.rustup_home.clone(),
            cargo_home: self.config.cargo_home.clone(),
            rustc_version,
        })
    }

    /// Query rustup for the installed toolchain list.
    fn installed_toolchains(&self) -> Result<String> {
        let output = self
            .rustup_command()
            .args(["toolchain", "list"])
            .output()
            .map_err(|e| Error::Provision {
                toolchain: self.config.channel.clone(),
                message: format!("failed to run rustup: {e}"),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Provision {
                toolchain: self.config.channel.clone(),
                message: format!("rustup toolchain list failed: {}", stderr.trim()),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn install(&self) -> Result<()> {
        let output = self
            .rustup_command()
            .args([
                "toolchain",
                "install",
                &self.config.channel,
                "--profile",
                "minimal",
                "--no-self-update",
            ])
            .output()
            .map_err(|e| Error::Provision {
                toolchain: self.config.channel.clone(),
                message: format!("failed to run rustup: {e}"),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Provision {
                toolchain: self.config.channel.clone(),
                message: format!("toolchain install failed: {}", stderr.trim()),
            });
        }

        Ok(())
    }

    /// Query the pinned toolchain for its compiler version.
    fn verify(&self) -> Result<String> {
        let output = self
            .rustup_command()
            .args(["run", &self.config.channel, "rustc", "--version"])
            .output()
            .map_err(|e| Error::Provision {
                toolchain: self.config.channel.clone(),
                message: format!("failed to run rustc: {e}"),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Provision {
                toolchain: self.config.channel.clone(),
                message: format!("toolchain verification failed: {}", stderr.trim()),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn rustup_command(&self) -> Command {
        let mut cmd = Command::new(&self.rustup);
        if let Some(home) = &self.config.rustup_home {
            cmd.env("RUSTUP_HOME", home);
        }
        if let Some(home) = &self.config.cargo_home {
            cmd.env("CARGO_HOME", home);
        }
        cmd
    }
}

/// Check a `rustup toolchain list` output for an installed channel.
///
/// Rustup prints fully-qualified names like
/// `1.75.0-x86_64-unknown-linux-gnu (default)`, so a channel matches either
/// exactly or as a `<channel>-<target>` prefix.
fn toolchain_installed(list_output: &str, channel: &str) -> bool {
    list_output.lines().any(|line| {
        let name = line.split_whitespace().next().unwrap_or("");
        name == channel || name.starts_with(&format!("{channel}-"))
    })
}

/// Verify the host C toolchain: every required tool must resolve, and its
/// version banner is captured for the report.
pub fn verify_host_tools(tools: &[String]) -> Result<Vec<(String, String)>> {
    let mut versions = Vec::with_capacity(tools.len());

    for tool in tools {
        let path = which::which(tool).map_err(|_| Error::Provision {
            toolchain: tool.clone(),
            message: format!("{tool} not found in PATH"),
        })?;

        let output = Command::new(&path)
            .arg("--version")
            .output()
            .map_err(|e| Error::Provision {
                toolchain: tool.clone(),
                message: format!("failed to run {tool}: {e}"),
            })?;

        if !output.status.success() {
            return Err(Error::Provision {
                toolchain: tool.clone(),
                message: format!("{tool} --version failed"),
            });
        }

        let banner = String::from_utf8_lossy(&output.stdout)
            .lines()
            .next()
            .unwrap_or("")
            .to_string();
        tracing::debug!("{tool}: {banner}");
        versions.push((tool.clone(), banner));
    }

    Ok(versions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toolchain_installed_exact() {
        let list = "stable-x86_64-unknown-linux-gnu (default)\n1.75.0-x86_64-unknown-linux-gnu\n";
        assert!(toolchain_installed(list, "1.75.0"));
        assert!(toolchain_installed(list, "stable"));
        assert!(!toolchain_installed(list, "1.74.0"));
    }

    #[test]
    fn test_toolchain_installed_no_false_prefix() {
        let list = "1.75.0-x86_64-unknown-linux-gnu\n";
        // "1.7" is not the channel "1.75.0" and must not match.
        assert!(!toolchain_installed(list, "1.7"));
    }

    #[test]
    fn test_toolchain_installed_empty() {
        assert!(!toolchain_installed("", "stable"));
        assert!(!toolchain_installed("no toolchains installed\n", "stable"));
    }

    #[cfg(unix)]
    mod stubbed {
        use super::*;
        use crate::config::PipelineConfig;
        use std::fs;
        use std::os::unix::fs::PermissionsExt;
        use tempfile::TempDir;

        /// A fake rustup that records invocations and keeps install state
        /// in marker files, so idempotence is observable.
        fn write_stub_rustup(dir: &std::path::Path) -> std::path::PathBuf {
            let path = dir.join("rustup");
            let script = format!(
                r#"#!/bin/sh
state="{state}"
echo "$@" >> "$state/calls.log"
case "$1 $2" in
  "toolchain list")
    [ -f "$state/installed" ] && cat "$state/installed"
    exit 0
    ;;
  "toolchain install")
    echo "$3-x86_64-unknown-linux-gnu" >> "$state/installed"
    exit 0
    ;;
esac
case "$1" in
  run)
    echo "rustc $2 (stub)"
    exit 0
    ;;
esac
exit 1
"#,
                state = dir.display()
            );
            fs::write(&path, script).unwrap();
            let mut perms = fs::metadata(&path).unwrap().permissions();
            perms.set_mode(0o755);
            fs::set_permissions(&path, perms).unwrap();
            path
        }

        fn config_with_rustup(rustup: &std::path::Path) -> ToolchainConfig {
            let text = format!(
                r#"
                    [toolchain]
                    channel = "1.75.0"
                    rustup = "{}"

                    [[workspace.package]]
                    name = "core-library"
                "#,
                rustup.display()
            );
            PipelineConfig::parse(&text).unwrap().toolchain
        }

        #[test]
        fn test_provision_installs_then_noops() {
            let temp = TempDir::new().unwrap();
            let rustup = write_stub_rustup(temp.path());
            let config = config_with_rustup(&rustup);

            let provisioner = ToolchainProvisioner::new(&config).unwrap();

            let env = provisioner.provision().unwrap();
            assert_eq!(env.channel(), "1.75.0");
            assert!(env.rustc_version().contains("rustc 1.75.0"));

            // Second run must not install again.
            provisioner.provision().unwrap();

            let calls = fs::read_to_string(temp.path().join("calls.log")).unwrap();
            let installs = calls
                .lines()
                .filter(|l| l.starts_with("toolchain install"))
                .count();
            assert_eq!(installs, 1, "re-provision must be a no-op:\n{calls}");
        }

        #[test]
        fn test_missing_rustup_is_provision_error() {
            let temp = TempDir::new().unwrap();
            let mut config = config_with_rustup(&temp.path().join("rustup"));
            config.rustup = Some(temp.path().join("does-not-exist"));

            let provisioner = ToolchainProvisioner::new(&config).unwrap();
            let err = provisioner.provision().unwrap_err();
            assert!(matches!(err, Error::Provision { .. }));
        }
    }
}
