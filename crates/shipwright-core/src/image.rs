//! Deliverable image assembly.
//!
//! Assembly is declarative: each assembler stages a build context directory
//! (artifacts, scripts, the binding package), renders a Containerfile from
//! the descriptor, and writes an `image.json` manifest. The only build
//! logic is input verification — a missing declared input or a failed
//! install check is fatal, with no retries.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use rustc_hash::FxHashSet;
use serde::Serialize;

use crate::artifact::ArtifactSet;
use crate::config::{ToolImageConfig, WorkstationImageConfig};
use crate::error::{Error, Result};

/// A staged image build context.
#[derive(Debug)]
pub struct AssembledImage {
    pub name: String,
    pub context_dir: PathBuf,
    pub containerfile: PathBuf,
    /// Artifacts left out because their producer failed under a
    /// best-effort policy. Empty on a fully successful run.
    pub omitted: Vec<String>,
}

/// Written alongside the Containerfile for downstream tooling.
#[derive(Debug, Serialize)]
struct ImageManifest<'a> {
    name: &'a str,
    base: &'a str,
    artifacts: Vec<&'a str>,
    omitted: &'a [String],
    entrypoint: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    binding: Option<BindingManifest<'a>>,
}

#[derive(Debug, Serialize)]
struct BindingManifest<'a> {
    name: &'a str,
    version: &'a str,
}

/// Assemble the headless tool image from the collected artifact set.
///
/// Every artifact the descriptor declares must be present in the set,
/// unless it is named in `tolerated_absent` — those were lost to a
/// best-effort failure and are omitted, producing a degraded image rather
/// than an error.
pub fn assemble_tool(
    config: &ToolImageConfig,
    artifacts: &ArtifactSet,
    tolerated_absent: &FxHashSet<String>,
    context_dir: &Path,
) -> Result<AssembledImage> {
    let name = "tool";
    let staging = reset_context(name, context_dir)?;
    let bin_dir = staging.join("artifacts");
    fs::create_dir_all(&bin_dir)?;

    let mut included = Vec::new();
    let mut omitted = Vec::new();

    for artifact in &config.artifacts {
        match artifacts.get(artifact) {
            Some(source) => {
                fs::copy(source, bin_dir.join(artifact))?;
                included.push(artifact.as_str());
            }
            None if tolerated_absent.contains(artifact) => {
                tracing::warn!("tool image ships without {artifact}");
                omitted.push(artifact.clone());
            }
            None => {
                return Err(Error::Assemble {
                    image: name.to_string(),
                    message: format!("declared artifact '{artifact}' is not in the collected set"),
                });
            }
        }
    }

    let containerfile = staging.join("Containerfile");
    fs::write(&containerfile, render_tool_containerfile(config, &included))?;

    write_manifest(
        &staging,
        &ImageManifest {
            name,
            base: &config.base,
            artifacts: included,
            omitted: &omitted,
            entrypoint: &config.entrypoint,
            binding: None,
        },
    )?;

    run_build_command(name, &config.build_command, &staging)?;

    Ok(AssembledImage {
        name: name.to_string(),
        context_dir: staging,
        containerfile,
        omitted,
    })
}

/// Assemble the workstation image around the opaque binding package.
///
/// The binding package is not inspected; its install command is run once
/// as an installability check, and a non-zero exit fails the assembly.
pub fn assemble_workstation(
    config: &WorkstationImageConfig,
    binding_path: &Path,
    launch_script: &Path,
    context_dir: &Path,
) -> Result<AssembledImage> {
    let name = "workstation";

    let missing_input = |what: &str, path: &Path| Error::Assemble {
        image: name.to_string(),
        message: format!("{what} not found at {}", path.display()),
    };

    if !binding_path.exists() {
        return Err(missing_input("binding package", binding_path));
    }
    if !launch_script.exists() {
        return Err(missing_input("launch script", launch_script));
    }

    verify_installable(name, config, binding_path)?;

    let staging = reset_context(name, context_dir)?;

    let binding_file = file_name(name, binding_path)?;
    let script_file = file_name(name, launch_script)?;
    fs::copy(binding_path, staging.join(&binding_file))?;
    fs::copy(launch_script, staging.join(&script_file))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let script = staging.join(&script_file);
        let mut perms = fs::metadata(&script)?.permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&script, perms)?;
    }

    // The launch script is the default command unless the descriptor
    // overrides it.
    let entrypoint = if config.entrypoint.is_empty() {
        vec![format!("/usr/local/bin/{script_file}")]
    } else {
        config.entrypoint.clone()
    };

    let containerfile = staging.join("Containerfile");
    fs::write(
        &containerfile,
        render_workstation_containerfile(config, &binding_file, &script_file, &entrypoint),
    )?;

    write_manifest(
        &staging,
        &ImageManifest {
            name,
            base: &config.base,
            artifacts: Vec::new(),
            omitted: &[],
            entrypoint: &entrypoint,
            binding: Some(BindingManifest {
                name: &config.binding.name,
                version: &config.binding.version,
            }),
        },
    )?;

    run_build_command(name, &config.build_command, &staging)?;

    Ok(AssembledImage {
        name: name.to_string(),
        context_dir: staging,
        containerfile,
        omitted: Vec::new(),
    })
}

fn file_name(image: &str, path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| Error::Assemble {
            image: image.to_string(),
            message: format!("cannot determine file name for {}", path.display()),
        })
}

/// Recreate an image's staging directory from scratch.
fn reset_context(name: &str, context_dir: &Path) -> Result<PathBuf> {
    if context_dir.exists() {
        fs::remove_dir_all(context_dir)?;
    }
    fs::create_dir_all(context_dir)?;
    tracing::debug!("staging image {} in {}", name, context_dir.display());
    Ok(context_dir.to_path_buf())
}

fn render_tool_containerfile(config: &ToolImageConfig, included: &[&str]) -> String {
    let mut text = String::new();
    text.push_str(&format!("FROM {}\n", config.base));
    push_system_packages(&mut text, &config.system_packages);

    for artifact in included {
        text.push_str(&format!(
            "COPY artifacts/{artifact} {}/{artifact}\n",
            config.install_dir.display()
        ));
    }

    push_entrypoint(&mut text, &config.entrypoint);
    text
}

fn render_workstation_containerfile(
    config: &WorkstationImageConfig,
    binding_file: &str,
    script_file: &str,
    entrypoint: &[String],
) -> String {
    let mut text = String::new();
    text.push_str(&format!("FROM {}\n", config.base));
    push_system_packages(&mut text, &config.system_packages);

    text.push_str(&format!("COPY {binding_file} /tmp/{binding_file}\n"));
    text.push_str(&format!(
        "RUN {} /tmp/{binding_file} && rm /tmp/{binding_file}\n",
        config.binding.install_command.join(" ")
    ));

    text.push_str(&format!("COPY {script_file} /usr/local/bin/{script_file}\n"));
    push_entrypoint(&mut text, entrypoint);

    text
}

fn push_system_packages(text: &mut String, packages: &[String]) {
    if packages.is_empty() {
        return;
    }
    text.push_str(&format!(
        "RUN apt-get update \\\n    && apt-get install -y --no-install-recommends {} \\\n    && rm -rf /var/lib/apt/lists/*\n",
        packages.join(" ")
    ));
}

fn push_entrypoint(text: &mut String, entrypoint: &[String]) {
    if entrypoint.is_empty() {
        return;
    }
    // Exec form; serde_json renders the quoted array.
    let rendered = serde_json::to_string(entrypoint).unwrap_or_else(|_| "[]".to_string());
    text.push_str(&format!("ENTRYPOINT {rendered}\n"));
}

fn write_manifest(staging: &Path, manifest: &ImageManifest<'_>) -> Result<()> {
    let json = serde_json::to_string_pretty(manifest).map_err(|e| Error::Assemble {
        image: manifest.name.to_string(),
        message: format!("failed to serialize image manifest: {e}"),
    })?;
    fs::write(staging.join("image.json"), json)?;
    Ok(())
}

/// Run the binding package's install command once as an installability
/// check. The artifact path is appended as the last argument.
fn verify_installable(
    image: &str,
    config: &WorkstationImageConfig,
    binding_path: &Path,
) -> Result<()> {
    let (program, args) =
        config
            .binding
            .install_command
            .split_first()
            .ok_or_else(|| Error::Assemble {
                image: image.to_string(),
                message: "binding package install command is empty".to_string(),
            })?;

    tracing::info!(
        "verifying binding package {} {}",
        config.binding.name,
        config.binding.version
    );

    let output = Command::new(program)
        .args(args)
        .arg(binding_path)
        .output()
        .map_err(|e| Error::Assemble {
            image: image.to_string(),
            message: format!("failed to run {program}: {e}"),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Assemble {
            image: image.to_string(),
            message: format!(
                "binding package '{}' failed to install: {}",
                config.binding.name,
                stderr.trim()
            ),
        });
    }

    Ok(())
}

/// Run the optional per-image build command against the staged context.
fn run_build_command(image: &str, command: &[String], context: &Path) -> Result<()> {
    let Some((program, args)) = command.split_first() else {
        return Ok(());
    };

    tracing::info!("running image build command for {}", image);

    let output = Command::new(program)
        .args(args)
        .arg(context)
        .output()
        .map_err(|e| Error::Assemble {
            image: image.to_string(),
            message: format!("failed to run {program}: {e}"),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Assemble {
            image: image.to_string(),
            message: format!("image build command failed: {}", stderr.trim()),
        });
    }

    Ok(())
}
