//! Pipeline configuration.
//!
//! A pipeline run is described by a single `shipwright.toml` read once at
//! startup: the toolchains to provision, the workspace packages and their
//! dependencies, the external native modules with their failure policies,
//! and the deliverable image descriptors. Validation is fail-closed: unknown
//! keys and dangling references are rejected before anything is built.

use std::fs;
use std::path::{Path, PathBuf};

use rustc_hash::FxHashSet;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::outcome::StepPolicy;

/// Cargo build profile for the workspace packages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildProfile {
    Debug,
    Release,
}

impl BuildProfile {
    /// Subdirectory of `target/` where this profile places binaries.
    pub fn target_subdir(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Release => "release",
        }
    }

    /// Extra arguments for `cargo build`.
    pub fn cargo_args(&self) -> &'static [&'static str] {
        match self {
            Self::Debug => &[],
            Self::Release => &["--release"],
        }
    }
}

impl Default for BuildProfile {
    fn default() -> Self {
        Self::Release
    }
}

impl std::fmt::Display for BuildProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.target_subdir())
    }
}

/// Toolchain section: the pinned Rust toolchain plus required host C tools.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ToolchainConfig {
    /// Rust toolchain to pin, e.g. `"1.75.0"` or `"stable"`.
    pub channel: String,

    /// Override for the rustup binary (defaults to PATH lookup).
    #[serde(default)]
    pub rustup: Option<PathBuf>,

    /// Override for the cargo binary (defaults to PATH lookup).
    #[serde(default)]
    pub cargo: Option<PathBuf>,

    /// Isolated rustup installation root (RUSTUP_HOME).
    #[serde(default)]
    pub rustup_home: Option<PathBuf>,

    /// Isolated cargo root (CARGO_HOME).
    #[serde(default)]
    pub cargo_home: Option<PathBuf>,

    /// Host C-toolchain tools that must resolve before any build starts.
    #[serde(default = "default_ctools")]
    pub ctools: Vec<String>,
}

fn default_ctools() -> Vec<String> {
    vec!["cc".to_string(), "make".to_string()]
}

/// Workspace section: where the source tree lives and what to build.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct WorkspaceConfig {
    /// Workspace root, relative to the config file.
    #[serde(default = "default_workspace_root")]
    pub root: PathBuf,

    /// Build profile for every package.
    #[serde(default)]
    pub profile: BuildProfile,

    /// Packages to build, with declared inter-dependencies.
    #[serde(rename = "package")]
    pub packages: Vec<PackageConfig>,
}

fn default_workspace_root() -> PathBuf {
    PathBuf::from(".")
}

/// One compilable unit within the workspace.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct PackageConfig {
    /// Cargo package name (`cargo build -p <name>`).
    pub name: String,

    /// Binary names this package produces under `target/<profile>/`.
    /// Empty for pure library packages.
    #[serde(default)]
    pub artifacts: Vec<String>,

    /// Names of workspace packages that must build first.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// An independently-sourced native subproject with its own build system.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ExternalModuleConfig {
    /// Module name; also the artifact name in the canonical set.
    pub name: String,

    /// Module source directory, relative to the config file.
    pub path: PathBuf,

    /// Build invocation, run inside the module directory.
    pub build: Vec<String>,

    /// Where the build leaves its single artifact, relative to the module
    /// directory.
    pub artifact: PathBuf,

    /// Whether a build failure halts the run or degrades the deliverable.
    /// No default: the operator must choose.
    pub policy: StepPolicy,
}

/// Descriptor for the headless tool image.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ToolImageConfig {
    /// Base image reference.
    pub base: String,

    /// Runtime OS packages installed into the image.
    #[serde(default)]
    pub system_packages: Vec<String>,

    /// Names of collected artifacts to ship.
    pub artifacts: Vec<String>,

    /// Destination directory for artifacts inside the image.
    #[serde(default = "default_install_dir")]
    pub install_dir: PathBuf,

    /// Default command, rendered as the image entrypoint. Optional.
    #[serde(default)]
    pub entrypoint: Vec<String>,

    /// Optional command run against the staged context (e.g. a container
    /// build). The context directory is appended as the last argument;
    /// a non-zero exit fails assembly.
    #[serde(default)]
    pub build_command: Vec<String>,
}

fn default_install_dir() -> PathBuf {
    PathBuf::from("/usr/local/bin")
}

/// The prebuilt, opaque language-binding package the workstation image
/// installs. Built elsewhere; only installability is verified here.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct BindingPackageConfig {
    pub name: String,
    pub version: String,

    /// Path to the package artifact, relative to the config file.
    pub path: PathBuf,

    /// Install invocation; the artifact path is appended as the last
    /// argument. A non-zero exit is a fatal assembly failure.
    pub install_command: Vec<String>,
}

/// Descriptor for the interactive workstation image.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct WorkstationImageConfig {
    /// Base image reference (a managed scientific-computing environment).
    pub base: String,

    #[serde(default)]
    pub system_packages: Vec<String>,

    /// The binding package to install.
    pub binding: BindingPackageConfig,

    /// Notebook-server launch script, relative to the config file.
    pub launch_script: PathBuf,

    /// Default command; defaults to the installed launch script.
    #[serde(default)]
    pub entrypoint: Vec<String>,

    /// Optional command run against the staged context; see
    /// [`ToolImageConfig::build_command`].
    #[serde(default)]
    pub build_command: Vec<String>,
}

/// The two deliverable images. Either may be omitted.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ImagesConfig {
    #[serde(default)]
    pub tool: Option<ToolImageConfig>,

    #[serde(default)]
    pub workstation: Option<WorkstationImageConfig>,
}

/// Root configuration, read once at pipeline start.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct PipelineConfig {
    pub toolchain: ToolchainConfig,

    pub workspace: WorkspaceConfig,

    #[serde(default, rename = "external")]
    pub externals: Vec<ExternalModuleConfig>,

    #[serde(default, rename = "image")]
    pub images: ImagesConfig,

    /// Directory the config file lives in; relative paths resolve against
    /// it. Not part of the file itself.
    #[serde(skip)]
    pub root: PathBuf,
}

impl PipelineConfig {
    /// Load and validate a config file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the file cannot be read, fails to
    /// parse, or fails semantic validation.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {}", path.display(), e))
        })?;

        let mut config = Self::parse(&text)?;
        config.root = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."))
            .to_path_buf();
        Ok(config)
    }

    /// Parse and validate config text. The caller is responsible for
    /// setting [`PipelineConfig::root`].
    pub fn parse(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve a config-relative path.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// The workspace root directory, resolved.
    pub fn workspace_root(&self) -> PathBuf {
        self.resolve(&self.workspace.root)
    }

    /// All declared artifact names: package binaries plus external modules.
    pub fn artifact_names(&self) -> Vec<&str> {
        self.workspace
            .packages
            .iter()
            .flat_map(|p| p.artifacts.iter().map(String::as_str))
            .chain(self.externals.iter().map(|m| m.name.as_str()))
            .collect()
    }

    fn validate(&self) -> Result<()> {
        if self.workspace.packages.is_empty() {
            return Err(Error::Config("workspace declares no packages".into()));
        }

        let mut package_names = FxHashSet::default();
        for package in &self.workspace.packages {
            if !package_names.insert(package.name.as_str()) {
                return Err(Error::Config(format!(
                    "duplicate package name '{}'",
                    package.name
                )));
            }
        }

        for package in &self.workspace.packages {
            for dep in &package.depends_on {
                if !package_names.contains(dep.as_str()) {
                    return Err(Error::Config(format!(
                        "package '{}' depends on unknown package '{}'",
                        package.name, dep
                    )));
                }
            }
        }

        let mut artifact_names = FxHashSet::default();
        for name in self.artifact_names() {
            if !artifact_names.insert(name) {
                return Err(Error::Config(format!(
                    "duplicate artifact name '{name}'"
                )));
            }
        }

        for module in &self.externals {
            if module.build.is_empty() {
                return Err(Error::Config(format!(
                    "external module '{}' has an empty build command",
                    module.name
                )));
            }
        }

        if let Some(tool) = &self.images.tool {
            for artifact in &tool.artifacts {
                if !artifact_names.contains(artifact.as_str()) {
                    return Err(Error::Config(format!(
                        "tool image references undeclared artifact '{artifact}'"
                    )));
                }
            }
        }

        if let Some(workstation) = &self.images.workstation {
            if workstation.binding.install_command.is_empty() {
                return Err(Error::Config(
                    "workstation binding package has an empty install command".into(),
                ));
            }
        }

        Ok(())
    }
}
