//! Error types for shipwright-core.

use thiserror::Error;

/// Result type for shipwright-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in shipwright-core.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration could not be read or failed validation.
    #[error("config error: {0}")]
    Config(String),

    /// Toolchain acquisition or verification failed.
    #[error("failed to provision toolchain '{toolchain}': {message}")]
    Provision { toolchain: String, message: String },

    /// A workspace package failed to build.
    #[error("package '{package}' failed to build:\n{stderr}")]
    Compile { package: String, stderr: String },

    /// The external native module failed to build in fatal mode.
    #[error("external module '{module}' failed to build: {message}")]
    ExternalBuild { module: String, message: String },

    /// Artifacts expected from successful build steps were absent at
    /// collection time. Always fatal: a fatal-mode failure should have
    /// halted the pipeline before the collector ran.
    #[error("missing artifacts from successful build steps: {}", artifacts.join(", "))]
    Collect { artifacts: Vec<String> },

    /// Image assembly failed (missing declared input or install failure).
    #[error("failed to assemble image '{image}': {message}")]
    Assemble { image: String, message: String },

    /// Cyclic dependency detected among workspace packages.
    #[error("cyclic dependency detected: {0}")]
    CyclicDependency(String),

    /// A package depends on a name no workspace package provides.
    #[error("unknown dependency: {0}")]
    UnknownDependency(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
