//! External native module builds.
//!
//! An external module is a vendored subproject with its own build system,
//! outside the cargo workspace. It produces exactly one artifact, and its
//! failure is mapped through the module's declared [`StepPolicy`] rather
//! than through control flow.

use std::path::PathBuf;
use std::process::Command;
use std::time::Instant;

use crate::config::ExternalModuleConfig;
use crate::error::Error;
use crate::outcome::{StepOutcome, StepPolicy};

/// Outcome of one external module build.
#[derive(Debug)]
pub struct ExternalBuildReport {
    pub name: String,
    pub outcome: StepOutcome,
    /// The produced artifact; present only on success.
    pub artifact: Option<PathBuf>,
    pub duration_secs: f64,
}

/// Builds one external module in its own directory.
pub struct ExternalBuilder<'a> {
    module: &'a ExternalModuleConfig,
    /// Resolved module directory.
    dir: PathBuf,
}

impl<'a> ExternalBuilder<'a> {
    pub fn new(module: &'a ExternalModuleConfig, dir: PathBuf) -> Self {
        Self { module, dir }
    }

    /// Run the module's build command and check for its artifact.
    ///
    /// Never returns an error: the failure policy decides whether a bad
    /// build is fatal, and the caller reads that off the outcome tag.
    pub fn build(&self) -> ExternalBuildReport {
        let started = Instant::now();
        tracing::info!("building external module {}", self.module.name);

        let outcome = match self.run_build() {
            Ok(()) => {
                let artifact = self.dir.join(&self.module.artifact);
                if artifact.exists() {
                    return ExternalBuildReport {
                        name: self.module.name.clone(),
                        outcome: StepOutcome::Success,
                        artifact: Some(artifact),
                        duration_secs: started.elapsed().as_secs_f64(),
                    };
                }
                self.failure(self.error(format!(
                    "build succeeded but artifact {} is missing",
                    artifact.display()
                )))
            }
            Err(e) => self.failure(e),
        };

        ExternalBuildReport {
            name: self.module.name.clone(),
            outcome,
            artifact: None,
            duration_secs: started.elapsed().as_secs_f64(),
        }
    }

    fn run_build(&self) -> std::result::Result<(), Error> {
        let (program, args) = self
            .module
            .build
            .split_first()
            .ok_or_else(|| self.error("empty build command".to_string()))?;

        let output = Command::new(program)
            .args(args)
            .current_dir(&self.dir)
            .output()
            .map_err(|e| self.error(format!("failed to run {program}: {e}")))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(self.error(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }

    fn error(&self, message: String) -> Error {
        Error::ExternalBuild {
            module: self.module.name.clone(),
            message,
        }
    }

    /// Map a failure through the module's policy.
    fn failure(&self, error: Error) -> StepOutcome {
        let message = error.to_string();
        match self.module.policy {
            StepPolicy::Fatal => {
                tracing::error!("{message}");
                StepOutcome::FailedFatal { message }
            }
            StepPolicy::BestEffort => {
                tracing::warn!("{message} (tolerated by policy)");
                StepOutcome::FailedTolerated { message }
            }
        }
    }
}
