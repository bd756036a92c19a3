//! Pipeline working-directory management.
//!
//! Provides a consistent directory layout for a pipeline run, so the
//! builders, the collector, and the assemblers all agree on where
//! intermediate and final outputs live.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Directory structure for a pipeline run.
///
/// Everything shipwright produces lives under a `.shipwright` directory
/// next to the pipeline config:
///
/// ```text
/// shipwright.toml
/// .shipwright/
/// ├── artifacts/   # Canonical collected artifact set (flat, name-keyed)
/// └── images/      # One staged build context per deliverable image
/// ```
#[derive(Debug, Clone)]
pub struct PipelineDirs {
    /// The `.shipwright` directory itself.
    pub work_dir: PathBuf,

    /// Canonical artifact directory.
    pub artifact_dir: PathBuf,

    /// Root for staged image build contexts.
    pub image_dir: PathBuf,
}

impl PipelineDirs {
    /// Create the directory structure next to a config file.
    ///
    /// Creates all directories if they don't exist.
    ///
    /// # Errors
    /// Returns an error if directory creation fails.
    pub fn from_config_path(config_path: &Path) -> Result<Self> {
        let root = config_path.parent().unwrap_or(Path::new("."));
        Self::from_root(root)
    }

    /// Create the directory structure under the given root directory.
    pub fn from_root(root: &Path) -> Result<Self> {
        let work_dir = root.join(".shipwright");
        let artifact_dir = work_dir.join("artifacts");
        let image_dir = work_dir.join("images");

        fs::create_dir_all(&artifact_dir)?;
        fs::create_dir_all(&image_dir)?;

        Ok(Self {
            work_dir,
            artifact_dir,
            image_dir,
        })
    }

    /// The staged build context for one image.
    pub fn image_context(&self, image_name: &str) -> PathBuf {
        self.image_dir.join(image_name)
    }

    /// Remove all pipeline outputs and recreate the empty structure.
    ///
    /// Collected artifacts are overwritten, not appended, on re-run; this
    /// is the heavier variant that also drops staged image contexts.
    pub fn clean(&self) -> Result<()> {
        if self.work_dir.exists() {
            fs::remove_dir_all(&self.work_dir)?;
        }

        fs::create_dir_all(&self.artifact_dir)?;
        fs::create_dir_all(&self.image_dir)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_from_config_path() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp.path().join("shipwright.toml");

        let dirs = PipelineDirs::from_config_path(&config_path).expect("Failed to create dirs");

        assert!(dirs.work_dir.ends_with(".shipwright"));
        assert!(dirs.artifact_dir.exists());
        assert!(dirs.image_dir.exists());
    }

    #[test]
    fn test_image_context() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let dirs = PipelineDirs::from_root(temp.path()).expect("Failed to create dirs");

        let ctx = dirs.image_context("tool");
        assert!(ctx.starts_with(&dirs.image_dir));
        assert!(ctx.ends_with("tool"));
    }

    #[test]
    fn test_clean() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let dirs = PipelineDirs::from_root(temp.path()).expect("Failed to create dirs");

        let stale = dirs.artifact_dir.join("old-binary");
        fs::write(&stale, "stale").expect("Failed to write test file");
        assert!(stale.exists());

        dirs.clean().expect("Failed to clean");
        assert!(!stale.exists());
        assert!(dirs.artifact_dir.exists());
    }
}
