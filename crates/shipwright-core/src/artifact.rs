//! Artifact manifest and collection.
//!
//! The manifest declares, for every artifact, which step produces it and
//! where that step leaves it on disk. The collector validates the whole
//! manifest at once — every missing artifact is surfaced in a single error
//! rather than failing on the first copy — and flattens the survivors into
//! the canonical name-keyed directory.

use std::fs;
use std::path::{Path, PathBuf};

use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::{Error, Result};
use crate::outcome::StepId;

/// One declared artifact: name, producing step, and expected location.
#[derive(Debug, Clone)]
pub struct ArtifactEntry {
    pub name: String,
    pub producer: StepId,
    pub source: PathBuf,
}

/// The declared artifact set for a run.
#[derive(Debug, Default)]
pub struct ArtifactManifest {
    entries: Vec<ArtifactEntry>,
}

impl ArtifactManifest {
    pub fn new(entries: Vec<ArtifactEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[ArtifactEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The canonical collected artifact directory, name-keyed.
///
/// Built once by [`collect`] and immutable afterwards; assemblers only read
/// from it.
#[derive(Debug)]
pub struct ArtifactSet {
    dir: PathBuf,
    entries: FxHashMap<String, PathBuf>,
}

impl ArtifactSet {
    /// The canonical directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of a collected artifact by name.
    pub fn get(&self, name: &str) -> Option<&Path> {
        self.entries.get(name).map(PathBuf::as_path)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Collected artifact names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Validate the manifest and copy every available artifact into `dir`.
///
/// Entries whose producer is in `tolerated_failures` are skipped: their
/// absence was already reported when the producing step failed under a
/// best-effort policy. Every other entry must exist on disk; the full list
/// of violations comes back as one [`Error::Collect`], since an artifact
/// missing from a successful step means the pipeline state is inconsistent.
///
/// Existing files in `dir` are overwritten, never appended.
pub fn collect(
    manifest: &ArtifactManifest,
    tolerated_failures: &FxHashSet<StepId>,
    dir: &Path,
) -> Result<ArtifactSet> {
    fs::create_dir_all(dir)?;

    let mut missing = Vec::new();
    let mut present = Vec::new();

    for entry in manifest.entries() {
        if tolerated_failures.contains(&entry.producer) {
            tracing::warn!(
                "omitting artifact {} ({} failed under best-effort policy)",
                entry.name,
                entry.producer
            );
            continue;
        }

        if entry.source.exists() {
            present.push(entry);
        } else {
            missing.push(format!(
                "{} (expected at {} from {})",
                entry.name,
                entry.source.display(),
                entry.producer
            ));
        }
    }

    if !missing.is_empty() {
        return Err(Error::Collect { artifacts: missing });
    }

    let mut entries = FxHashMap::default();
    for entry in present {
        let dest = dir.join(&entry.name);
        fs::copy(&entry.source, &dest)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(&dest)?.permissions();
            perms.set_mode(0o755);
            fs::set_permissions(&dest, perms)?;
        }

        tracing::debug!("collected {} -> {}", entry.source.display(), dest.display());
        entries.insert(entry.name.clone(), dest);
    }

    Ok(ArtifactSet {
        dir: dir.to_path_buf(),
        entries,
    })
}
