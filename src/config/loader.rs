//! Reading `config.yaml` / `decisions.yaml` pairs from disk.

use crate::config::types::{DecisionsFile, GuardianConfig};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Read a `GuardianConfig` from a single YAML file. Missing file yields the
/// default (empty) config rather than an error, since a bare project with no
/// overlay is a normal, documented state. A file that exists but fails to
/// parse (bad YAML, a field of the wrong shape) also falls back to the
/// default rather than refusing to start the guardian — a malformed overlay
/// should degrade to "no overlay", not take the whole process down.
pub fn load_config(path: &Path) -> Result<GuardianConfig> {
    if !path.exists() {
        return Ok(GuardianConfig::default());
    }
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    match serde_yaml::from_str(&contents) {
        Ok(config) => Ok(config),
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "malformed config file, falling back to defaults"
            );
            Ok(GuardianConfig::default())
        }
    }
}

/// Read a `DecisionsFile` from disk, defaulting to empty when absent or
/// malformed — same latitude as [`load_config`].
pub fn load_decisions(path: &Path) -> Result<DecisionsFile> {
    if !path.exists() {
        return Ok(DecisionsFile::default());
    }
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading decisions file {}", path.display()))?;
    match serde_yaml::from_str(&contents) {
        Ok(decisions) => Ok(decisions),
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "malformed decisions file, falling back to defaults"
            );
            Ok(DecisionsFile::default())
        }
    }
}

/// Loads config + decisions for a named project on demand. A trait so the
/// policy engine's cache-priming code can be exercised in tests against an
/// in-memory fake instead of the filesystem.
pub trait ProjectLoader: Send + Sync {
    fn load(&self, project: &str) -> Result<(GuardianConfig, DecisionsFile)>;
}

/// Loads `<root>/projects/<project>/{config,decisions}.yaml`.
pub struct FsProjectLoader {
    root: PathBuf,
}

impl FsProjectLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ProjectLoader for FsProjectLoader {
    fn load(&self, project: &str) -> Result<(GuardianConfig, DecisionsFile)> {
        let dir = self.root.join("projects").join(project);
        let config = load_config(&dir.join("config.yaml"))?;
        let decisions = load_decisions(&dir.join("decisions.yaml"))?;
        Ok((config, decisions))
    }
}
