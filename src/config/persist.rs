//! Writing human decisions back to disk.
//!
//! [`crate::policy::PolicyEngine::record_decision`] is the only code path
//! that calls into a [`ConfigPersister`] — everything else only ever reads
//! config through a [`ProjectLoader`]. Keeping persistence behind one trait
//! means the in-memory policy state and the on-disk decision files can never
//! drift out of the single write path described in the design notes.

use crate::config::types::DomainEntry;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Mutex;

/// Whether a persisted decision adds to the allow or deny side of a scope's
/// decisions file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionKind {
    Allow,
    Deny,
}

#[async_trait]
pub trait ConfigPersister: Send + Sync {
    async fn persist_global(&self, kind: DecisionKind, entry: DomainEntry) -> Result<()>;
    async fn persist_project(&self, project: &str, kind: DecisionKind, entry: DomainEntry) -> Result<()>;
}

/// Appends decisions to `decisions.yaml` files under a root directory:
/// `<root>/decisions.yaml` for global, `<root>/projects/<project>/decisions.yaml`
/// for a project. A single in-process mutex serializes writes — the guardian
/// is the only writer of these files, so a cross-process file lock would be
/// unused machinery; see DESIGN.md for this trade-off.
pub struct YamlConfigPersister {
    root: PathBuf,
    lock: Mutex<()>,
}

impl YamlConfigPersister {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock: Mutex::new(()),
        }
    }

    fn project_dir(&self, project: &str) -> PathBuf {
        self.root.join("projects").join(project)
    }

    fn append(&self, path: PathBuf, kind: DecisionKind, entry: DomainEntry) -> Result<()> {
        let _guard = self.lock.lock().expect("config persister lock poisoned");
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let mut file = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_yaml::from_str(&contents).unwrap_or_default()
        } else {
            crate::config::types::DecisionsFile::default()
        };
        let list = match kind {
            DecisionKind::Allow => &mut file.allow,
            DecisionKind::Deny => &mut file.deny,
        };
        if !list.contains(&entry) {
            list.push(entry);
        }
        let yaml = serde_yaml::to_string(&file)?;
        // Write to a sibling temp file and rename into place so a reader
        // (another `cloisterd` invocation, a backup tool) never observes a
        // truncated or partially-written decisions file — `rename` within
        // the same directory is atomic on the filesystems this runs on.
        let tmp_path = path.with_extension("yaml.tmp");
        std::fs::write(&tmp_path, yaml).with_context(|| format!("writing {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &path).with_context(|| format!("renaming {} into place", path.display()))?;
        Ok(())
    }
}

#[async_trait]
impl ConfigPersister for YamlConfigPersister {
    async fn persist_global(&self, kind: DecisionKind, entry: DomainEntry) -> Result<()> {
        let path = self.root.join("decisions.yaml");
        self.append(path, kind, entry)
    }

    async fn persist_project(&self, project: &str, kind: DecisionKind, entry: DomainEntry) -> Result<()> {
        let path = self.project_dir(project).join("decisions.yaml");
        self.append(path, kind, entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_persist_global_allow_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let persister = YamlConfigPersister::new(tmp.path());
        persister
            .persist_global(DecisionKind::Allow, DomainEntry::domain("api.example.com"))
            .await
            .unwrap();
        persister
            .persist_global(DecisionKind::Allow, DomainEntry::domain("api.example.com"))
            .await
            .unwrap();

        let contents = std::fs::read_to_string(tmp.path().join("decisions.yaml")).unwrap();
        let file: crate::config::types::DecisionsFile = serde_yaml::from_str(&contents).unwrap();
        assert_eq!(file.allow.len(), 1);
    }

    #[tokio::test]
    async fn test_persist_leaves_no_temp_file_behind() {
        let tmp = TempDir::new().unwrap();
        let persister = YamlConfigPersister::new(tmp.path());
        persister
            .persist_global(DecisionKind::Deny, DomainEntry::domain("evil.example.com"))
            .await
            .unwrap();
        assert!(!tmp.path().join("decisions.yaml.tmp").exists());
        assert!(tmp.path().join("decisions.yaml").exists());
    }

    #[tokio::test]
    async fn test_persist_project_scoped_to_subdir() {
        let tmp = TempDir::new().unwrap();
        let persister = YamlConfigPersister::new(tmp.path());
        persister
            .persist_project("demo", DecisionKind::Deny, DomainEntry::pattern("*.evil.example.com"))
            .await
            .unwrap();

        let path = tmp.path().join("projects").join("demo").join("decisions.yaml");
        assert!(path.exists());
        let contents = std::fs::read_to_string(path).unwrap();
        let file: crate::config::types::DecisionsFile = serde_yaml::from_str(&contents).unwrap();
        assert_eq!(file.deny.len(), 1);
    }
}
