//! Guardian configuration: YAML on disk, loaded once at startup into a
//! [`GuardianConfig`] and threaded through every component that needs it —
//! no ambient global config access, matching the rest of the guardian's
//! "single owner object per subsystem" design.

pub mod loader;
pub mod persist;
pub mod types;

pub use loader::{load_config, load_decisions, FsProjectLoader, ProjectLoader};
pub use persist::{ConfigPersister, DecisionKind, YamlConfigPersister};
pub use types::{DecisionsFile, DomainEntry, GuardianConfig, PatternEntry, UnlistedDomainBehavior};

use std::path::PathBuf;

/// Default root directory for all on-disk guardian state: token store,
/// global config, and per-project overlays.
///
/// Resolved through [`dirs::config_dir`], which itself honors
/// `XDG_CONFIG_HOME` on Linux before falling back to `~/.config` — the
/// guardian keeps config and mutable state (tokens, decision files) under
/// one root rather than splitting across `XDG_CONFIG_HOME`/`XDG_STATE_HOME`
/// separately; see DESIGN.md.
pub fn default_root_dir() -> anyhow::Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| anyhow::anyhow!("could not determine a config directory for this platform"))?;
    Ok(config_dir.join("cloisterd"))
}
