//! Token registry — the guardian's map of bearer token to cloister identity.
//!
//! Every container gets exactly one token at registration time; the proxy,
//! the request server, and the policy engine all key session state off it.
//! The registry itself is just a guarded `HashMap` — all the interesting
//! behavior (dropping session policy on revoke) lives one layer up in
//! [`crate::policy::PolicyEngine`], which the supervisor wires to
//! [`TokenRegistry::revoke`] via a callback.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, warn};

/// Everything the guardian knows about a live cloister's token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub cloister: String,
    pub project: String,
    pub worktree: String,
}

/// Error returned when a token operation cannot proceed.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("token already registered to a different cloister")]
    Conflict,
    #[error("token not found")]
    NotFound,
}

/// In-memory token → identity map, safe for concurrent readers and a single
/// writer at a time.
pub struct TokenRegistry {
    tokens: RwLock<HashMap<String, TokenInfo>>,
}

impl Default for TokenRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenRegistry {
    pub fn new() -> Self {
        Self {
            tokens: RwLock::new(HashMap::new()),
        }
    }

    /// Generate a fresh 32-byte, hex-encoded bearer token using the
    /// platform CSPRNG.
    pub fn generate_token() -> String {
        let mut bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut bytes);
        hex_encode(&bytes)
    }

    /// Register a token. Fails with [`TokenError::Conflict`] if the token
    /// string is already registered to a *different* identity — re-registering
    /// the same identity is idempotent.
    pub fn register(&self, token: &str, info: TokenInfo) -> Result<(), TokenError> {
        let mut tokens = self.tokens.write().expect("token registry lock poisoned");
        match tokens.get(token) {
            Some(existing) if existing == &info => Ok(()),
            Some(_) => Err(TokenError::Conflict),
            None => {
                debug!(token = %redact(token), cloister = %info.cloister, "token registered");
                tokens.insert(token.to_string(), info);
                Ok(())
            }
        }
    }

    /// Remove a token. Returns the identity that was removed, if any.
    pub fn revoke(&self, token: &str) -> Option<TokenInfo> {
        let removed = self
            .tokens
            .write()
            .expect("token registry lock poisoned")
            .remove(token);
        if let Some(info) = &removed {
            debug!(token = %redact(token), cloister = %info.cloister, "token revoked");
        }
        removed
    }

    pub fn lookup(&self, token: &str) -> Option<TokenInfo> {
        self.tokens
            .read()
            .expect("token registry lock poisoned")
            .get(token)
            .cloned()
    }

    pub fn list_by_project(&self, project: &str) -> Vec<(String, TokenInfo)> {
        self.tokens
            .read()
            .expect("token registry lock poisoned")
            .iter()
            .filter(|(_, info)| info.project == project)
            .map(|(token, info)| (token.clone(), info.clone()))
            .collect()
    }

    /// Reconcile in-memory state with a token directory on disk: add entries
    /// present on disk but missing from memory, remove entries present in
    /// memory but absent from disk. Used at startup and on SIGHUP.
    pub fn reconcile_with_store(&self, store: &TokenStore) -> anyhow::Result<()> {
        let on_disk = store.load_all()?;
        let mut tokens = self.tokens.write().expect("token registry lock poisoned");
        tokens.retain(|token, _| on_disk.contains_key(token));
        for (token, info) in on_disk {
            tokens.entry(token).or_insert(info);
        }
        Ok(())
    }
}

/// Persists one YAML file per token under a directory, so a guardian restart
/// can reconcile its in-memory registry from disk.
pub struct TokenStore {
    dir: PathBuf,
}

impl TokenStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, token: &str) -> PathBuf {
        let prefix: String = token.chars().take(16).collect();
        self.dir.join(format!("{prefix}.yaml"))
    }

    pub fn save(&self, token: &str, info: &TokenInfo) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let yaml = serde_yaml::to_string(info)?;
        std::fs::write(self.path_for(token), yaml)?;
        Ok(())
    }

    pub fn remove(&self, token: &str) -> anyhow::Result<()> {
        let path = self.path_for(token);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    /// Load every token file under the store directory. Missing directory is
    /// not an error — an empty map is returned.
    pub fn load_all(&self) -> anyhow::Result<HashMap<String, TokenInfo>> {
        let mut out = HashMap::new();
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return Ok(out);
        };
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match std::fs::read_to_string(&path).ok().and_then(|contents| {
                serde_yaml::from_str::<TokenInfo>(&contents).ok()
            }) {
                Some(info) => {
                    out.insert(stem.to_string(), info);
                }
                None => warn!(path = %path.display(), "skipping unreadable token file"),
            }
        }
        Ok(out)
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(s, "{b:02x}").expect("writing to a String cannot fail");
    }
    s
}

/// Token values never appear in full in logs, only their first 8 hex chars.
fn redact(token: &str) -> String {
    let short: String = token.chars().take(8).collect();
    format!("{short}…")
}
