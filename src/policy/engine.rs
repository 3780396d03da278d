//! The policy engine — the brain of the guardian.
//!
//! Holds three layers of host state (global, per-project, per-token
//! session) and evaluates a host against them in the fixed six-level order:
//! session-deny, session-allow, project-deny, project-allow, global-deny,
//! global-allow, then "unlisted". `record_decision` is the single path that
//! mutates any of these layers, so in-memory state and on-disk decision
//! files can never drift apart (see the design notes on policy coherence).

use crate::config::{ConfigPersister, DecisionKind, DomainEntry, GuardianConfig, ProjectLoader, UnlistedDomainBehavior};
use crate::policy::types::{HostSet, PolicyVerdict, Scope};
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

#[derive(Default)]
struct ProjectPolicy {
    allow: HostSet,
    deny: HostSet,
}

#[derive(Default)]
struct SessionPolicy {
    allow: HostSet,
    deny: HostSet,
}

pub struct PolicyEngine {
    global_allow: RwLock<HostSet>,
    global_deny: RwLock<HostSet>,
    projects: RwLock<HashMap<String, ProjectPolicy>>,
    sessions: RwLock<HashMap<String, SessionPolicy>>,
    loader: Arc<dyn ProjectLoader>,
    /// Absent when the supervisor was started with no writable decisions
    /// directory; `record_decision` then fails fast for `project`/`global`
    /// scope rather than silently dropping the decision.
    persister: Option<Arc<dyn ConfigPersister>>,
    pub unlisted_behavior: UnlistedDomainBehavior,
}

impl PolicyEngine {
    pub fn new(
        global: &GuardianConfig,
        loader: Arc<dyn ProjectLoader>,
        persister: Option<Arc<dyn ConfigPersister>>,
    ) -> Self {
        Self {
            global_allow: RwLock::new(HostSet::from_entries(&global.proxy.allow)),
            global_deny: RwLock::new(HostSet::from_entries(&global.proxy.deny)),
            projects: RwLock::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
            loader,
            persister,
            unlisted_behavior: global.proxy.unlisted_domain_behavior,
        }
    }

    /// Load a project's allow/deny lists into the cache if not already
    /// present. Called at token registration so the first proxy request for
    /// a freshly-started cloister is already hot.
    pub fn ensure_project(&self, project: &str) -> Result<()> {
        if self.projects.read().expect("policy lock poisoned").contains_key(project) {
            return Ok(());
        }
        let (config, decisions) = self.loader.load(project)?;
        let mut allow = config.proxy.allow;
        allow.extend(decisions.allow);
        let mut deny = config.proxy.deny;
        deny.extend(decisions.deny);
        self.projects.write().expect("policy lock poisoned").insert(
            project.to_string(),
            ProjectPolicy {
                allow: HostSet::from_entries(&allow),
                deny: HostSet::from_entries(&deny),
            },
        );
        Ok(())
    }

    /// Evaluate a host for a given token/project against the six levels.
    pub fn evaluate(&self, token: &str, project: &str, host: &str) -> PolicyVerdict {
        let host = host.to_ascii_lowercase();

        if let Some(sessions) = self.sessions.read().expect("policy lock poisoned").get(token) {
            if let Some(matched) = sessions.deny.matching(&host) {
                return PolicyVerdict::Denied { matched, scope: Scope::Session };
            }
            if let Some(matched) = sessions.allow.matching(&host) {
                return PolicyVerdict::Allowed { matched, scope: Scope::Session };
            }
        }

        if let Some(project_policy) = self.projects.read().expect("policy lock poisoned").get(project) {
            if let Some(matched) = project_policy.deny.matching(&host) {
                return PolicyVerdict::Denied { matched, scope: Scope::Project };
            }
            if let Some(matched) = project_policy.allow.matching(&host) {
                return PolicyVerdict::Allowed { matched, scope: Scope::Project };
            }
        }

        if let Some(matched) = self.global_deny.read().expect("policy lock poisoned").matching(&host) {
            return PolicyVerdict::Denied { matched, scope: Scope::Global };
        }
        if let Some(matched) = self.global_allow.read().expect("policy lock poisoned").matching(&host) {
            return PolicyVerdict::Allowed { matched, scope: Scope::Global };
        }

        PolicyVerdict::Unlisted
    }

    /// Record a human decision. `project` is required for `Scope::Project`
    /// even though the caller may also have a session/global decision in
    /// flight — callers pick exactly one scope per call.
    pub async fn record_decision(
        &self,
        token: &str,
        project: &str,
        scope: Scope,
        entry: DomainEntry,
        allowed: bool,
    ) -> Result<()> {
        match scope {
            Scope::Once => {
                // Transient — nothing to record.
            }
            Scope::Session => {
                let mut sessions = self.sessions.write().expect("policy lock poisoned");
                let session = sessions.entry(token.to_string()).or_default();
                if allowed {
                    session.allow.insert(&entry);
                } else {
                    session.deny.insert(&entry);
                }
            }
            Scope::Project => {
                let persister = self
                    .persister
                    .as_ref()
                    .ok_or_else(|| anyhow!("no config persister configured for project-scoped decisions"))?;
                let kind = if allowed { DecisionKind::Allow } else { DecisionKind::Deny };
                persister.persist_project(project, kind, entry.clone()).await?;
                self.ensure_project(project)?;
                let mut projects = self.projects.write().expect("policy lock poisoned");
                let policy = projects.entry(project.to_string()).or_default();
                if allowed {
                    policy.allow.insert(&entry);
                } else {
                    policy.deny.insert(&entry);
                }
            }
            Scope::Global => {
                let persister = self
                    .persister
                    .as_ref()
                    .ok_or_else(|| anyhow!("no config persister configured for global-scoped decisions"))?;
                let kind = if allowed { DecisionKind::Allow } else { DecisionKind::Deny };
                persister.persist_global(kind, entry.clone()).await?;
                if allowed {
                    self.global_allow.write().expect("policy lock poisoned").insert(&entry);
                } else {
                    self.global_deny.write().expect("policy lock poisoned").insert(&entry);
                }
            }
        }
        Ok(())
    }

    /// Drop token-session state synchronously on token revocation.
    pub fn drop_session(&self, token: &str) {
        self.sessions.write().expect("policy lock poisoned").remove(token);
        debug!(token = %token.chars().take(8).collect::<String>(), "dropped session policy state");
    }

    /// Clear the project cache (forces a reload from disk on next access)
    /// without touching session-scoped state. Called on SIGHUP.
    pub fn reload(&self) {
        self.projects.write().expect("policy lock poisoned").clear();
    }
}
