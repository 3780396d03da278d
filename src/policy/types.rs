//! Core types for the policy engine: host sets, scopes, and decisions.

use crate::config::DomainEntry;
use crate::utils::host::wildcard_matches;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A compiled allow/deny side: an exact-host set plus a small list of
/// wildcard suffixes. Exact lookups are O(1); wildcard lookups scan the
/// (usually short) suffix list.
#[derive(Debug, Clone, Default)]
pub struct HostSet {
    exact: HashSet<String>,
    wildcards: Vec<String>,
}

impl HostSet {
    pub fn from_entries(entries: &[DomainEntry]) -> Self {
        let mut set = Self::default();
        for entry in entries {
            set.insert(entry);
        }
        set
    }

    pub fn insert(&mut self, entry: &DomainEntry) {
        match entry {
            DomainEntry::Domain { domain } => {
                self.exact.insert(domain.to_ascii_lowercase());
            }
            DomainEntry::Pattern { pattern } => {
                if let Some(suffix) = pattern.strip_prefix("*.") {
                    let suffix = suffix.to_ascii_lowercase();
                    if !self.wildcards.contains(&suffix) {
                        self.wildcards.push(suffix);
                    }
                } else {
                    // A "pattern" with no wildcard is just an exact host.
                    self.exact.insert(pattern.to_ascii_lowercase());
                }
            }
        }
    }

    /// Returns the matched representation (exact host or `*.suffix`) if
    /// `host` is covered by this set.
    pub fn matching(&self, host: &str) -> Option<String> {
        if self.exact.contains(host) {
            return Some(host.to_string());
        }
        self.wildcards
            .iter()
            .find(|suffix| wildcard_matches(&format!("*.{suffix}"), host))
            .map(|suffix| format!("*.{suffix}"))
    }

    pub fn is_match(&self, host: &str) -> bool {
        self.matching(host).is_some()
    }
}

/// Lifetime qualifier of a human approval/denial decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Once,
    Session,
    Project,
    Global,
}

/// Terminal outcome of evaluating a host/command against policy or against
/// a pending approval queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecisionStatus {
    Approved,
    Denied,
    Timeout,
}

/// A fully-resolved decision, ready to serialize back to a caller.
#[derive(Debug, Clone)]
pub struct Decision {
    pub status: DecisionStatus,
    pub scope: Option<Scope>,
    pub pattern: Option<String>,
    pub reason: Option<String>,
    pub persistence_error: Option<String>,
}

impl Decision {
    pub fn approved() -> Self {
        Self {
            status: DecisionStatus::Approved,
            scope: None,
            pattern: None,
            reason: None,
            persistence_error: None,
        }
    }

    pub fn approved_scoped(scope: Scope) -> Self {
        Self {
            scope: Some(scope),
            ..Self::approved()
        }
    }

    pub fn denied(reason: impl Into<String>) -> Self {
        Self {
            status: DecisionStatus::Denied,
            scope: None,
            pattern: None,
            reason: Some(reason.into()),
            persistence_error: None,
        }
    }

    pub fn timeout() -> Self {
        Self {
            status: DecisionStatus::Timeout,
            scope: None,
            pattern: None,
            reason: Some("Request timed out waiting for approval".to_string()),
            persistence_error: None,
        }
    }

    pub fn with_persistence_error(mut self, err: impl Into<String>) -> Self {
        self.persistence_error = Some(err.into());
        self
    }
}

/// Result of evaluating a host against the six policy levels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyVerdict {
    Allowed { matched: String, scope: Scope },
    Denied { matched: String, scope: Scope },
    Unlisted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_set_exact() {
        let set = HostSet::from_entries(&[DomainEntry::domain("example.com")]);
        assert!(set.is_match("example.com"));
        assert!(!set.is_match("api.example.com"));
    }

    #[test]
    fn test_host_set_wildcard() {
        let set = HostSet::from_entries(&[DomainEntry::pattern("*.example.com")]);
        assert!(set.is_match("api.example.com"));
        assert!(set.is_match("example.com"));
        assert!(!set.is_match("evilexample.com"));
        assert_eq!(set.matching("api.example.com"), Some("*.example.com".to_string()));
    }
}
