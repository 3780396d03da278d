//! On-disk shapes for the guardian's configuration and decision files.

use serde::{Deserialize, Deserializer, Serialize};

/// One entry in an allow/deny list: either an exact host or a `*.suffix`
/// wildcard. `serde(untagged)` lets the YAML read naturally as
/// `- domain: example.com` or `- pattern: "*.example.com"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DomainEntry {
    Domain { domain: String },
    Pattern { pattern: String },
}

impl DomainEntry {
    pub fn domain(s: impl Into<String>) -> Self {
        Self::Domain { domain: s.into() }
    }

    pub fn pattern(s: impl Into<String>) -> Self {
        Self::Pattern { pattern: s.into() }
    }

    /// The raw string this entry carries, for audit/display.
    pub fn as_str(&self) -> &str {
        match self {
            DomainEntry::Domain { domain } => domain,
            DomainEntry::Pattern { pattern } => pattern,
        }
    }
}

/// A command-pattern entry in `hostexec.auto_approve` / `hostexec.manual_approve`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternEntry {
    pub pattern: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnlistedDomainBehavior {
    Reject,
    RequestApproval,
}

impl Default for UnlistedDomainBehavior {
    fn default() -> Self {
        Self::RequestApproval
    }
}

/// Unknown values fall back to the safe default rather than failing the
/// whole config file — see the config-error handling in `loader.rs`.
impl<'de> Deserialize<'de> for UnlistedDomainBehavior {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        match raw.as_str() {
            "reject" => Ok(Self::Reject),
            "request_approval" => Ok(Self::RequestApproval),
            other => {
                tracing::warn!(
                    value = %other,
                    "unknown proxy.unlisted_domain_behavior, falling back to request_approval"
                );
                Ok(Self::default())
            }
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default)]
    pub allow: Vec<DomainEntry>,
    #[serde(default)]
    pub deny: Vec<DomainEntry>,
    #[serde(default)]
    pub unlisted_domain_behavior: UnlistedDomainBehavior,
    /// Short duration string, e.g. `"60s"`. Parsed with [`crate::utils::duration::parse_duration`];
    /// falls back to 60s when missing or malformed.
    #[serde(default)]
    pub approval_timeout: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostExecConfig {
    #[serde(default)]
    pub auto_approve: Vec<PatternEntry>,
    #[serde(default)]
    pub manual_approve: Vec<PatternEntry>,
    /// Short duration string for the command-approval queue; defaults to 5m.
    #[serde(default)]
    pub approval_timeout: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default)]
    pub file: Option<String>,
}

/// Top-level shape of `config.yaml`, shared by the global config and each
/// project's overlay.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuardianConfig {
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub hostexec: HostExecConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// The append-only record of human-approved decisions at a given scope.
/// Lives in `decisions.yaml` next to `config.yaml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecisionsFile {
    #[serde(default)]
    pub allow: Vec<DomainEntry>,
    #[serde(default)]
    pub deny: Vec<DomainEntry>,
}
