//! Shared handle bundling every leaf component the four servers need.
//!
//! One `GuardianState`, `Arc`-cloned into each server's axum router (or, for
//! the raw-hyper proxy, captured by the per-connection service closure).
//! Matches the "single owner object per subsystem, no ambient singleton
//! access" rule: the supervisor builds exactly one of these at startup and
//! hands every server the same handle.

use crate::audit::AuditSink;
use crate::command::CommandMatcherRegistry;
use crate::config::ConfigPersister;
use crate::events::EventHub;
use crate::executor::CommandExecutor;
use crate::policy::PolicyEngine;
use crate::queue::{CommandQueue, DomainQueue};
use crate::token::TokenRegistry;
use std::sync::Arc;

#[derive(Clone)]
pub struct GuardianState {
    pub tokens: Arc<TokenRegistry>,
    pub policy: Arc<PolicyEngine>,
    pub command_matchers: Arc<CommandMatcherRegistry>,
    pub command_queue: Arc<CommandQueue>,
    pub domain_queue: Arc<DomainQueue>,
    pub events: Arc<EventHub>,
    pub audit: Option<Arc<AuditSink>>,
    pub executor: Arc<dyn CommandExecutor>,
    pub persister: Option<Arc<dyn ConfigPersister>>,
}

impl GuardianState {
    /// Install the event hub and audit sink on both queues. Must run before
    /// any request reaches the proxy or request server — see the queues'
    /// "captured at add-time" contract.
    pub fn wire_queues(&self) {
        self.command_queue.set_event_hub(self.events.clone());
        self.domain_queue.set_event_hub(self.events.clone());
        if let Some(audit) = &self.audit {
            self.command_queue.set_audit_sink(audit.clone());
            self.domain_queue.set_audit_sink(audit.clone());
        }
    }

    /// SIGHUP handler: flush the policy and command-pattern caches. Token
    /// state is reconciled separately by the supervisor, which holds the
    /// on-disk [`crate::token::TokenStore`] this state doesn't know about.
    pub fn reload_config(&self) {
        self.policy.reload();
        self.command_matchers.reload();
    }
}
