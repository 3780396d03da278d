//! Bridges the proxy server's blocking CONNECT handling to the domain queue,
//! owning every `DOMAIN_*` audit line and event-hub broadcast that isn't
//! already produced by the queue itself (the queue only emits `DOMAIN_TIMEOUT`
//! — see [`crate::queue::domain`]). For every blocked, approved, or denied
//! host, the approver is what emits the corresponding `DOMAIN_*` audit event.

use crate::audit::{AuditSink, Category};
use crate::events::{Event, EventHub};
use crate::policy::{Decision, DecisionStatus};
use crate::queue::{AddOutcome, DomainQueue};
use std::sync::Arc;

pub struct DomainApprover {
    queue: Arc<DomainQueue>,
    events: Arc<EventHub>,
    audit: Option<Arc<AuditSink>>,
}

impl DomainApprover {
    pub fn new(queue: Arc<DomainQueue>, events: Arc<EventHub>, audit: Option<Arc<AuditSink>>) -> Self {
        Self { queue, events, audit }
    }

    /// Enqueue a domain request and block until a human decision or timeout
    /// arrives. Coalesces onto an existing pending entry for the same
    /// `(token, domain)` per the queue's dedup contract.
    pub async fn request_approval(&self, cloister: &str, project: &str, domain: &str, token: &str) -> Decision {
        self.audit(
            "DOMAIN_REQUEST",
            &[("project", project), ("cloister", cloister), ("domain", domain)],
        );

        let (outcome, mut rx) = self
            .queue
            .add(cloister.to_string(), project.to_string(), domain.to_string(), token.to_string());

        if matches!(outcome, AddOutcome::Created(_)) {
            self.events.broadcast(Event::new(
                "domain-request-added",
                format!("{{\"id\":\"{}\",\"domain\":\"{domain}\"}}", outcome.id()),
            ));
        }

        match rx.recv().await {
            Some(decision) => decision,
            // Sender dropped without a decision — treat as timeout so the
            // caller always gets a terminal status.
            None => Decision::timeout(),
        }
    }

    /// Record an immediate (non-queued) denial: blocked port, policy deny, or
    /// `unlisted_domain_behavior == "reject"`.
    pub fn deny_immediate(&self, cloister: &str, project: &str, domain: &str, reason: &str) {
        self.audit(
            "DOMAIN_DENY",
            &[
                ("project", project),
                ("cloister", cloister),
                ("domain", domain),
                ("reason", reason),
            ],
        );
    }

    fn audit(&self, event: &str, fields: &[(&str, &str)]) {
        if let Some(audit) = &self.audit {
            let owned: Vec<(&str, String)> = fields.iter().map(|(k, v)| (*k, v.to_string())).collect();
            audit.log(Category::Domain, event, &owned);
        }
    }
}
