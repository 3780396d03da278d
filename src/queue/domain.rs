//! The domain-approval queue: pending CONNECT requests awaiting a
//! human decision, with `(token, domain)` deduplication — concurrent
//! requests for the same destination coalesce onto one pending entry and
//! all of their response channels receive the same decision (fan-out).

use crate::audit::{AuditSink, Category};
use crate::events::{Event, EventHub};
use crate::policy::Decision;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// A network destination awaiting a human decision.
#[derive(Debug, Clone)]
pub struct PendingDomain {
    pub id: String,
    pub cloister: String,
    pub project: String,
    pub domain: String,
    pub token: String,
    pub timestamp: DateTime<Utc>,
}

struct Entry {
    item: PendingDomain,
    senders: Vec<mpsc::Sender<Decision>>,
    event_hub: Option<Arc<EventHub>>,
    audit: Option<Arc<AuditSink>>,
}

/// In-memory queue of pending domain-approval requests, deduplicated by
/// `(token, domain)`.
pub struct DomainQueue {
    entries: Mutex<HashMap<String, Entry>>,
    by_key: Mutex<HashMap<(String, String), String>>,
    timeout: Duration,
    event_hub: Mutex<Option<Arc<EventHub>>>,
    audit: Mutex<Option<Arc<AuditSink>>>,
}

/// What `add()` returned: either a fresh pending entry, or an existing one
/// this caller's request coalesced onto.
pub enum AddOutcome {
    Created(String),
    Coalesced(String),
}

impl AddOutcome {
    pub fn id(&self) -> &str {
        match self {
            AddOutcome::Created(id) | AddOutcome::Coalesced(id) => id,
        }
    }
}

impl DomainQueue {
    pub fn new(timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(HashMap::new()),
            by_key: Mutex::new(HashMap::new()),
            timeout,
            event_hub: Mutex::new(None),
            audit: Mutex::new(None),
        })
    }

    pub fn set_event_hub(&self, hub: Arc<EventHub>) {
        *self.event_hub.lock().expect("domain queue lock poisoned") = Some(hub);
    }

    pub fn set_audit_sink(&self, audit: Arc<AuditSink>) {
        *self.audit.lock().expect("domain queue lock poisoned") = Some(audit);
    }

    /// Enqueue a pending domain request, or coalesce onto an existing one
    /// for the same `(token, domain)`. Returns the id and a receiver the
    /// caller must await; the receiver's buffer is 1, satisfying the
    /// channel-leak discipline for a non-blocking fan-out send.
    pub fn add(
        self: &Arc<Self>,
        cloister: String,
        project: String,
        domain: String,
        token: String,
    ) -> (AddOutcome, mpsc::Receiver<Decision>) {
        let key = (token.clone(), domain.clone());
        let (sender, receiver) = mpsc::channel(1);

        let mut by_key = self.by_key.lock().expect("domain queue lock poisoned");
        if let Some(existing_id) = by_key.get(&key).cloned() {
            let mut entries = self.entries.lock().expect("domain queue lock poisoned");
            if let Some(entry) = entries.get_mut(&existing_id) {
                entry.senders.push(sender);
                return (AddOutcome::Coalesced(existing_id), receiver);
            }
            // Stale index entry (its pending item already resolved) — fall through to create fresh.
            by_key.remove(&key);
        }

        let id = crate::utils::ids::random_hex_id();
        let item = PendingDomain {
            id: id.clone(),
            cloister,
            project,
            domain,
            token,
            timestamp: Utc::now(),
        };
        let entry = Entry {
            item,
            senders: vec![sender],
            event_hub: self.event_hub.lock().expect("domain queue lock poisoned").clone(),
            audit: self.audit.lock().expect("domain queue lock poisoned").clone(),
        };
        self.entries.lock().expect("domain queue lock poisoned").insert(id.clone(), entry);
        by_key.insert(key, id.clone());
        drop(by_key);

        let queue = self.clone();
        let timeout_id = id.clone();
        let timeout = self.timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            queue.fire_timeout(&timeout_id);
        });

        (AddOutcome::Created(id), receiver)
    }

    fn fire_timeout(&self, id: &str) {
        let entry = self.take_entry(id);
        let Some(entry) = entry else {
            return;
        };
        for sender in &entry.senders {
            let _ = sender.try_send(Decision::timeout());
        }
        if let Some(audit) = &entry.audit {
            audit.log(
                Category::Domain,
                "DOMAIN_TIMEOUT",
                &[
                    ("project", entry.item.project.clone()),
                    ("cloister", entry.item.cloister.clone()),
                    ("domain", entry.item.domain.clone()),
                ],
            );
        }
        if let Some(hub) = &entry.event_hub {
            hub.broadcast(Event::new(
                "domain-request-removed",
                format!("{{\"id\":\"{}\"}}", entry.item.id),
            ));
        }
    }

    fn take_entry(&self, id: &str) -> Option<Entry> {
        let entry = self.entries.lock().expect("domain queue lock poisoned").remove(id);
        if let Some(entry) = &entry {
            let key = (entry.item.token.clone(), entry.item.domain.clone());
            self.by_key.lock().expect("domain queue lock poisoned").remove(&key);
        }
        entry
    }

    pub fn get(&self, id: &str) -> Option<PendingDomain> {
        self.entries
            .lock()
            .expect("domain queue lock poisoned")
            .get(id)
            .map(|e| e.item.clone())
    }

    /// Deliver `decision` to every coalesced waiter and drop the entry.
    /// Returns `false` if no such id is pending.
    pub fn resolve(&self, id: &str, decision: Decision) -> bool {
        match self.take_entry(id) {
            Some(entry) => {
                for sender in &entry.senders {
                    let _ = sender.try_send(decision.clone());
                }
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, id: &str) -> bool {
        self.take_entry(id).is_some()
    }

    pub fn list(&self) -> Vec<PendingDomain> {
        self.entries
            .lock()
            .expect("domain queue lock poisoned")
            .values()
            .map(|e| e.item.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("domain queue lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
