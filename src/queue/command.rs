//! The command-approval queue: one pending `hostexec` request per
//! entry, a single response channel, a per-item timeout timer.

use crate::audit::{AuditSink, Category};
use crate::events::{Event, EventHub};
use crate::policy::{Decision, DecisionStatus};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// A host-command request awaiting a human decision.
#[derive(Debug, Clone)]
pub struct PendingCommand {
    pub id: String,
    pub cloister: String,
    pub project: String,
    pub cmd: String,
    pub args: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

struct Entry {
    item: PendingCommand,
    sender: mpsc::Sender<Decision>,
    event_hub: Option<Arc<EventHub>>,
    audit: Option<Arc<AuditSink>>,
}

/// In-memory queue of pending `hostexec` command approvals.
pub struct CommandQueue {
    entries: Mutex<HashMap<String, Entry>>,
    timeout: Duration,
    event_hub: Mutex<Option<Arc<EventHub>>>,
    audit: Mutex<Option<Arc<AuditSink>>>,
}

impl CommandQueue {
    pub fn new(timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(HashMap::new()),
            timeout,
            event_hub: Mutex::new(None),
            audit: Mutex::new(None),
        })
    }

    /// Install the event hub used by *future* `add()` calls. Items already
    /// queued keep whichever reference was captured when they were added.
    pub fn set_event_hub(&self, hub: Arc<EventHub>) {
        *self.event_hub.lock().expect("command queue lock poisoned") = Some(hub);
    }

    pub fn set_audit_sink(&self, audit: Arc<AuditSink>) {
        *self.audit.lock().expect("command queue lock poisoned") = Some(audit);
    }

    /// Enqueue a pending command and return its id plus a receiver the
    /// caller must await. The returned channel has a buffer of 1 so a
    /// non-blocking `try_send` from the decision or timeout path can never
    /// drop a terminal decision.
    pub fn add(self: &Arc<Self>, cloister: String, project: String, cmd: String, args: Vec<String>) -> (String, mpsc::Receiver<Decision>) {
        let id = crate::utils::ids::random_hex_id();
        let (sender, receiver) = mpsc::channel(1);
        let item = PendingCommand {
            id: id.clone(),
            cloister,
            project,
            cmd,
            args,
            timestamp: Utc::now(),
        };
        let entry = Entry {
            item,
            sender,
            event_hub: self.event_hub.lock().expect("command queue lock poisoned").clone(),
            audit: self.audit.lock().expect("command queue lock poisoned").clone(),
        };
        self.entries.lock().expect("command queue lock poisoned").insert(id.clone(), entry);

        let queue = self.clone();
        let timeout_id = id.clone();
        let timeout = self.timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            queue.fire_timeout(&timeout_id);
        });

        (id, receiver)
    }

    fn fire_timeout(&self, id: &str) {
        let entry = self.entries.lock().expect("command queue lock poisoned").remove(id);
        let Some(entry) = entry else {
            return; // already resolved by a decision path — no-op
        };
        let _ = entry.sender.try_send(Decision::timeout());
        if let Some(audit) = &entry.audit {
            audit.log(
                Category::Hostexec,
                "TIMEOUT",
                &[
                    ("project", entry.item.project.clone()),
                    ("cloister", entry.item.cloister.clone()),
                    ("cmd", entry.item.cmd.clone()),
                ],
            );
        }
        if let Some(hub) = &entry.event_hub {
            hub.broadcast(Event::new("request-removed", format!("{{\"id\":\"{}\"}}", entry.item.id)));
        }
    }

    pub fn get(&self, id: &str) -> Option<PendingCommand> {
        self.entries
            .lock()
            .expect("command queue lock poisoned")
            .get(id)
            .map(|e| e.item.clone())
    }

    /// Send a terminal decision to the pending item's caller and drop the
    /// entry. Returns `false` if no such id is pending (404 at the HTTP
    /// layer).
    pub fn resolve(&self, id: &str, decision: Decision) -> bool {
        let entry = self.entries.lock().expect("command queue lock poisoned").remove(id);
        match entry {
            Some(entry) => {
                let _ = entry.sender.try_send(decision);
                true
            }
            None => false,
        }
    }

    /// Remove an entry without delivering a response. Callers must have
    /// already sent a decision through some other path.
    pub fn remove(&self, id: &str) -> bool {
        self.entries.lock().expect("command queue lock poisoned").remove(id).is_some()
    }

    pub fn list(&self) -> Vec<PendingCommand> {
        self.entries
            .lock()
            .expect("command queue lock poisoned")
            .values()
            .map(|e| e.item.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("command queue lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_add_then_resolve_delivers_exactly_one_decision() {
        let queue = CommandQueue::new(Duration::from_secs(5));
        let (id, mut rx) = queue.add("demo-main".into(), "demo".into(), "docker compose up".into(), args(&["docker", "compose", "up"]));
        assert_eq!(queue.len(), 1);

        assert!(queue.resolve(&id, Decision::approved()));
        let decision = rx.recv().await.unwrap();
        assert_eq!(decision.status, DecisionStatus::Approved);
        assert_eq!(queue.len(), 0);

        // No further messages — the channel is now closed (sender dropped).
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_resolve_missing_id_returns_false() {
        let queue = CommandQueue::new(Duration::from_secs(5));
        assert!(!queue.resolve("nope", Decision::approved()));
    }

    #[tokio::test]
    async fn test_timeout_delivers_timeout_decision() {
        let queue = CommandQueue::new(Duration::from_millis(20));
        let (_id, mut rx) = queue.add("demo-main".into(), "demo".into(), "ls".into(), args(&["ls"]));
        let decision = rx.recv().await.unwrap();
        assert_eq!(decision.status, DecisionStatus::Timeout);
        assert_eq!(queue.len(), 0);
    }

    #[tokio::test]
    async fn test_resolve_races_timeout_only_one_decision_lands() {
        let queue = CommandQueue::new(Duration::from_millis(20));
        let (id, mut rx) = queue.add("demo-main".into(), "demo".into(), "ls".into(), args(&["ls"]));
        queue.resolve(&id, Decision::approved());
        tokio::time::sleep(Duration::from_millis(60)).await;
        let decision = rx.recv().await.unwrap();
        assert_eq!(decision.status, DecisionStatus::Approved);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_list_and_get() {
        let queue = CommandQueue::new(Duration::from_secs(5));
        let (id, _rx) = queue.add("demo-main".into(), "demo".into(), "ls -la".into(), args(&["ls", "-la"]));
        assert_eq!(queue.list().len(), 1);
        assert_eq!(queue.get(&id).unwrap().cmd, "ls -la");
        assert!(queue.get("missing").is_none());
    }
}
