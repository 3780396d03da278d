//! The SSE event hub: broadcasts `Event`s to any number of
//! subscribed web clients, each behind its own bounded channel, with
//! non-blocking sends so one slow client never stalls a broadcaster (I5).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

const SUBSCRIBER_BUFFER: usize = 16;

/// One SSE event: `type` becomes the `event:` line, `data` the (possibly
/// multiline) `data:` payload.
#[derive(Debug, Clone)]
pub struct Event {
    pub event_type: String,
    pub data: String,
}

impl Event {
    pub fn new(event_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            data: data.into(),
        }
    }

    /// Render as wire-format SSE: `event: <type>\ndata: <line>\n…\n\n`, one
    /// `data:` line per line of (possibly multiline) payload.
    pub fn to_sse_text(&self) -> String {
        let mut out = format!("event: {}\n", self.event_type);
        for line in self.data.lines() {
            out.push_str("data: ");
            out.push_str(line);
            out.push('\n');
        }
        if self.data.is_empty() {
            out.push_str("data: \n");
        }
        out.push('\n');
        out
    }
}

pub type SubscriberId = u64;

struct Subscriber {
    sender: mpsc::Sender<Event>,
}

/// Owns every subscriber channel. No broadcaster holds a channel after
/// `close()` — subscribers are removed from the map the moment they
/// unsubscribe or the hub shuts down.
pub struct EventHub {
    subscribers: Mutex<HashMap<SubscriberId, Subscriber>>,
    next_id: AtomicU64,
    shutdown: std::sync::atomic::AtomicBool,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHub {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            shutdown: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Register a new subscriber. Returns `None` once the hub has been
    /// `close()`d — callers (the SSE handler) should respond `503`.
    pub fn subscribe(&self) -> Option<(SubscriberId, mpsc::Receiver<Event>)> {
        if self.shutdown.load(Ordering::Acquire) {
            return None;
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        self.subscribers
            .lock()
            .expect("event hub lock poisoned")
            .insert(id, Subscriber { sender: tx });
        Some((id, rx))
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        self.subscribers.lock().expect("event hub lock poisoned").remove(&id);
    }

    /// Non-blocking send to every subscriber; a full buffer drops the event
    /// for that subscriber only (I5) — it never blocks the caller and never
    /// affects other subscribers.
    pub fn broadcast(&self, event: Event) {
        let subscribers = self.subscribers.lock().expect("event hub lock poisoned");
        for subscriber in subscribers.values() {
            let _ = subscriber.sender.try_send(event.clone());
        }
    }

    /// Close every subscriber channel and mark the hub shut down; further
    /// `subscribe()` calls return `None`.
    pub fn close(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.subscribers.lock().expect("event hub lock poisoned").clear();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().expect("event hub lock poisoned").len()
    }
}
