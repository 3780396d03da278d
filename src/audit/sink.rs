//! The append-only audit writer.
//!
//! Every component that produces audit events holds an `Option<Arc<AuditSink>>`
//! — a missing sink is a documented no-op, not an error. A present sink
//! always mirrors the event through `tracing` in addition to writing the
//! line, so the audit trail and the operational log share one emission
//! point even though only the file is meant to be durable.

use crate::audit::format::{format_line, Category};
use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

/// Serializes writes so a single audit line is never interleaved with
/// another, and optionally appends to a file.
pub struct AuditSink {
    writer: Mutex<Option<Box<dyn Write + Send>>>,
}

impl AuditSink {
    /// A sink with no backing file: every `log` call still mirrors to
    /// `tracing` but writes nothing durable. Useful for tests and for a
    /// guardian run with `log.file` unset.
    pub fn disabled() -> Self {
        Self {
            writer: Mutex::new(None),
        }
    }

    /// Append to the file at `path`, creating it (and its parent directory)
    /// if necessary.
    pub fn to_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating audit log directory {}", parent.display()))?;
        }
        let file: File = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening audit log {}", path.display()))?;
        Ok(Self {
            writer: Mutex::new(Some(Box::new(file))),
        })
    }

    /// Write any type implementing `Write` — used by tests to capture lines
    /// into an in-memory buffer.
    pub fn to_writer(writer: impl Write + Send + 'static) -> Self {
        Self {
            writer: Mutex::new(Some(Box::new(writer))),
        }
    }

    /// Append one audit line and mirror it through `tracing`. Field order is
    /// the caller's responsibility — it is fixed per event kind in the
    /// call sites under `server/` and `queue/`.
    pub fn log(&self, category: Category, event: &str, fields: &[(&str, String)]) {
        let line = format_line(category, event, fields);

        if matches!(event, "DENY" | "TIMEOUT" | "DOMAIN_DENY" | "DOMAIN_TIMEOUT") {
            tracing::warn!(category = ?category, event, "{line}");
        } else {
            tracing::info!(category = ?category, event, "{line}");
        }

        let mut guard = self.writer.lock().expect("audit sink lock poisoned");
        if let Some(writer) = guard.as_mut() {
            if let Err(err) = writeln!(writer, "{line}") {
                tracing::error!(error = %err, "failed to write audit log line");
                return;
            }
            let _ = writer.flush();
        }
    }
}
