//! In-memory approval queues: one for pending `hostexec` commands,
//! one for pending domain requests. Both start a per-item timer at `add`
//! and guarantee exactly one terminal decision per response channel (I2).

pub mod command;
pub mod domain;

pub use command::{CommandQueue, PendingCommand};
pub use domain::{AddOutcome, DomainQueue, PendingDomain};
