pub mod engine;
pub mod types;

pub use engine::PolicyEngine;
pub use types::{Decision, DecisionStatus, HostSet, PolicyVerdict, Scope};
