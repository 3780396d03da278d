//! Client interface to the host-side executor that actually runs approved
//! commands, consumed here via [`CommandExecutor`]. The request server never
//! forks or runs a shell itself — every approved command is handed to this
//! trait as a structured `{command, args[], workdir?, env?, timeout_ms?}`
//! request.

mod tcp;

pub use tcp::TcpCommandExecutor;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecRequest {
    pub command: String,
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workdir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecStatus {
    Completed,
    Timeout,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecReply {
    pub status: ExecStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The guardian's only way to run a host command — implemented by the
/// out-of-process executor client. A fake implementation backs the request
/// server's unit tests.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, request: ExecRequest) -> anyhow::Result<ExecReply>;
}
