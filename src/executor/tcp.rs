//! Loopback-TCP realization of the guardian→executor transport.
//!
//! Frames requests as newline-delimited JSON over a loopback TCP connection,
//! preceded by a single `Authorization: Bearer <shared secret>` line — the
//! simplest realization of a single authenticated channel between the two
//! processes. A Unix-socket transport would satisfy the same
//! [`super::CommandExecutor`] trait without the request server or any other
//! caller noticing.

use super::{CommandExecutor, ExecReply, ExecRequest};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

pub struct TcpCommandExecutor {
    addr: String,
    shared_secret: String,
}

impl TcpCommandExecutor {
    pub fn new(addr: impl Into<String>, shared_secret: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            shared_secret: shared_secret.into(),
        }
    }

    /// Build from the environment: `CLOISTER_EXECUTOR_PORT`,
    /// `CLOISTER_SHARED_SECRET`.
    pub fn from_env() -> Result<Self> {
        let port = std::env::var("CLOISTER_EXECUTOR_PORT")
            .context("CLOISTER_EXECUTOR_PORT is not set")?;
        let secret = std::env::var("CLOISTER_SHARED_SECRET")
            .context("CLOISTER_SHARED_SECRET is not set")?;
        Ok(Self::new(format!("127.0.0.1:{port}"), secret))
    }
}

#[async_trait]
impl CommandExecutor for TcpCommandExecutor {
    async fn execute(&self, request: ExecRequest) -> Result<ExecReply> {
        let stream = TcpStream::connect(&self.addr)
            .await
            .with_context(|| format!("connecting to executor at {}", self.addr))?;
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        write_half
            .write_all(format!("Authorization: Bearer {}\n", self.shared_secret).as_bytes())
            .await
            .context("writing executor auth preamble")?;

        let body = serde_json::to_string(&request).context("serializing executor request")?;
        write_half.write_all(body.as_bytes()).await?;
        write_half.write_all(b"\n").await?;
        write_half.flush().await?;

        let mut line = String::new();
        let bytes_read = reader
            .read_line(&mut line)
            .await
            .context("reading executor response")?;
        if bytes_read == 0 {
            bail!("executor closed the connection without a response");
        }

        serde_json::from_str(line.trim()).context("parsing executor response")
    }
}
