//! Remote command execution
//!
//! Everything the console observes or changes on a server goes through the
//! [`RemoteExecutor`] capability. A non-zero exit code is data for the
//! caller, not an error; `Err` is reserved for spawn failures and
//! timeouts.

use crate::registry::Server;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command as AsyncCommand;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run a shell command on the given server.
    async fn run(&self, server: &Server, command: &str) -> Result<CommandOutput>;
}

/// Executor backed by `sh -c` locally and the `ssh` client remotely.
pub struct ShellExecutor {
    pub command_timeout: Duration,
    pub connect_timeout: Duration,
}

impl ShellExecutor {
    pub fn new(command_timeout: Duration, connect_timeout: Duration) -> Self {
        Self { command_timeout, connect_timeout }
    }

    fn ssh_invocation(&self, server: &Server, command: &str) -> Result<AsyncCommand> {
        let conn = &server.connection;
        let host = conn
            .host
            .as_deref()
            .with_context(|| format!("server {} has no host configured", server.id))?;
        let user = conn
            .user
            .as_deref()
            .with_context(|| format!("server {} has no user configured", server.id))?;

        let mut cmd = AsyncCommand::new("ssh");
        cmd.arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg(format!("ConnectTimeout={}", self.connect_timeout.as_secs()))
            .arg("-o")
            .arg("StrictHostKeyChecking=accept-new");
        if let Some(key) = &conn.key_path {
            cmd.arg("-i").arg(key);
        }
        if let Some(port) = conn.port {
            cmd.arg("-p").arg(port.to_string());
        }
        cmd.arg(format!("{user}@{host}")).arg(command);
        Ok(cmd)
    }
}

#[async_trait]
impl RemoteExecutor for ShellExecutor {
    async fn run(&self, server: &Server, command: &str) -> Result<CommandOutput> {
        debug!(server = %server.id, "executing: {}", command);

        let mut cmd = if server.connection.local {
            let mut c = AsyncCommand::new("sh");
            c.arg("-c").arg(command);
            c
        } else {
            self.ssh_invocation(server, command)?
        };

        let output = tokio::time::timeout(
            self.command_timeout,
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped()).output(),
        )
        .await
        .with_context(|| format!("command timed out on {}", server.id))?
        .with_context(|| format!("failed to spawn command on {}", server.id))?;

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}
