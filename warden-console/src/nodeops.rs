//! Validator node process management
//!
//! Start/stop/restart the node unit, read its journal and report status.
//! All of it is plain systemctl/journalctl driven through the executor,
//! so it works the same for local and SSH-reachable servers.

use crate::config::NodeConfig;
use crate::executor::{CommandOutput, RemoteExecutor};
use crate::registry::Server;
use anyhow::Result;
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, Serialize)]
pub struct NodeStatus {
    /// systemd active state: active, inactive, failed, ...
    pub active_state: String,
    pub version: Option<String>,
}

pub async fn start(
    executor: &dyn RemoteExecutor,
    server: &Server,
    node: &NodeConfig,
) -> Result<CommandOutput> {
    info!(server = %server.id, "starting node unit {}", node.unit);
    executor
        .run(server, &format!("sudo systemctl start {}", node.unit))
        .await
}

pub async fn stop(
    executor: &dyn RemoteExecutor,
    server: &Server,
    node: &NodeConfig,
) -> Result<CommandOutput> {
    info!(server = %server.id, "stopping node unit {}", node.unit);
    executor
        .run(server, &format!("sudo systemctl stop {}", node.unit))
        .await
}

pub async fn restart(
    executor: &dyn RemoteExecutor,
    server: &Server,
    node: &NodeConfig,
) -> Result<CommandOutput> {
    info!(server = %server.id, "restarting node unit {}", node.unit);
    executor
        .run(server, &format!("sudo systemctl restart {}", node.unit))
        .await
}

/// Last `lines` journal lines of the node unit.
pub async fn logs(
    executor: &dyn RemoteExecutor,
    server: &Server,
    node: &NodeConfig,
    lines: usize,
) -> Result<String> {
    let out = executor
        .run(
            server,
            &format!("journalctl -u {} -n {} --no-pager", node.unit, lines),
        )
        .await?;
    if out.success() {
        Ok(out.stdout)
    } else {
        anyhow::bail!("journal read failed: {}", out.stderr.trim())
    }
}

/// Unit active state plus the node binary version when it can be read.
pub async fn status(
    executor: &dyn RemoteExecutor,
    server: &Server,
    node: &NodeConfig,
) -> Result<NodeStatus> {
    let active = executor
        .run(server, &format!("systemctl is-active {}", node.unit))
        .await?;

    let version = executor
        .run(server, &format!("{} --version", node.binary_path))
        .await
        .ok()
        .filter(|out| out.success())
        .and_then(|out| parse_version(&out.stdout));

    Ok(NodeStatus {
        active_state: active.stdout.trim().to_string(),
        version,
    })
}

/// Extract the version number from `--version` output such as
/// `humanode-peer 1.2.3-abcdef`.
pub fn parse_version(output: &str) -> Option<String> {
    output
        .split_whitespace()
        .find(|word| word.chars().next().is_some_and(|c| c.is_ascii_digit()))
        .map(|word| {
            word.split_once('-')
                .map(|(v, _)| v.to_string())
                .unwrap_or_else(|| word.to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_version_variants() {
        assert_eq!(parse_version("humanode-peer 1.2.3"), Some("1.2.3".to_string()));
        assert_eq!(parse_version("humanode-peer 1.2.3-a1b2c3"), Some("1.2.3".to_string()));
        assert_eq!(parse_version("node v-less output"), None);
        assert_eq!(parse_version(""), None);
    }
}
