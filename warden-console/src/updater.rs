//! Node binary updates from the release feed
//!
//! Features:
//! - Check the GitHub release feed for a newer node binary
//! - Compare against the version running on the server
//! - Staged apply: download on the server, stop unit, swap with a
//!   .backup copy, start unit

use crate::config::{NodeConfig, UpdateConfig};
use crate::executor::RemoteExecutor;
use crate::nodeops;
use crate::registry::Server;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Serialize)]
pub struct ReleaseInfo {
    pub version: String,
    pub download_url: String,
    pub release_notes: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateCheck {
    pub current_version: Option<String>,
    pub latest: ReleaseInfo,
    pub is_update_available: bool,
}

#[derive(Debug, Deserialize)]
struct GitHubRelease {
    tag_name: String,
    body: String,
    assets: Vec<GitHubAsset>,
}

#[derive(Debug, Deserialize)]
struct GitHubAsset {
    name: String,
    browser_download_url: String,
}

pub struct ReleaseFeed {
    client: reqwest::Client,
    settings: UpdateConfig,
}

impl ReleaseFeed {
    pub fn new(settings: &UpdateConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            settings: settings.clone(),
        }
    }

    /// Latest release carrying an asset for the configured platform.
    pub async fn latest(&self) -> Result<ReleaseInfo> {
        let url = format!(
            "https://api.github.com/repos/{}/releases/latest",
            self.settings.github_repo
        );

        let response = self
            .client
            .get(&url)
            .header("User-Agent", "warden-console")
            .send()
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("failed to fetch release info: {}", response.status());
        }

        let release: GitHubRelease = response.json().await?;
        let version = release.tag_name.trim_start_matches('v').to_string();

        let asset = release
            .assets
            .iter()
            .find(|a| a.name.contains(&self.settings.asset_suffix))
            .with_context(|| {
                format!("no asset found for platform: {}", self.settings.asset_suffix)
            })?;

        Ok(ReleaseInfo {
            version,
            download_url: asset.browser_download_url.clone(),
            release_notes: release.body,
        })
    }

    /// Compare the feed against the binary running on a server.
    pub async fn check(
        &self,
        executor: &dyn RemoteExecutor,
        server: &Server,
        node: &NodeConfig,
    ) -> Result<UpdateCheck> {
        let latest = self.latest().await?;
        let current_version = nodeops::status(executor, server, node)
            .await
            .ok()
            .and_then(|s| s.version);

        let is_update_available = match &current_version {
            Some(current) => is_newer_version(current, &latest.version),
            None => true,
        };

        Ok(UpdateCheck { current_version, latest, is_update_available })
    }
}

/// Apply a release to a server: the server downloads the asset itself,
/// then the unit is stopped, the binary swapped with a `.backup` copy
/// and the unit started again.
pub async fn apply(
    executor: &dyn RemoteExecutor,
    server: &Server,
    node: &NodeConfig,
    release: &ReleaseInfo,
) -> Result<()> {
    info!(server = %server.id, "updating node binary to {}", release.version);
    let staged = format!("/tmp/warden-node-update-{}", release.version);

    let download = executor
        .run(
            server,
            &format!("curl -fsSL -o {staged} {}", release.download_url),
        )
        .await?;
    if !download.success() {
        anyhow::bail!("asset download failed: {}", download.stderr.trim());
    }

    let stop = executor
        .run(server, &format!("sudo systemctl stop {}", node.unit))
        .await?;
    if !stop.success() {
        anyhow::bail!("could not stop node unit: {}", stop.stderr.trim());
    }

    let swap = executor
        .run(
            server,
            &format!(
                "sudo cp {bin} {bin}.backup && sudo mv {staged} {bin} && sudo chmod 755 {bin}",
                bin = node.binary_path,
            ),
        )
        .await?;
    if !swap.success() {
        // Bring the old binary back up rather than leaving the node down.
        let _ = executor
            .run(server, &format!("sudo systemctl start {}", node.unit))
            .await;
        anyhow::bail!("binary swap failed: {}", swap.stderr.trim());
    }

    let start = executor
        .run(server, &format!("sudo systemctl start {}", node.unit))
        .await?;
    if !start.success() {
        anyhow::bail!("node failed to start after update: {}", start.stderr.trim());
    }

    info!(server = %server.id, "update to {} completed", release.version);
    Ok(())
}

pub fn is_newer_version(current: &str, latest: &str) -> bool {
    let parse = |v: &str| -> Vec<u32> {
        v.split('.').map(|s| s.parse().unwrap_or(0)).collect()
    };
    let current_parts = parse(current);
    let latest_parts = parse(latest);

    for (c, l) in current_parts.iter().zip(latest_parts.iter()) {
        if l > c {
            return true;
        } else if l < c {
            return false;
        }
    }
    latest_parts.len() > current_parts.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_comparison() {
        assert!(is_newer_version("1.0.0", "1.0.1"));
        assert!(is_newer_version("1.0.0", "1.1.0"));
        assert!(is_newer_version("1.0.9", "1.0.10"));
        assert!(!is_newer_version("1.1.0", "1.0.0"));
        assert!(!is_newer_version("1.0.0", "1.0.0"));
        assert!(is_newer_version("1.0", "1.0.1"));
    }
}
