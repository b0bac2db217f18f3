//! Node database backup and restore
//!
//! Sequential shell pipelines through the executor: the node unit is
//! stopped around the archive step and started again on every path, so a
//! failed tar never leaves the node down.

use crate::config::NodeConfig;
use crate::executor::RemoteExecutor;
use crate::registry::Server;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{info, warn};

/// Archive the database directory. Returns the archive file name.
pub async fn create(
    executor: &dyn RemoteExecutor,
    server: &Server,
    node: &NodeConfig,
    now: DateTime<Utc>,
) -> Result<String> {
    let archive = format!("{}-db-{}.tar.gz", server.name, now.format("%Y%m%d%H%M%S"));
    info!(server = %server.id, "creating database backup {}", archive);

    let stop = executor
        .run(server, &format!("sudo systemctl stop {}", node.unit))
        .await?;
    if !stop.success() {
        anyhow::bail!("could not stop node unit: {}", stop.stderr.trim());
    }

    let tar = executor
        .run(
            server,
            &format!(
                "mkdir -p {backups} && tar -czf {backups}/{archive} -C {db} .",
                backups = node.backup_dir,
                db = node.database_dir,
            ),
        )
        .await;

    // The unit comes back regardless of how the archive step went.
    let start = executor
        .run(server, &format!("sudo systemctl start {}", node.unit))
        .await;
    if let Err(e) = &start {
        warn!(server = %server.id, "node restart after backup failed: {e:#}");
    }

    let tar = tar.context("backup archive step failed")?;
    if !tar.success() {
        anyhow::bail!("tar failed: {}", tar.stderr.trim());
    }
    start?;

    Ok(archive)
}

/// Archives available in the backup directory, newest-named last.
pub async fn list(
    executor: &dyn RemoteExecutor,
    server: &Server,
    node: &NodeConfig,
) -> Result<Vec<String>> {
    let out = executor
        .run(server, &format!("ls -1 {} 2>/dev/null", node.backup_dir))
        .await?;

    Ok(out
        .stdout
        .lines()
        .map(str::trim)
        .filter(|l| l.ends_with(".tar.gz"))
        .map(str::to_string)
        .collect())
}

/// Replace the database directory with the contents of a named archive.
pub async fn restore(
    executor: &dyn RemoteExecutor,
    server: &Server,
    node: &NodeConfig,
    archive: &str,
) -> Result<()> {
    // Archive names come from the front-end; keep path traversal out.
    if archive.contains('/') || archive.contains("..") {
        anyhow::bail!("invalid archive name: {archive}");
    }
    info!(server = %server.id, "restoring database from {}", archive);

    let stop = executor
        .run(server, &format!("sudo systemctl stop {}", node.unit))
        .await?;
    if !stop.success() {
        anyhow::bail!("could not stop node unit: {}", stop.stderr.trim());
    }

    let untar = executor
        .run(
            server,
            &format!(
                "rm -rf {db} && mkdir -p {db} && tar -xzf {backups}/{archive} -C {db}",
                db = node.database_dir,
                backups = node.backup_dir,
            ),
        )
        .await;

    let start = executor
        .run(server, &format!("sudo systemctl start {}", node.unit))
        .await;
    if let Err(e) = &start {
        warn!(server = %server.id, "node restart after restore failed: {e:#}");
    }

    let untar = untar.context("restore step failed")?;
    if !untar.success() {
        anyhow::bail!("untar failed: {}", untar.stderr.trim());
    }
    start?;

    Ok(())
}
