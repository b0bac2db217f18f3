//! Dashboard access URL discovery
//!
//! The dashboard hands out single-use, rotating access URLs through the
//! tunnel service's logs. Discovery tails the journal, collects every
//! `url=<token>` line and picks the one with the latest parsed timestamp;
//! journal output is not guaranteed to be append-ordered, so "last line
//! wins" would be wrong. No match is a normal outcome, not an error.

use crate::config::TunnelConfig;
use crate::executor::RemoteExecutor;
use crate::registry::Server;
use anyhow::Result;
use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use std::time::Duration;
use tracing::{debug, warn};

/// Discover the freshest dashboard access URL for a server.
///
/// Best-effort: when the tunnel unit is not active it is restarted and
/// given a settle period, but a failure there does not abort discovery.
pub async fn discover(
    executor: &dyn RemoteExecutor,
    server: &Server,
    settings: &TunnelConfig,
) -> Result<Option<String>> {
    ensure_tunnel_active(executor, server, settings).await;

    let tail = executor
        .run(
            server,
            &format!(
                "journalctl -u {} -n {} --no-pager -o short-iso",
                settings.unit, settings.log_lines
            ),
        )
        .await?;

    if !tail.success() {
        warn!(server = %server.id, "journal tail failed: {}", tail.stderr.trim());
        return Ok(None);
    }

    Ok(latest_token(&tail.stdout).map(|token| dashboard_url(&settings.url_template, &token)))
}

async fn ensure_tunnel_active(
    executor: &dyn RemoteExecutor,
    server: &Server,
    settings: &TunnelConfig,
) {
    let active = executor
        .run(server, &format!("systemctl is-active {}", settings.unit))
        .await
        .map(|out| out.stdout.trim() == "active")
        .unwrap_or(false);

    if active {
        return;
    }

    debug!(server = %server.id, "tunnel unit {} not active, restarting", settings.unit);
    if let Err(e) = executor
        .run(server, &format!("sudo systemctl restart {}", settings.unit))
        .await
    {
        warn!(server = %server.id, "tunnel restart failed: {e:#}");
    }
    tokio::time::sleep(Duration::from_secs(settings.restart_settle_secs)).await;
}

/// Scan journal output for `<ISO8601 ts> ... url=<token>` lines and
/// return the token carried by the temporally latest entry.
pub fn latest_token(journal: &str) -> Option<String> {
    let pattern = Regex::new(
        r"(?m)^(\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:?\d{2})?)\s.*?url=(\S+)",
    )
    .expect("valid regex");

    let mut best: Option<(DateTime<Utc>, String)> = None;
    for caps in pattern.captures_iter(journal) {
        let Some(ts) = parse_log_timestamp(&caps[1]) else {
            continue;
        };
        let token = caps[2].to_string();
        if best.as_ref().map(|(t, _)| ts > *t).unwrap_or(true) {
            best = Some((ts, token));
        }
    }
    best.map(|(_, token)| token)
}

/// Embed a percent-encoded token into the dashboard URL template.
pub fn dashboard_url(template: &str, token: &str) -> String {
    template.replace("{token}", &urlencoding::encode(token))
}

fn parse_log_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    // journalctl short-iso writes offsets without a colon
    for format in ["%Y-%m-%dT%H:%M:%S%z", "%Y-%m-%d %H:%M:%S%z"] {
        if let Ok(ts) = DateTime::parse_from_str(raw, format) {
            return Some(ts.with_timezone(&Utc));
        }
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    None
}
