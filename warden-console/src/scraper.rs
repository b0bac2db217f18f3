//! Dashboard scraping collaborator
//!
//! The browser session, OCR fallback and whatever else is needed to read
//! the dashboard live behind the [`DashboardScraper`] contract. Failures
//! never cross the boundary; a reading of `-1` means "could not be
//! determined". The tracker relies on the distinction between total
//! failure `(-1, -1)` and the valid "no pending deadline" outcome
//! `(-1, epoch >= 0)`.

use crate::config::ScraperConfig;
use async_trait::async_trait;
use serde::Deserialize;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command as AsyncCommand;
use tracing::warn;

pub const UNDETERMINED: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrapeReading {
    pub bioauth_seconds: i64,
    pub epoch_minutes: i64,
}

impl ScrapeReading {
    pub fn failed() -> Self {
        Self { bioauth_seconds: UNDETERMINED, epoch_minutes: UNDETERMINED }
    }

    /// A countdown was read from the dashboard.
    pub fn has_deadline(&self) -> bool {
        self.bioauth_seconds > 0
    }

    /// Successful read showing no pending re-authentication.
    pub fn is_no_deadline(&self) -> bool {
        self.bioauth_seconds == UNDETERMINED && self.epoch_minutes > UNDETERMINED
    }

    /// Anything that is neither a countdown nor a confirmed
    /// no-deadline read counts as a failed retrieval.
    pub fn is_total_failure(&self) -> bool {
        !self.has_deadline() && !self.is_no_deadline()
    }
}

#[async_trait]
pub trait DashboardScraper: Send + Sync {
    /// Read the bioauth countdown and epoch progress behind an access
    /// URL. Never fails; unreadable values come back as `-1`.
    async fn fetch(&self, url: &str) -> ScrapeReading;
}

#[derive(Debug, Deserialize)]
struct HelperOutput {
    bioauth_seconds: i64,
    epoch_minutes: i64,
}

/// Scraper delegating to an external helper command (headless browser,
/// OCR, anything honoring the stdout contract). The URL is appended as
/// the final argument; stdout must carry a JSON object with
/// `bioauth_seconds` and `epoch_minutes`.
pub struct HelperScraper {
    command: String,
    timeout: Duration,
}

impl HelperScraper {
    pub fn new(settings: &ScraperConfig) -> Self {
        Self {
            command: settings.helper_command.clone(),
            timeout: Duration::from_secs(settings.timeout_secs),
        }
    }

    async fn try_fetch(&self, url: &str) -> anyhow::Result<ScrapeReading> {
        let mut parts = shell_words::split(&self.command)?;
        if parts.is_empty() {
            anyhow::bail!("scraper helper command is empty");
        }
        let program = parts.remove(0);

        let output = tokio::time::timeout(
            self.timeout,
            AsyncCommand::new(program)
                .args(parts)
                .arg(url)
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .output(),
        )
        .await??;

        if !output.status.success() {
            anyhow::bail!(
                "helper exited with {}: {}",
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let parsed: HelperOutput = serde_json::from_slice(&output.stdout)?;
        Ok(ScrapeReading {
            bioauth_seconds: parsed.bioauth_seconds,
            epoch_minutes: parsed.epoch_minutes,
        })
    }
}

#[async_trait]
impl DashboardScraper for HelperScraper {
    async fn fetch(&self, url: &str) -> ScrapeReading {
        match self.try_fetch(url).await {
            Ok(reading) => reading,
            Err(e) => {
                warn!("dashboard scrape failed: {e:#}");
                ScrapeReading::failed()
            }
        }
    }
}
