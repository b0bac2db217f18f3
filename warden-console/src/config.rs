//! Console configuration with secure token storage
//!
//! Handles:
//! - Operator identity and Telegram credentials (token in OS keyring,
//!   config-file fallback for headless hosts)
//! - Tracker cadence and timeouts
//! - Tunnel, dashboard, node-unit and release-feed settings
//! - Cross-platform config/data file locations

use anyhow::{Context, Result};
use keyring::Entry;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const KEYRING_SERVICE: &str = "warden-console";
const KEYRING_TOKEN_KEY: &str = "telegram-bot-token";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleConfig {
    pub operator: OperatorConfig,
    pub telegram: TelegramConfig,
    pub tracker: TrackerConfig,
    pub tunnel: TunnelConfig,
    pub scraper: ScraperConfig,
    pub node: NodeConfig,
    pub update: UpdateConfig,
    pub paths: PathsConfig,
}

/// The single authorized operator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorConfig {
    pub user_id: i64,
    pub chat_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Fallback token location for hosts without a usable keyring.
    pub token: Option<String>,
    pub store_token_in_keyring: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    pub tick_interval_secs: u64,
    pub full_check_hours: i64,
    pub command_timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelConfig {
    /// systemd unit of the dashboard tunnel service.
    pub unit: String,
    /// Journal lines to scan for access URLs.
    pub log_lines: usize,
    /// Settle time after a best-effort tunnel restart.
    pub restart_settle_secs: u64,
    /// Dashboard URL template; `{token}` is replaced with the
    /// percent-encoded access token.
    pub url_template: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperConfig {
    /// Helper command driving the dashboard session. Invoked with the
    /// access URL appended as the final argument; must print a JSON
    /// object with `bioauth_seconds` and `epoch_minutes` on stdout.
    pub helper_command: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// systemd unit of the validator node process.
    pub unit: String,
    pub binary_path: String,
    pub database_dir: String,
    pub backup_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateConfig {
    /// `owner/repo` of the node release feed.
    pub github_repo: String,
    pub asset_suffix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    pub servers_file: PathBuf,
    pub state_file: PathBuf,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("warden-console");
        Self {
            operator: OperatorConfig { user_id: 0, chat_id: 0 },
            telegram: TelegramConfig { token: None, store_token_in_keyring: true },
            tracker: TrackerConfig {
                tick_interval_secs: 300,
                full_check_hours: 168,
                command_timeout_secs: 30,
                connect_timeout_secs: 10,
            },
            tunnel: TunnelConfig {
                unit: "dashboard-tunnel.service".to_string(),
                log_lines: 200,
                restart_settle_secs: 10,
                url_template: "https://dashboard.humanode.io/open?url={token}".to_string(),
            },
            scraper: ScraperConfig {
                helper_command: "warden-scrape".to_string(),
                timeout_secs: 90,
            },
            node: NodeConfig {
                unit: "humanode-peer.service".to_string(),
                binary_path: "/opt/humanode/humanode-peer".to_string(),
                database_dir: "/opt/humanode/data".to_string(),
                backup_dir: "/opt/humanode/backups".to_string(),
            },
            update: UpdateConfig {
                github_repo: "humanode-network/humanode".to_string(),
                asset_suffix: "linux-x64".to_string(),
            },
            paths: PathsConfig {
                servers_file: data_dir.join("servers.json"),
                state_file: data_dir.join("state.json"),
            },
        }
    }
}

impl ConsoleConfig {
    /// Load config from the OS-specific location, falling back to
    /// defaults on first run.
    pub async fn load() -> Result<Self> {
        let config_path = Self::config_file_path()?;

        if config_path.exists() {
            let content = tokio::fs::read_to_string(&config_path).await?;
            let mut config: ConsoleConfig = toml::from_str(&content)
                .with_context(|| format!("invalid config at {}", config_path.display()))?;

            if config.telegram.store_token_in_keyring && config.telegram.token.is_none() {
                config.telegram.token = Self::load_token().ok();
            }

            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to the OS-specific location.
    pub async fn save(&self) -> Result<()> {
        let config_path = Self::config_file_path()?;
        if let Some(parent) = config_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // The token never lands in the file when the keyring is in use.
        let mut on_disk = self.clone();
        if on_disk.telegram.store_token_in_keyring {
            if let Some(token) = on_disk.telegram.token.take() {
                Self::save_token(&token)?;
            }
        }

        let content = toml::to_string_pretty(&on_disk)?;
        tokio::fs::write(&config_path, content).await?;
        Ok(())
    }

    pub fn config_file_path() -> Result<PathBuf> {
        let mut path = dirs::config_dir().context("could not find config directory")?;
        path.push("warden-console");
        path.push("config.toml");
        Ok(path)
    }

    /// Configuration failures are fatal at startup only; steady-state
    /// ticking never re-validates.
    pub fn ensure_ready(&self) -> Result<()> {
        if self.operator.chat_id == 0 {
            anyhow::bail!("operator.chat_id is not configured");
        }
        if self.telegram.token.as_deref().unwrap_or("").is_empty() {
            anyhow::bail!("telegram bot token is not configured (keyring or config)");
        }
        Ok(())
    }

    fn load_token() -> Result<String> {
        let entry = Entry::new(KEYRING_SERVICE, KEYRING_TOKEN_KEY)?;
        entry.get_password().map_err(Into::into)
    }

    fn save_token(token: &str) -> Result<()> {
        let entry = Entry::new(KEYRING_SERVICE, KEYRING_TOKEN_KEY)?;
        entry.set_password(token).map_err(Into::into)
    }

    pub fn delete_token() -> Result<()> {
        let entry = Entry::new(KEYRING_SERVICE, KEYRING_TOKEN_KEY)?;
        entry.delete_credential().map_err(Into::into)
    }
}
