//! Warden Console daemon entry point.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Init tracing
//!   3. Load config; credentials are fatal here, never mid-flight
//!   4. Build the application context (registry, store, collaborators)
//!   5. Run the tracker on a fixed interval until ctrl-c

use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use warden_console::executor::ShellExecutor;
use warden_console::notify::TelegramNotifier;
use warden_console::registry::ServerRegistry;
use warden_console::scraper::HelperScraper;
use warden_console::state::StateStore;
use warden_console::{AppContext, BioauthTracker, ConsoleConfig};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "warden_console=info".to_string()),
        )
        .init();

    info!("Warden console starting...");

    let config = ConsoleConfig::load().await.context("failed to load config")?;
    config.ensure_ready().context("console is not configured")?;

    let registry = ServerRegistry::new(&config.paths.servers_file);
    registry.load().await.context("failed to load server registry")?;
    let store = StateStore::new(&config.paths.state_file);

    let executor = Arc::new(ShellExecutor::new(
        Duration::from_secs(config.tracker.command_timeout_secs),
        Duration::from_secs(config.tracker.connect_timeout_secs),
    ));
    let scraper = Arc::new(HelperScraper::new(&config.scraper));
    let token = config.telegram.token.clone().unwrap_or_default();
    let notifier = Arc::new(TelegramNotifier::new(&token, config.operator.chat_id));

    let tick_interval = Duration::from_secs(config.tracker.tick_interval_secs);
    let ctx = AppContext::new(config, registry, store, executor, scraper, notifier);

    info!(
        servers = ctx.registry.list().await.len(),
        "tracking started, tick every {}s",
        tick_interval.as_secs()
    );

    let tracker = BioauthTracker::new(ctx);
    let mut timer = tokio::time::interval(tick_interval);

    loop {
        tokio::select! {
            _ = timer.tick() => {
                if let Err(e) = tracker.tick(Utc::now()).await {
                    error!("tracker tick failed: {e:#}");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
        }
    }

    Ok(())
}
