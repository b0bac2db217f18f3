//! Warden Console - Operations console for server-hosted validator nodes
//!
//! The console gives a single authorized operator remote control over a
//! small fleet of validator servers:
//! - Bioauth deadline tracking with staged proactive warnings
//! - Node process management (start/stop/restart, logs, status)
//! - Database backup and restore
//! - Node binary updates from the release feed
//!
//! The chat front-end and the headless dashboard session live behind the
//! `Notifier` and `DashboardScraper` collaborator traits; everything that
//! touches a server goes through `RemoteExecutor`.

pub mod backup;
pub mod config;
pub mod context;
pub mod executor;
pub mod i18n;
pub mod nodeops;
pub mod notify;
pub mod registry;
pub mod scraper;
pub mod state;
pub mod tracker;
pub mod tunnel;
pub mod updater;

pub use config::ConsoleConfig;
pub use context::AppContext;
pub use tracker::{BioauthTracker, TickOutcome};
