//! Application context
//!
//! One explicit bundle of shared components, constructed at startup and
//! passed by handle to everything that needs it. There is no ambient
//! global state anywhere in the console.

use crate::config::ConsoleConfig;
use crate::executor::RemoteExecutor;
use crate::notify::Notifier;
use crate::registry::ServerRegistry;
use crate::scraper::DashboardScraper;
use crate::state::StateStore;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ConsoleConfig>,
    pub registry: Arc<ServerRegistry>,
    pub store: Arc<StateStore>,
    pub executor: Arc<dyn RemoteExecutor>,
    pub scraper: Arc<dyn DashboardScraper>,
    pub notifier: Arc<dyn Notifier>,
}

impl AppContext {
    pub fn new(
        config: ConsoleConfig,
        registry: ServerRegistry,
        store: StateStore,
        executor: Arc<dyn RemoteExecutor>,
        scraper: Arc<dyn DashboardScraper>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            registry: Arc::new(registry),
            store: Arc::new(store),
            executor,
            scraper,
            notifier,
        }
    }
}
