//! Managed server registry
//!
//! Keeps the operator's set of validator servers:
//! - Registration / removal with JSON file persistence
//! - Connection descriptors for local and SSH-reachable servers
//! - Ordered listing consumed by the tracker and node operations

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub id: String,
    pub name: String,
    pub connection: Connection,
    pub registered_at: DateTime<Utc>,
}

/// How to reach a server. `local: true` runs commands on this host and
/// ignores the remaining fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub local: bool,
    pub host: Option<String>,
    pub user: Option<String>,
    pub port: Option<u16>,
    pub key_path: Option<PathBuf>,
}

impl Connection {
    pub fn local() -> Self {
        Self { local: true, host: None, user: None, port: None, key_path: None }
    }

    pub fn ssh(host: &str, user: &str) -> Self {
        Self {
            local: false,
            host: Some(host.to_string()),
            user: Some(user.to_string()),
            port: None,
            key_path: None,
        }
    }
}

impl Server {
    /// New server with a generated id.
    pub fn new(name: &str, connection: Connection) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            connection,
            registered_at: Utc::now(),
        }
    }
}

pub type ServersMap = BTreeMap<String, Server>;

pub struct ServerRegistry {
    servers: Arc<RwLock<ServersMap>>,
    data_file: PathBuf,
}

impl ServerRegistry {
    pub fn new(data_file: impl Into<PathBuf>) -> Self {
        Self {
            servers: Arc::new(RwLock::new(BTreeMap::new())),
            data_file: data_file.into(),
        }
    }

    /// Load registered servers from the JSON data file.
    pub async fn load(&self) -> Result<()> {
        if !self.data_file.exists() {
            info!("no existing servers file, starting fresh");
            return Ok(());
        }

        let content = tokio::fs::read_to_string(&self.data_file).await?;
        let servers: ServersMap = serde_json::from_str(&content)?;

        let mut map = self.servers.write().await;
        let count = servers.len();
        *map = servers;

        info!("loaded {} servers from {}", count, self.data_file.display());
        Ok(())
    }

    /// Persist the registry to the JSON data file.
    pub async fn save(&self) -> Result<()> {
        let map = self.servers.read().await;
        let content = serde_json::to_string_pretty(&*map)?;
        if let Some(parent) = self.data_file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.data_file, content).await?;
        Ok(())
    }

    /// Register a server and persist immediately.
    pub async fn register(&self, server: Server) -> Result<()> {
        let id = server.id.clone();
        let name = server.name.clone();
        {
            let mut map = self.servers.write().await;
            map.insert(id.clone(), server);
        }
        self.save().await?;
        info!("registered server {} ({})", id, name);
        Ok(())
    }

    /// Remove a server. Tracking state for it is pruned on the next
    /// state load. Returns false when the id was unknown.
    pub async fn remove(&self, id: &str) -> Result<bool> {
        let removed = {
            let mut map = self.servers.write().await;
            map.remove(id).is_some()
        };
        if removed {
            self.save().await?;
            info!("removed server {}", id);
        }
        Ok(removed)
    }

    /// All servers in id order.
    pub async fn list(&self) -> Vec<Server> {
        self.servers.read().await.values().cloned().collect()
    }

    pub async fn ids(&self) -> Vec<String> {
        self.servers.read().await.keys().cloned().collect()
    }

    pub async fn get(&self, id: &str) -> Option<Server> {
        self.servers.read().await.get(id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_and_list_in_id_order() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ServerRegistry::new(dir.path().join("servers.json"));

        let mut a = Server::new("validator-a", Connection::local());
        a.id = "bbb".into();
        let mut b = Server::new("validator-b", Connection::ssh("10.0.0.2", "node"));
        b.id = "aaa".into();

        registry.register(a).await.unwrap();
        registry.register(b).await.unwrap();

        let listed = registry.list().await;
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, "aaa");
        assert_eq!(listed[1].id, "bbb");
    }

    #[tokio::test]
    async fn test_persistence_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("servers.json");

        let registry = ServerRegistry::new(&path);
        registry
            .register(Server::new("validator-a", Connection::local()))
            .await
            .unwrap();

        let reloaded = ServerRegistry::new(&path);
        reloaded.load().await.unwrap();
        let listed = reloaded.list().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "validator-a");
        assert!(listed[0].connection.local);
    }

    #[tokio::test]
    async fn test_remove_unknown_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ServerRegistry::new(dir.path().join("servers.json"));
        assert!(!registry.remove("missing").await.unwrap());
    }
}
