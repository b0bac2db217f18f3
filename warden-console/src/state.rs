//! Durable tracker state
//!
//! One JSON document holds everything the tracker must remember across
//! restarts: per-server deadline tracking state, the global notification
//! settings and per-user preferences. The document is read fresh at every
//! tick and written back once, so the file never sees partial updates
//! while the run lock is held.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state file i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("state file parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Deadline tracking state for one registered server.
///
/// `bioauth_deadline_utc` absent means "no future bio-authentication
/// required". The notified flags are edge-triggered and only meaningful
/// while a future deadline is set; establishing a new deadline clears them
/// together with the overdue alert mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerTrackingState {
    pub last_full_check_utc: Option<DateTime<Utc>>,
    pub bioauth_deadline_utc: Option<DateTime<Utc>>,
    pub notified_first: bool,
    pub notified_second: bool,
    pub is_in_alert_mode: bool,
    pub last_alert_utc: Option<DateTime<Utc>>,
    pub is_in_failure_alert_mode: bool,
    pub last_failure_alert_utc: Option<DateTime<Utc>>,
}

impl Default for ServerTrackingState {
    fn default() -> Self {
        Self {
            last_full_check_utc: None,
            bioauth_deadline_utc: None,
            notified_first: false,
            notified_second: false,
            is_in_alert_mode: false,
            last_alert_utc: None,
            is_in_failure_alert_mode: false,
            last_failure_alert_utc: None,
        }
    }
}

/// Global notification thresholds, mutated only through
/// [`StateStore::update_notification_settings`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationSettings {
    pub first_warning_minutes: i64,
    pub second_warning_minutes: i64,
    pub alert_interval_minutes: i64,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            first_warning_minutes: 60,
            second_warning_minutes: 10,
            alert_interval_minutes: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSettings {
    pub language: String,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self { language: "en".to_string() }
    }
}

/// The persisted document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackerDocument {
    #[serde(default)]
    pub user_settings: BTreeMap<String, UserSettings>,
    #[serde(default)]
    pub notification_settings: NotificationSettings,
    #[serde(default)]
    pub servers: BTreeMap<String, ServerTrackingState>,
}

impl TrackerDocument {
    /// Tracking state for a server, created lazily with defaults.
    pub fn state_mut(&mut self, server_id: &str) -> &mut ServerTrackingState {
        self.servers.entry(server_id.to_string()).or_default()
    }

    pub fn language_of(&self, user_id: &str) -> String {
        self.user_settings
            .get(user_id)
            .map(|s| s.language.clone())
            .unwrap_or_else(|| "en".to_string())
    }
}

pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load the document, applying defaults when the file does not exist
    /// yet and pruning tracking states whose server id is no longer
    /// registered.
    pub async fn load(&self, registered_ids: &[String]) -> Result<TrackerDocument, StoreError> {
        let mut doc = if self.path.exists() {
            let content = tokio::fs::read_to_string(&self.path).await?;
            if content.trim().is_empty() {
                TrackerDocument::default()
            } else {
                serde_json::from_str(&content)?
            }
        } else {
            TrackerDocument::default()
        };

        let before = doc.servers.len();
        doc.servers.retain(|id, _| registered_ids.iter().any(|r| r == id));
        let pruned = before - doc.servers.len();
        if pruned > 0 {
            info!("pruned {} tracking states for deregistered servers", pruned);
        }

        Ok(doc)
    }

    /// Write the document back in one shot.
    pub async fn save(&self, doc: &TrackerDocument) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(doc)?;
        tokio::fs::write(&self.path, content).await?;
        Ok(())
    }

    /// Explicit settings-update operation surfaced to the front-end.
    pub async fn update_notification_settings(
        &self,
        registered_ids: &[String],
        settings: NotificationSettings,
    ) -> Result<(), StoreError> {
        let mut doc = self.load(registered_ids).await?;
        doc.notification_settings = settings;
        self.save(&doc).await
    }

    /// Store the preferred language for a front-end user.
    pub async fn set_language(
        &self,
        registered_ids: &[String],
        user_id: &str,
        language: &str,
    ) -> Result<(), StoreError> {
        let mut doc = self.load(registered_ids).await?;
        doc.user_settings
            .entry(user_id.to_string())
            .or_default()
            .language = language.to_string();
        self.save(&doc).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_first_load_applies_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));

        let doc = store.load(&ids(&["alpha"])).await.unwrap();
        assert_eq!(doc.notification_settings, NotificationSettings::default());
        assert!(doc.servers.is_empty());
        assert!(doc.user_settings.is_empty());
    }

    #[tokio::test]
    async fn test_roundtrip_preserves_tracking_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));

        let mut doc = store.load(&ids(&["alpha"])).await.unwrap();
        let st = doc.state_mut("alpha");
        st.bioauth_deadline_utc = Some(Utc::now());
        st.notified_first = true;
        store.save(&doc).await.unwrap();

        let reloaded = store.load(&ids(&["alpha"])).await.unwrap();
        assert_eq!(doc.servers["alpha"], reloaded.servers["alpha"]);
    }

    #[tokio::test]
    async fn test_prunes_deregistered_servers_without_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));

        let mut doc = TrackerDocument::default();
        doc.state_mut("alpha").notified_first = true;
        doc.state_mut("gone").is_in_alert_mode = true;
        store.save(&doc).await.unwrap();

        let reloaded = store.load(&ids(&["alpha"])).await.unwrap();
        assert!(reloaded.servers.contains_key("alpha"));
        assert!(!reloaded.servers.contains_key("gone"));
    }

    #[tokio::test]
    async fn test_update_notification_settings() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));

        store
            .update_notification_settings(
                &ids(&[]),
                NotificationSettings {
                    first_warning_minutes: 30,
                    second_warning_minutes: 5,
                    alert_interval_minutes: 2,
                },
            )
            .await
            .unwrap();

        let doc = store.load(&ids(&[])).await.unwrap();
        assert_eq!(doc.notification_settings.first_warning_minutes, 30);
        assert_eq!(doc.notification_settings.alert_interval_minutes, 2);
    }

    #[tokio::test]
    async fn test_language_defaults_to_english() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));

        store.set_language(&ids(&[]), "42", "uk").await.unwrap();
        let doc = store.load(&ids(&[])).await.unwrap();
        assert_eq!(doc.language_of("42"), "uk");
        assert_eq!(doc.language_of("other"), "en");
    }
}
