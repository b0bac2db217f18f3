//! Tracker test harness
//!
//! Wires a real tracker to scripted collaborators and a throwaway state
//! file, so scenario tests can walk multi-tick timelines with no real
//! server or browser anywhere near them.

use crate::stubs::{RecordingNotifier, ScriptedExecutor, ScriptedScraper};
use anyhow::Result;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;
use tempfile::TempDir;
use warden_console::config::ConsoleConfig;
use warden_console::registry::{Connection, Server, ServerRegistry};
use warden_console::state::{NotificationSettings, ServerTrackingState, StateStore};
use warden_console::tracker::TickOutcome;
use warden_console::{AppContext, BioauthTracker};

pub struct TrackerHarness {
    pub ctx: AppContext,
    pub tracker: BioauthTracker,
    pub executor: Arc<ScriptedExecutor>,
    pub scraper: Arc<ScriptedScraper>,
    pub notifier: Arc<RecordingNotifier>,
    _dir: TempDir,
}

/// A fixed, readable timeline for scenarios: minute offsets from a
/// common origin.
pub fn minute(offset: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap() + Duration::minutes(offset)
}

impl TrackerHarness {
    /// Harness with one local server per name; server ids equal names.
    pub async fn with_servers(names: &[&str]) -> Result<Self> {
        let dir = tempfile::tempdir()?;

        let mut config = ConsoleConfig::default();
        config.operator.user_id = 1;
        config.operator.chat_id = 1;
        config.paths.servers_file = dir.path().join("servers.json");
        config.paths.state_file = dir.path().join("state.json");
        config.tunnel.restart_settle_secs = 0;

        let registry = ServerRegistry::new(&config.paths.servers_file);
        for name in names {
            let mut server = Server::new(name, Connection::local());
            server.id = name.to_string();
            registry.register(server).await?;
        }

        let store = StateStore::new(&config.paths.state_file);
        let executor = Arc::new(ScriptedExecutor::new());
        let scraper = Arc::new(ScriptedScraper::new());
        let notifier = Arc::new(RecordingNotifier::new());

        let ctx = AppContext::new(
            config,
            registry,
            store,
            executor.clone(),
            scraper.clone(),
            notifier.clone(),
        );
        let tracker = BioauthTracker::new(ctx.clone());

        Ok(Self { ctx, tracker, executor, scraper, notifier, _dir: dir })
    }

    /// Script a healthy tunnel whose journal carries one access URL.
    pub fn script_dashboard_token(&self, token: &str) {
        self.executor.respond("systemctl is-active", 0, "active");
        self.executor.respond(
            "journalctl",
            0,
            &format!("2024-03-01T11:00:00Z tunnel[4242]: session open url={token}\n"),
        );
    }

    /// Script a healthy tunnel that has issued no URL yet.
    pub fn script_no_url(&self) {
        self.executor.respond("systemctl is-active", 0, "active");
        self.executor.respond("journalctl", 0, "2024-03-01T11:00:00Z tunnel[4242]: waiting\n");
    }

    pub async fn tick_at(&self, now: DateTime<Utc>) -> Result<TickOutcome> {
        self.tracker.tick(now).await
    }

    /// Current persisted tracking state of a server.
    pub async fn state_of(&self, server_id: &str) -> Result<ServerTrackingState> {
        let ids = self.ctx.registry.ids().await;
        let doc = self.ctx.store.load(&ids).await?;
        Ok(doc.servers.get(server_id).cloned().unwrap_or_default())
    }

    /// Edit a server's persisted tracking state in place.
    pub async fn seed_state(
        &self,
        server_id: &str,
        edit: impl FnOnce(&mut ServerTrackingState),
    ) -> Result<()> {
        let ids = self.ctx.registry.ids().await;
        let mut doc = self.ctx.store.load(&ids).await?;
        edit(doc.state_mut(server_id));
        self.ctx.store.save(&doc).await?;
        Ok(())
    }

    pub async fn set_settings(&self, settings: NotificationSettings) -> Result<()> {
        let ids = self.ctx.registry.ids().await;
        self.ctx
            .store
            .update_notification_settings(&ids, settings)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(first: i64, second: i64, interval: i64) -> NotificationSettings {
        NotificationSettings {
            first_warning_minutes: first,
            second_warning_minutes: second,
            alert_interval_minutes: interval,
        }
    }

    #[tokio::test]
    async fn test_fresh_server_establishes_deadline_silently() {
        let h = TrackerHarness::with_servers(&["alpha"]).await.unwrap();
        h.script_dashboard_token("tok-1");
        h.scraper.push_reading(3600, 180);

        let t0 = minute(0);
        let outcome = h.tick_at(t0).await.unwrap();
        assert_eq!(outcome, TickOutcome::Completed { full_checks: 1, notifications: 0 });

        let state = h.state_of("alpha").await.unwrap();
        assert_eq!(state.bioauth_deadline_utc, Some(t0 + Duration::seconds(3600)));
        assert_eq!(state.last_full_check_utc, Some(t0));
        assert!(!state.is_in_failure_alert_mode);
        assert_eq!(h.notifier.count(), 0);

        // The discovered token reached the scraper percent-encoded into
        // the dashboard URL template.
        let urls = h.scraper.fetched_urls();
        assert_eq!(urls.len(), 1);
        assert!(urls[0].contains("tok-1"));
    }

    #[tokio::test]
    async fn test_no_deadline_reading_is_success_not_failure() {
        let h = TrackerHarness::with_servers(&["alpha"]).await.unwrap();
        h.script_dashboard_token("tok");
        h.scraper.push_reading(-1, 30);

        h.tick_at(minute(0)).await.unwrap();

        let state = h.state_of("alpha").await.unwrap();
        assert_eq!(state.bioauth_deadline_utc, None);
        assert_eq!(state.last_full_check_utc, Some(minute(0)));
        assert!(!state.is_in_failure_alert_mode);
        assert_eq!(h.notifier.count(), 0, "no failure alert for a clean no-deadline read");
    }

    #[tokio::test]
    async fn test_recovery_notice_after_failure_mode() {
        let h = TrackerHarness::with_servers(&["alpha"]).await.unwrap();
        h.script_dashboard_token("tok");
        h.scraper.push_reading(-1, 30);
        h.seed_state("alpha", |s| {
            s.is_in_failure_alert_mode = true;
            s.last_failure_alert_utc = Some(minute(-20));
        })
        .await
        .unwrap();

        h.tick_at(minute(0)).await.unwrap();

        let state = h.state_of("alpha").await.unwrap();
        assert!(!state.is_in_failure_alert_mode);
        assert_eq!(h.notifier.count(), 1);
        assert_eq!(h.notifier.count_containing("restored"), 1);
    }

    #[tokio::test]
    async fn test_failure_alerts_entering_then_throttled_repeat() {
        let h = TrackerHarness::with_servers(&["alpha"]).await.unwrap();
        h.script_no_url();
        h.set_settings(settings(60, 10, 5)).await.unwrap();

        // Three consecutive failing ticks inside the 10-minute throttle
        // window: exactly one "entering failure" alert.
        h.tick_at(minute(0)).await.unwrap();
        h.tick_at(minute(5)).await.unwrap();
        h.tick_at(minute(10)).await.unwrap();

        assert_eq!(h.notifier.count(), 1);
        assert_eq!(h.notifier.count_containing("cannot retrieve"), 1);

        // Past 2x the alert interval, one repeat fires.
        h.tick_at(minute(11)).await.unwrap();
        assert_eq!(h.notifier.count(), 2);
        assert_eq!(h.notifier.count_containing("still unavailable"), 1);

        let state = h.state_of("alpha").await.unwrap();
        assert!(state.is_in_failure_alert_mode);
        assert_eq!(state.last_full_check_utc, None, "failed checks never advance the gate");
    }

    #[tokio::test]
    async fn test_unreadable_dashboard_enters_failure_mode() {
        let h = TrackerHarness::with_servers(&["alpha"]).await.unwrap();
        h.script_dashboard_token("tok");
        h.scraper.push_reading(-1, -1);
        h.seed_state("alpha", |s| {
            s.bioauth_deadline_utc = Some(minute(500));
        })
        .await
        .unwrap();

        h.tick_at(minute(0)).await.unwrap();

        let state = h.state_of("alpha").await.unwrap();
        assert!(state.is_in_failure_alert_mode);
        // A failed scrape leaves the known deadline untouched.
        assert_eq!(state.bioauth_deadline_utc, Some(minute(500)));
        assert_eq!(state.last_full_check_utc, None);
        assert_eq!(h.notifier.count_containing("cannot retrieve"), 1);
    }

    #[tokio::test]
    async fn test_warning_stages_fire_in_urgency_order() {
        let h = TrackerHarness::with_servers(&["alpha"]).await.unwrap();
        h.script_dashboard_token("tok");
        h.set_settings(settings(30, 10, 5)).await.unwrap();
        // Deadline 45 minutes out.
        h.scraper.push_reading(45 * 60, 120);

        h.tick_at(minute(0)).await.unwrap();
        assert_eq!(h.notifier.count(), 0);

        // 20 minutes left: first-stage window.
        h.tick_at(minute(25)).await.unwrap();
        assert_eq!(h.notifier.count_containing("expires in"), 1);

        // 16 minutes left: nothing new.
        h.tick_at(minute(29)).await.unwrap();
        assert_eq!(h.notifier.count(), 1);

        // 7 minutes left: second-stage fires once.
        h.tick_at(minute(38)).await.unwrap();
        assert_eq!(h.notifier.count(), 2);
        assert_eq!(h.notifier.count_containing("re-authenticate now"), 1);

        h.tick_at(minute(39)).await.unwrap();
        assert_eq!(h.notifier.count(), 2);
    }

    #[tokio::test]
    async fn test_overdue_alerts_throttled_by_interval() {
        let h = TrackerHarness::with_servers(&["alpha"]).await.unwrap();
        h.set_settings(settings(60, 10, 5)).await.unwrap();
        h.seed_state("alpha", |s| {
            // Known deadline in the past, gate recently satisfied so the
            // ticks below stay on the cheap path.
            s.bioauth_deadline_utc = Some(minute(-1));
            s.last_full_check_utc = Some(minute(-1));
        })
        .await
        .unwrap();

        // Entering overdue mode fires immediately.
        h.tick_at(minute(0)).await.unwrap();
        assert_eq!(h.notifier.count(), 1);

        // Two ticks 3 minutes apart: still one alert in total.
        h.tick_at(minute(3)).await.unwrap();
        assert_eq!(h.notifier.count(), 1);

        // 6 minutes after the last alert: repeat.
        h.tick_at(minute(6)).await.unwrap();
        assert_eq!(h.notifier.count(), 2);

        let state = h.state_of("alpha").await.unwrap();
        assert!(state.is_in_alert_mode);
        assert_eq!(state.last_alert_utc, Some(minute(6)));
        // No scrape ever ran: the stored deadline is enough.
        assert_eq!(h.scraper.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_new_deadline_resets_notification_edges() {
        let h = TrackerHarness::with_servers(&["alpha"]).await.unwrap();
        h.script_dashboard_token("tok");
        h.scraper.push_reading(7200, 100);
        h.seed_state("alpha", |s| {
            s.bioauth_deadline_utc = Some(minute(-30));
            s.notified_first = true;
            s.notified_second = true;
            s.is_in_alert_mode = true;
        })
        .await
        .unwrap();

        h.tick_at(minute(0)).await.unwrap();

        let state = h.state_of("alpha").await.unwrap();
        assert_eq!(state.bioauth_deadline_utc, Some(minute(0) + Duration::seconds(7200)));
        assert!(!state.notified_first);
        assert!(!state.notified_second);
        assert!(!state.is_in_alert_mode);
    }

    #[tokio::test]
    async fn test_overlapping_tick_is_a_no_op() {
        let h = TrackerHarness::with_servers(&["alpha"]).await.unwrap();
        h.script_no_url();
        h.executor.set_delay(std::time::Duration::from_millis(100));

        let (first, second) = tokio::join!(h.tick_at(minute(0)), h.tick_at(minute(0)));
        let outcomes = [first.unwrap(), second.unwrap()];

        assert!(outcomes.contains(&TickOutcome::SkippedLocked));
        assert!(outcomes
            .iter()
            .any(|o| matches!(o, TickOutcome::Completed { .. })));

        // The skipped tick touched nothing: one discovery pass only.
        assert_eq!(h.executor.calls_matching("journalctl"), 1);
    }

    #[tokio::test]
    async fn test_one_failing_server_does_not_block_the_rest() {
        let h = TrackerHarness::with_servers(&["alpha", "beta"]).await.unwrap();
        h.script_dashboard_token("tok");
        h.executor.fail_for_server("alpha");
        h.scraper.push_reading(3600, 60);

        let outcome = h.tick_at(minute(0)).await.unwrap();
        assert!(matches!(outcome, TickOutcome::Completed { full_checks: 2, .. }));

        // alpha's unreachable transport became its failed-check outcome...
        let alpha = h.state_of("alpha").await.unwrap();
        assert!(alpha.is_in_failure_alert_mode);
        assert_eq!(alpha.bioauth_deadline_utc, None);

        // ...while beta's full check completed normally.
        let beta = h.state_of("beta").await.unwrap();
        assert_eq!(beta.bioauth_deadline_utc, Some(minute(0) + Duration::seconds(3600)));
        assert!(!beta.is_in_failure_alert_mode);

        assert_eq!(h.notifier.count_containing("cannot retrieve"), 1);
    }

    #[tokio::test]
    async fn test_deadline_report_for_front_end() {
        let h = TrackerHarness::with_servers(&["alpha"]).await.unwrap();
        h.script_dashboard_token("tok");
        h.scraper.push_reading(3600, 60);
        h.tick_at(minute(0)).await.unwrap();

        let report = h.tracker.deadline_report("alpha").await.unwrap().unwrap();
        assert_eq!(report.server_id, "alpha");
        assert_eq!(report.server_name, "alpha");
        assert_eq!(report.bioauth_deadline_utc, Some(minute(0) + Duration::seconds(3600)));
        assert_eq!(report.last_full_check_utc, Some(minute(0)));
        assert!(!report.is_in_failure_alert_mode);

        assert!(h.tracker.deadline_report("unknown").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_deregistered_server_state_is_pruned_on_next_tick() {
        let h = TrackerHarness::with_servers(&["alpha", "beta"]).await.unwrap();
        h.seed_state("beta", |s| s.notified_first = true).await.unwrap();

        h.ctx.registry.remove("beta").await.unwrap();
        h.script_no_url();
        h.tick_at(minute(0)).await.unwrap();

        let ids = h.ctx.registry.ids().await;
        let doc = h.ctx.store.load(&ids).await.unwrap();
        assert!(!doc.servers.contains_key("beta"));
        assert!(doc.servers.contains_key("alpha"));
    }
}
