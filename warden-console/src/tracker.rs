//! Bioauth deadline tracker
//!
//! The core polling loop. Each tick walks every registered server:
//! discover a fresh dashboard URL and scrape it when the long-horizon
//! gate says so, convert the countdown into an absolute deadline, then
//! drive the staged notification machine (first warning → second warning
//! → repeating overdue alert) plus the retrieval failure-mode alerts.
//!
//! The whole tick is guarded by a non-blocking run lock: an overlapping
//! trigger becomes a no-op instead of racing on the state file. State is
//! loaded fresh at tick start and saved exactly once at tick end.

use crate::context::AppContext;
use crate::i18n::Catalog;
use crate::registry::Server;
use crate::scraper::ScrapeReading;
use crate::state::{NotificationSettings, ServerTrackingState};
use crate::tunnel;
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Completed { full_checks: usize, notifications: usize },
    /// A previous tick was still running; nothing was loaded or saved.
    SkippedLocked,
}

/// What the front-end shows for "deadline state of server X".
#[derive(Debug, Clone, serde::Serialize)]
pub struct DeadlineReport {
    pub server_id: String,
    pub server_name: String,
    pub bioauth_deadline_utc: Option<DateTime<Utc>>,
    pub minutes_left: Option<i64>,
    pub is_overdue: bool,
    pub is_in_failure_alert_mode: bool,
    pub last_full_check_utc: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureNote {
    Entered,
    Repeated,
    Recovered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeadlineNote {
    FirstWarning { minutes_left: i64 },
    SecondWarning { minutes_left: i64 },
    Overdue,
    OverdueRepeat,
}

pub struct BioauthTracker {
    ctx: AppContext,
    run_lock: Arc<Mutex<()>>,
}

impl BioauthTracker {
    pub fn new(ctx: AppContext) -> Self {
        Self { ctx, run_lock: Arc::new(Mutex::new(())) }
    }

    /// One pass over all registered servers.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickOutcome> {
        // Guard drop releases the lock on every exit path.
        let Ok(_guard) = self.run_lock.try_lock() else {
            debug!("previous tick still running, skipping this trigger");
            return Ok(TickOutcome::SkippedLocked);
        };

        let servers = self.ctx.registry.list().await;
        let ids = self.ctx.registry.ids().await;
        let mut doc = self.ctx.store.load(&ids).await?;
        let operator = self.ctx.config.operator.user_id.to_string();
        let catalog = Catalog::load(&doc.language_of(&operator));

        let horizon_hours = self.ctx.config.tracker.full_check_hours;
        let mut full_checks = 0;
        let mut notifications = 0;

        for server in &servers {
            let settings = doc.notification_settings.clone();
            let state = doc.state_mut(&server.id);

            if full_check_due(state, now, horizon_hours) {
                full_checks += 1;
                let succeeded = self.full_check(server, now, state).await;
                if let Some(note) = failure_transition(state, now, &settings, succeeded) {
                    notifications += 1;
                    self.send_failure_note(server, &catalog, note).await;
                }
            }

            // Counting down against a known deadline is cheap; it runs on
            // every tick so warnings fire promptly between full checks.
            if let Some(note) = deadline_transition(state, now, &settings) {
                notifications += 1;
                self.send_deadline_note(server, &catalog, note).await;
            }
        }

        if let Err(e) = self.ctx.store.save(&doc).await {
            // This run's in-memory changes are lost on process exit, but
            // a disk error must not kill the tick loop.
            error!("failed to persist tracker state: {e:#}");
        }

        debug!(full_checks, notifications, "tick completed");
        Ok(TickOutcome::Completed { full_checks, notifications })
    }

    /// The expensive path: URL discovery plus dashboard scrape. Any
    /// collaborator failure is this server's failed-check outcome, never
    /// an error that aborts the tick.
    async fn full_check(
        &self,
        server: &Server,
        now: DateTime<Utc>,
        state: &mut ServerTrackingState,
    ) -> bool {
        let url = match tunnel::discover(
            self.ctx.executor.as_ref(),
            server,
            &self.ctx.config.tunnel,
        )
        .await
        {
            Ok(Some(url)) => url,
            Ok(None) => {
                info!(server = %server.id, "no access url in tunnel logs");
                return false;
            }
            Err(e) => {
                warn!(server = %server.id, "url discovery failed: {e:#}");
                return false;
            }
        };

        let reading = self.ctx.scraper.fetch(&url).await;
        apply_reading(state, now, reading)
    }

    /// Deadline state of one server, for the chat front-end.
    pub async fn deadline_report(&self, server_id: &str) -> Result<Option<DeadlineReport>> {
        let Some(server) = self.ctx.registry.get(server_id).await else {
            return Ok(None);
        };
        let ids = self.ctx.registry.ids().await;
        let doc = self.ctx.store.load(&ids).await?;
        let state = doc.servers.get(server_id).cloned().unwrap_or_default();

        let now = Utc::now();
        let minutes_left = state.bioauth_deadline_utc.map(|d| (d - now).num_minutes());

        Ok(Some(DeadlineReport {
            server_id: server.id,
            server_name: server.name,
            bioauth_deadline_utc: state.bioauth_deadline_utc,
            minutes_left,
            is_overdue: minutes_left.is_some_and(|m| m < 0),
            is_in_failure_alert_mode: state.is_in_failure_alert_mode,
            last_full_check_utc: state.last_full_check_utc,
        }))
    }

    async fn send_failure_note(&self, server: &Server, catalog: &Catalog, note: FailureNote) {
        let key = match note {
            FailureNote::Entered => "scrape_failure",
            FailureNote::Repeated => "scrape_failure_repeat",
            FailureNote::Recovered => "scrape_restored",
        };
        let text = catalog.format(key, &[("server", server.name.clone())]);
        self.ctx.notifier.send(&text, true).await;
    }

    async fn send_deadline_note(&self, server: &Server, catalog: &Catalog, note: DeadlineNote) {
        let (key, minutes) = match note {
            DeadlineNote::FirstWarning { minutes_left } => ("bioauth_first_warning", minutes_left),
            DeadlineNote::SecondWarning { minutes_left } => ("bioauth_second_warning", minutes_left),
            DeadlineNote::Overdue => ("bioauth_overdue", 0),
            DeadlineNote::OverdueRepeat => ("bioauth_overdue_repeat", 0),
        };
        let text = catalog.format(
            key,
            &[
                ("server", server.name.clone()),
                ("minutes", minutes.to_string()),
            ],
        );
        self.ctx.notifier.send(&text, true).await;
    }
}

/// The long-horizon gate: a full check runs when none succeeded yet or
/// the last one is older than the refresh horizon. A failed check leaves
/// `last_full_check_utc` untouched, so failing servers are retried at
/// tick cadence instead of waiting out the horizon.
fn full_check_due(state: &ServerTrackingState, now: DateTime<Utc>, horizon_hours: i64) -> bool {
    match state.last_full_check_utc {
        None => true,
        Some(last) => now - last > Duration::hours(horizon_hours),
    }
}

/// Fold a scrape reading into the tracking state. Returns whether the
/// check counts as successful.
fn apply_reading(
    state: &mut ServerTrackingState,
    now: DateTime<Utc>,
    reading: ScrapeReading,
) -> bool {
    if reading.has_deadline() {
        state.bioauth_deadline_utc = Some(now + Duration::seconds(reading.bioauth_seconds));
        state.last_full_check_utc = Some(now);
        // A fresh deadline invalidates every prior notification edge.
        state.notified_first = false;
        state.notified_second = false;
        state.is_in_alert_mode = false;
        true
    } else if reading.is_no_deadline() {
        state.bioauth_deadline_utc = None;
        state.last_full_check_utc = Some(now);
        true
    } else {
        false
    }
}

/// Retrieval failure-mode machine: one notice on entry, throttled
/// repeats at twice the alert interval, one notice on recovery.
fn failure_transition(
    state: &mut ServerTrackingState,
    now: DateTime<Utc>,
    settings: &NotificationSettings,
    check_succeeded: bool,
) -> Option<FailureNote> {
    if check_succeeded {
        if state.is_in_failure_alert_mode {
            state.is_in_failure_alert_mode = false;
            state.last_failure_alert_utc = None;
            return Some(FailureNote::Recovered);
        }
        return None;
    }

    if !state.is_in_failure_alert_mode {
        state.is_in_failure_alert_mode = true;
        state.last_failure_alert_utc = Some(now);
        return Some(FailureNote::Entered);
    }

    let throttle = Duration::minutes(2 * settings.alert_interval_minutes);
    if state
        .last_failure_alert_utc
        .map_or(true, |last| now - last > throttle)
    {
        state.last_failure_alert_utc = Some(now);
        return Some(FailureNote::Repeated);
    }
    None
}

/// Staged deadline machine. The second-stage window is checked before
/// the first-stage one so a tick landing inside both fires only the more
/// urgent warning.
fn deadline_transition(
    state: &mut ServerTrackingState,
    now: DateTime<Utc>,
    settings: &NotificationSettings,
) -> Option<DeadlineNote> {
    let deadline = state.bioauth_deadline_utc?;
    let time_left = deadline - now;

    if time_left < Duration::zero() {
        if !state.is_in_alert_mode {
            state.is_in_alert_mode = true;
            state.last_alert_utc = Some(now);
            return Some(DeadlineNote::Overdue);
        }
        let interval = Duration::minutes(settings.alert_interval_minutes);
        if state
            .last_alert_utc
            .map_or(true, |last| now - last > interval)
        {
            state.last_alert_utc = Some(now);
            return Some(DeadlineNote::OverdueRepeat);
        }
        return None;
    }

    if time_left < Duration::minutes(settings.second_warning_minutes) && !state.notified_second {
        state.notified_second = true;
        return Some(DeadlineNote::SecondWarning {
            minutes_left: time_left.num_minutes(),
        });
    }

    if time_left < Duration::minutes(settings.first_warning_minutes) && !state.notified_first {
        state.notified_first = true;
        return Some(DeadlineNote::FirstWarning {
            minutes_left: time_left.num_minutes(),
        });
    }

    None
}
