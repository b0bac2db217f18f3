//! Scripted collaborator stubs
//!
//! Drop-in implementations of the console's collaborator traits for tests
//! and local development: command responses are scripted by substring,
//! scrape readings come from a queue, notifications are recorded instead
//! of delivered.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use warden_console::executor::{CommandOutput, RemoteExecutor};
use warden_console::notify::Notifier;
use warden_console::registry::Server;
use warden_console::scraper::{DashboardScraper, ScrapeReading};

/// Executor answering from scripted rules. The first rule whose needle is
/// a substring of the command wins; unscripted commands succeed with
/// empty output.
#[derive(Default)]
pub struct ScriptedExecutor {
    rules: Mutex<Vec<(String, CommandOutput)>>,
    failures: Mutex<Vec<String>>,
    broken_servers: Mutex<Vec<String>>,
    calls: Mutex<Vec<(String, String)>>,
    delay: Mutex<Option<Duration>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a response for commands containing `needle`.
    pub fn respond(&self, needle: &str, exit_code: i32, stdout: &str) {
        self.rules.lock().push((
            needle.to_string(),
            CommandOutput {
                exit_code,
                stdout: stdout.to_string(),
                stderr: String::new(),
            },
        ));
    }

    /// Make commands containing `needle` fail at the transport level
    /// (an `Err`, not a non-zero exit).
    pub fn fail_matching(&self, needle: &str) {
        self.failures.lock().push(needle.to_string());
    }

    /// Make every command against one server fail at the transport
    /// level, as an unreachable host would.
    pub fn fail_for_server(&self, server_id: &str) {
        self.broken_servers.lock().push(server_id.to_string());
    }

    /// Delay every command, to let tests overlap two ticks.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().clone()
    }

    pub fn calls_matching(&self, needle: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|(_, cmd)| cmd.contains(needle))
            .count()
    }
}

#[async_trait]
impl RemoteExecutor for ScriptedExecutor {
    async fn run(&self, server: &Server, command: &str) -> anyhow::Result<CommandOutput> {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.calls
            .lock()
            .push((server.id.clone(), command.to_string()));

        if self
            .broken_servers
            .lock()
            .iter()
            .any(|id| id == &server.id)
        {
            anyhow::bail!("scripted transport failure for server {}", server.id);
        }

        if self
            .failures
            .lock()
            .iter()
            .any(|needle| command.contains(needle))
        {
            anyhow::bail!("scripted transport failure for: {command}");
        }

        let rules = self.rules.lock();
        let output = rules
            .iter()
            .find(|(needle, _)| command.contains(needle))
            .map(|(_, out)| out.clone())
            .unwrap_or(CommandOutput {
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
            });
        Ok(output)
    }
}

/// Scraper answering from a queue of readings. The last reading repeats
/// once the queue drains; an empty queue reports total failure.
#[derive(Default)]
pub struct ScriptedScraper {
    queue: Mutex<VecDeque<ScrapeReading>>,
    last: Mutex<Option<ScrapeReading>>,
    fetched: Mutex<Vec<String>>,
}

impl ScriptedScraper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_reading(&self, bioauth_seconds: i64, epoch_minutes: i64) {
        self.queue
            .lock()
            .push_back(ScrapeReading { bioauth_seconds, epoch_minutes });
    }

    pub fn fetch_count(&self) -> usize {
        self.fetched.lock().len()
    }

    pub fn fetched_urls(&self) -> Vec<String> {
        self.fetched.lock().clone()
    }
}

#[async_trait]
impl DashboardScraper for ScriptedScraper {
    async fn fetch(&self, url: &str) -> ScrapeReading {
        self.fetched.lock().push(url.to_string());
        match self.queue.lock().pop_front() {
            Some(reading) => {
                *self.last.lock() = Some(reading);
                reading
            }
            None => self.last.lock().unwrap_or_else(ScrapeReading::failed),
        }
    }
}

/// Notifier collecting messages instead of delivering them.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn count_containing(&self, fragment: &str) -> usize {
        self.sent
            .lock()
            .iter()
            .filter(|m| m.contains(fragment))
            .count()
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, text: &str, _markdown: bool) {
        self.sent.lock().push(text.to_string());
    }
}
