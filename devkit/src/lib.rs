/*!
# Warden DevKit - Stubs and Utilities for Development

Library easing console development and testing with:
- Scripted collaborator stubs (executor, scraper, notifier)
- A tracker harness wiring stubs to a throwaway on-disk state
- Assertion helpers for notification traffic
*/

pub mod harness;
pub mod stubs;

pub use harness::TrackerHarness;
pub use stubs::{RecordingNotifier, ScriptedExecutor, ScriptedScraper};
