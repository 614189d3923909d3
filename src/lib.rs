//! CI harness for a compute-orchestration API.
//!
//! This library provides the shared infrastructure for end-to-end scenarios:
//! - An API client and the event poller built on it
//! - Scripted console sessions over telnet
//! - Host-side reachability checks behind the `Executor` trait
//! - Scenarios that set up, verify and tear down their own resources

pub mod api;
pub mod clock;
pub mod config;
pub mod console;
pub mod error;
pub mod events;
pub mod executor;
pub mod harness;
pub mod preflight;
pub mod scenarios;

// Re-export commonly used items
pub use api::{ApiClient, CloudApi};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::HarnessConfig;
pub use console::{ConsoleSession, SessionState, TelnetTransport, Transport};
pub use error::{HarnessError, Result};
pub use events::{Event, EventPoller, EventSource};
pub use executor::{ExecResult, Executor, ShellExecutor};
pub use harness::Harness;
pub use preflight::{require_preflight, run_preflight, PreflightCheck, PreflightResult};
pub use scenarios::{all_scenarios, find_scenario, CheckResult, Scenario, ScenarioResult};
