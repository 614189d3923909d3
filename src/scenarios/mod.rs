//! End-to-end scenarios and their verification.
//!
//! Each scenario sets up its own namespace and network, exercises an instance,
//! records checks, and tears everything down again whether or not the checks
//! passed.

mod cirros;
mod fixture;
mod ubuntu;

pub use cirros::CirrosConsole;
pub use fixture::Fixture;
pub use ubuntu::UbuntuPings;

use crate::error::HarnessError;
use crate::harness::Harness;
use anyhow::Result;
use std::time::Duration;

/// Result of a verification check
#[derive(Debug, Clone)]
pub enum CheckResult {
    Pass(String),
    Fail { expected: String, actual: String },
}

impl CheckResult {
    pub fn pass(evidence: impl Into<String>) -> Self {
        CheckResult::Pass(evidence.into())
    }

    pub fn fail(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        CheckResult::Fail {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub fn passed(&self) -> bool {
        matches!(self, CheckResult::Pass(_))
    }

    /// Turn an assertion failure into a failed check; other errors still
    /// abort the scenario.
    pub fn from_assertion(
        expected: &str,
        outcome: crate::error::Result<String>,
    ) -> crate::error::Result<Self> {
        match outcome {
            Ok(evidence) => Ok(CheckResult::Pass(evidence)),
            Err(HarnessError::Assertion(actual)) => Ok(CheckResult::fail(expected, actual)),
            Err(e) => Err(e),
        }
    }
}

/// Result of running a scenario
#[derive(Debug)]
pub struct ScenarioResult {
    pub name: String,
    pub passed: bool,
    pub duration: Duration,
    pub checks: Vec<(String, CheckResult)>,
    pub fix_suggestion: Option<String>,
}

impl ScenarioResult {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            passed: true,
            duration: Duration::ZERO,
            checks: Vec::new(),
            fix_suggestion: None,
        }
    }

    pub fn add_check(&mut self, name: &str, result: CheckResult) {
        if !result.passed() {
            self.passed = false;
        }
        self.checks.push((name.to_string(), result));
    }

    pub fn fail(&mut self, suggestion: &str) {
        self.passed = false;
        self.fix_suggestion = Some(suggestion.to_string());
    }
}

/// A single end-to-end scenario
pub trait Scenario {
    /// Name used on the command line
    fn name(&self) -> &str;

    /// What a pass guarantees
    fn ensures(&self) -> &str;

    /// Run the scenario, including setup and teardown
    fn run(&self, harness: &Harness) -> Result<ScenarioResult>;
}

/// Get all scenarios in run order
pub fn all_scenarios() -> Vec<Box<dyn Scenario>> {
    vec![Box::new(UbuntuPings), Box::new(CirrosConsole)]
}

pub fn find_scenario(name: &str) -> Option<Box<dyn Scenario>> {
    all_scenarios().into_iter().find(|s| s.name() == name)
}

pub fn scenario_names() -> Vec<String> {
    all_scenarios().iter().map(|s| s.name().to_string()).collect()
}
