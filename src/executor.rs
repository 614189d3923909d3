//! Executor trait for running commands on the test host.
//!
//! Reachability checks run on the hypervisor, inside the network's namespace
//! (`ip netns exec <network> ...`). The trait keeps that shell-out swappable
//! so checks can be tested without root or a real network.

use crate::error::{HarnessError, Result};
use std::process::Command;
use tracing::debug;

/// Result of running a host command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecResult {
    /// Exit code; `None` when killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

pub trait Executor {
    /// Run `command` through the shell.
    ///
    /// Exit codes outside `accepted` are an error, so pipelines where a
    /// non-zero status is meaningful (`grep -c` finding nothing) can still be
    /// read.
    fn exec(&self, command: &str, accepted: &[i32]) -> Result<ExecResult>;

    /// Run a command that is expected to exit 0 and return its stdout.
    fn exec_ok(&self, command: &str) -> Result<String> {
        Ok(self.exec(command, &[0])?.stdout)
    }
}

impl<E: Executor + ?Sized> Executor for Box<E> {
    fn exec(&self, command: &str, accepted: &[i32]) -> Result<ExecResult> {
        (**self).exec(command, accepted)
    }
}

/// Runs commands with `sh -c` on the local host.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellExecutor;

impl Executor for ShellExecutor {
    fn exec(&self, command: &str, accepted: &[i32]) -> Result<ExecResult> {
        run_shell("sh", command, accepted)
    }
}

fn run_shell(shell: &str, command: &str, accepted: &[i32]) -> Result<ExecResult> {
    debug!(shell, command, "exec");
    let output = Command::new(shell)
        .arg("-c")
        .arg(command)
        .output()
        .map_err(|source| HarnessError::Spawn {
            command: command.to_string(),
            source,
        })?;

    let result = ExecResult {
        exit_code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    };

    match result.exit_code {
        Some(code) if accepted.contains(&code) => Ok(result),
        code => Err(HarnessError::Command {
            command: command.to_string(),
            code,
            stderr: result.stderr,
        }),
    }
}
