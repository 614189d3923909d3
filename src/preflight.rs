//! Preflight verification for the CI scenarios.
//!
//! Runs BEFORE creating any namespace to catch host problems early.
//!
//! Scenarios check reachability with `ip netns exec`, which needs root and
//! the `ip`/`ping` tools on the hypervisor. Discovering that after an
//! instance has booted wastes several minutes per scenario, so check it up
//! front along with whether the API answers at all.

use crate::harness::Harness;
use anyhow::{bail, Result};
use colored::Colorize;
use std::env;
use std::path::{Path, PathBuf};

/// Tools the reachability check shells out to.
pub const REQUIRED_TOOLS: &[&str] = &["ip", "ping", "grep"];

/// Result of preflight verification
#[derive(Debug)]
pub struct PreflightResult {
    pub checks: Vec<PreflightCheck>,
    pub overall_pass: bool,
}

/// Result of a single preflight check
#[derive(Debug)]
pub struct PreflightCheck {
    pub name: String,
    pub passed: bool,
    pub details: Vec<String>,
}

impl PreflightCheck {
    fn pass(name: &str) -> Self {
        Self {
            name: name.to_string(),
            passed: true,
            details: Vec::new(),
        }
    }

    fn fail(name: &str, detail: String) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            details: vec![detail],
        }
    }
}

/// Run every host check and print the results.
///
/// # Returns
/// * `Ok(PreflightResult)` - Verification completed (check `overall_pass`)
pub fn run_preflight(harness: &Harness) -> Result<PreflightResult> {
    println!();
    println!("{}", "=== PREFLIGHT VERIFICATION ===".cyan().bold());
    println!(
        "Verifying host and API at {} before creating resources...",
        harness.config().api.base_url
    );
    println!();

    let path_var = env::var_os("PATH").unwrap_or_default();
    let mut checks = vec![check_root(effective_uid())];
    for tool in REQUIRED_TOOLS {
        checks.push(check_tool(tool, &path_var));
    }
    checks.push(check_api(harness));

    for check in &checks {
        print_check(check);
    }

    let overall_pass = checks.iter().all(|c| c.passed);
    let result = PreflightResult {
        checks,
        overall_pass,
    };

    println!();
    print_summary(&result);
    Ok(result)
}

fn effective_uid() -> u32 {
    // SAFETY: geteuid has no preconditions and cannot fail
    unsafe { libc::geteuid() }
}

fn check_root(euid: u32) -> PreflightCheck {
    let name = "Running as root";
    if euid == 0 {
        PreflightCheck::pass(name)
    } else {
        PreflightCheck::fail(
            name,
            format!("effective uid is {}; `ip netns exec` needs root", euid),
        )
    }
}

fn check_tool(tool: &str, path_var: &std::ffi::OsStr) -> PreflightCheck {
    let name = format!("`{}` on PATH", tool);
    match find_in_path(tool, path_var) {
        Some(_) => PreflightCheck::pass(&name),
        None => PreflightCheck::fail(&name, format!("{} not found in PATH", tool)),
    }
}

fn check_api(harness: &Harness) -> PreflightCheck {
    let name = "API answers";
    match harness.system().namespaces() {
        Ok(_) => PreflightCheck::pass(name),
        Err(e) => PreflightCheck::fail(name, format!("listing namespaces failed: {}", e)),
    }
}

/// First executable file called `name` in the directories of `path_var`.
pub fn find_in_path(name: &str, path_var: &std::ffi::OsStr) -> Option<PathBuf> {
    env::split_paths(path_var)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

fn print_check(check: &PreflightCheck) {
    if check.passed {
        println!("  Checking {}... {}", check.name, "PASS".green());
    } else {
        println!("  Checking {}... {}", check.name, "FAIL".red().bold());
        for detail in &check.details {
            println!("    {}", detail.red());
        }
    }
}

/// Print the overall summary.
fn print_summary(result: &PreflightResult) {
    println!("{}", "--- Preflight Summary ---".bold());

    let status = if result.overall_pass {
        "PASS".green().bold()
    } else {
        "FAIL".red().bold()
    };

    println!("Overall: {}", status);

    if !result.overall_pass {
        println!();
        println!(
            "{}",
            "Preflight verification failed. Fix the issues above before running scenarios.".red()
        );
    }
}

/// Run preflight and fail if any check failed.
pub fn require_preflight(harness: &Harness) -> Result<()> {
    let result = run_preflight(harness)?;

    if !result.overall_pass {
        let failures: Vec<String> = result
            .checks
            .iter()
            .filter(|c| !c.passed)
            .flat_map(|c| c.details.iter().cloned())
            .collect();
        bail!(
            "Preflight verification failed. Cannot run scenarios on this host.\n\n\
             Failures:\n{}",
            failures.join("\n")
        );
    }

    Ok(())
}
