//! CI scenario runner for the orchestration API.
//!
//! Creates throwaway namespaces, boots instances, and verifies they behave.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use cloud_ci_tests::config::{seconds_arg, timestamp_arg};
use cloud_ci_tests::console::ConsoleSession;
use cloud_ci_tests::scenarios::{all_scenarios, find_scenario, scenario_names, Scenario};
use cloud_ci_tests::{require_preflight, run_preflight, CheckResult, Harness, HarnessConfig, ScenarioResult};
use colored::Colorize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ci-tests")]
#[command(about = "End-to-end CI scenarios for the orchestration API")]
struct Cli {
    /// Config file (default: $CI_TESTS_CONFIG, then built-in defaults)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run scenarios
    Run {
        /// Run only the named scenario
        #[arg(long)]
        scenario: Option<String>,

        /// Keep namespaces, networks and instances after the run (for debugging)
        #[arg(long)]
        keep: bool,
    },

    /// List all scenarios
    List,

    /// Check the host and API before running scenarios
    Preflight,

    /// Wait for an instance to report a login prompt
    AwaitLogin {
        /// Instance uuid
        instance: String,

        /// Ignore events with an earlier timestamp
        #[arg(long)]
        after: Option<f64>,

        /// Seconds to wait (default: poll.timeout from config)
        #[arg(long)]
        timeout: Option<f64>,
    },

    /// Connect to an instance console and optionally run a command
    Console {
        host: String,
        port: u16,

        /// Command to run after logging in
        #[arg(long)]
        command: Option<String>,

        /// Wait for a login prompt before doing anything else
        #[arg(long)]
        wait_login: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = HarnessConfig::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Commands::Run { scenario, keep } => run_scenarios(config, scenario.as_deref(), keep),
        Commands::List => {
            list_scenarios();
            Ok(())
        }
        Commands::Preflight => {
            let harness = Harness::from_config(config)?;
            let result = run_preflight(&harness)?;
            if result.overall_pass {
                Ok(())
            } else {
                bail!("Preflight failed")
            }
        }
        Commands::AwaitLogin {
            instance,
            after,
            timeout,
        } => await_login(config, &instance, after, timeout),
        Commands::Console {
            host,
            port,
            command,
            wait_login,
        } => drive_console(config, &host, port, command.as_deref(), wait_login),
    }
}

fn list_scenarios() {
    println!("{}", "CI Scenarios".bold());
    println!();

    for scenario in all_scenarios() {
        println!("  {}", scenario.name().blue().bold());
        println!("      {}", scenario.ensures());
    }
    println!();
}

fn run_scenarios(config: HarnessConfig, only: Option<&str>, keep: bool) -> Result<()> {
    println!("{}", "Orchestration API CI Scenarios".bold());
    println!();

    let scenarios: Vec<Box<dyn Scenario>> = match only {
        Some(name) => match find_scenario(name) {
            Some(s) => vec![s],
            None => bail!(
                "Unknown scenario '{}'. Available: {}",
                name,
                scenario_names().join(", ")
            ),
        },
        None => all_scenarios(),
    };

    println!("  API:       {}", config.api.base_url);
    if keep {
        println!("  {}", "Keeping resources after each scenario".yellow());
    }

    let harness = Harness::from_config(config)?.keep_resources(keep);
    require_preflight(&harness)?;
    println!();

    let mut results: Vec<ScenarioResult> = Vec::new();
    let mut errors = 0usize;

    for scenario in scenarios {
        print!("{} {}... ", "▶".cyan(), scenario.name());

        match scenario.run(&harness) {
            Ok(result) => {
                let secs = result.duration.as_secs_f64();
                if result.passed {
                    println!("{} ({:.1}s)", "PASS".green().bold(), secs);
                } else {
                    println!("{} ({:.1}s)", "FAIL".red().bold(), secs);
                    print_failures(&result);
                }
                results.push(result);
            }
            Err(e) => {
                println!("{}", "ERROR".red().bold());
                println!("    {:#}", e);
                errors += 1;
            }
        }
    }

    // Print summary
    println!();
    println!("{}", "━".repeat(60));
    println!();

    let passed = results.iter().filter(|r| r.passed).count();
    let total = results.len() + errors;

    if passed == total {
        println!("{} All {} scenarios passed!", "✓".green().bold(), passed);
        Ok(())
    } else {
        println!("{} {}/{} scenarios passed", "✗".red().bold(), passed, total);
        bail!("CI scenarios failed")
    }
}

fn print_failures(result: &ScenarioResult) {
    for (check_name, check_result) in &result.checks {
        if let CheckResult::Fail { expected, actual } = check_result {
            println!("    {} {}", "✗".red(), check_name);
            println!("      Expected: {}", expected);
            println!("      Actual:   {}", actual);
        }
    }

    if let Some(fix) = &result.fix_suggestion {
        println!("    {} {}", "Fix:".yellow(), fix);
    }
}

fn await_login(
    config: HarnessConfig,
    instance: &str,
    after: Option<f64>,
    timeout: Option<f64>,
) -> Result<()> {
    let timeout = match timeout {
        Some(secs) => seconds_arg("--timeout", secs)?,
        None => config.poll.timeout,
    };
    let after = after.map(|ts| timestamp_arg("--after", ts)).transpose()?;
    let interval = config.poll.interval;
    let harness = Harness::from_config(config)?;

    println!("{} {}", "Waiting for login prompt on".cyan(), instance);
    let event = harness.poller().await_event_within(
        instance,
        |e| e.is_login_prompt(),
        after,
        timeout,
        interval,
    )?;
    println!(
        "{} {} {:?} at {}",
        "✓".green().bold(),
        event.operation,
        event.message,
        event.timestamp
    );
    Ok(())
}

fn drive_console(
    config: HarnessConfig,
    host: &str,
    port: u16,
    command: Option<&str>,
    wait_login: bool,
) -> Result<()> {
    let mut console = ConsoleSession::connect(host, port, config.console)
        .with_context(|| format!("connecting to console at {}:{}", host, port))?;

    if wait_login {
        if console.await_login_prompt()? {
            println!("{}", "Login prompt seen".green());
        } else {
            println!("{}", "No login prompt, continuing".yellow());
        }
    }

    match command {
        Some(cmd) => {
            let output = console.execute(cmd)?;
            print!("{}", output);
            println!();
        }
        None => {
            let settle = console.config().settle_delay;
            console.drain_for(settle)?;
            for line in console.buffer().tail(20) {
                println!("{}", line);
            }
        }
    }
    Ok(())
}
