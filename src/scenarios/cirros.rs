//! Cirros boots and runs a command typed on its serial console.

use super::{CheckResult, Fixture, Scenario, ScenarioResult};
use crate::api::{DiskSpec, InstanceSpec, NicSpec};
use crate::harness::Harness;
use anyhow::{bail, Context, Result};
use std::time::Instant;

pub const CIRROS_IMAGE: &str = "cirros";

/// Typed on the console. The expansion only shows up in the output if a
/// shell actually ran it, never in the echo of the typed line.
const PROBE_COMMAND: &str = "echo ci-$((6*7))";
const PROBE_OUTPUT: &str = "ci-42";

pub struct CirrosConsole;

impl CirrosConsole {
    fn exercise(
        &self,
        harness: &Harness,
        fixture: &Fixture,
        result: &mut ScenarioResult,
    ) -> Result<()> {
        let spec = InstanceSpec {
            name: "cirros".to_string(),
            cpus: 1,
            memory: 1024,
            network: vec![NicSpec {
                network_uuid: fixture.network.uuid.clone(),
            }],
            disk: vec![DiskSpec::from_image(8, CIRROS_IMAGE)],
            ssh_key: None,
            user_data: None,
        };
        let created = fixture
            .client
            .create_instance(&spec)
            .context("creating cirros instance")?;

        harness
            .await_login_prompt(&created.uuid, None)
            .with_context(|| format!("waiting for {} to reach a login prompt", created.uuid))?;

        // placement is only final once the instance is running
        let inst = fixture
            .client
            .instances()
            .context("listing instances")?
            .into_iter()
            .find(|i| i.uuid == created.uuid)
            .unwrap_or(created);
        let (Some(host), Some(port)) = (inst.node.as_deref(), inst.console_port) else {
            bail!("instance {} does not report a console endpoint", inst.uuid);
        };

        let mut console = harness
            .open_console(host, port)
            .with_context(|| format!("opening console at {}:{}", host, port))?;
        let prompt_seen = console.await_login_prompt()?;
        result.add_check(
            "Console connected",
            CheckResult::pass(if prompt_seen {
                "login prompt on console"
            } else {
                "no login prompt on console"
            }),
        );

        let output = console
            .execute(PROBE_COMMAND)
            .context("running probe command on console")?;
        result.add_check(
            "Console runs commands",
            if output.contains(PROBE_OUTPUT) {
                CheckResult::pass(format!("{:?} in output", PROBE_OUTPUT))
            } else {
                CheckResult::fail(PROBE_OUTPUT, output.trim_end())
            },
        );
        if !result.passed {
            result.fail("Check the console credentials in [console.credentials]");
        }

        Ok(())
    }
}

impl Scenario for CirrosConsole {
    fn name(&self) -> &str {
        "cirros-console"
    }

    fn ensures(&self) -> &str {
        "A cirros instance can be logged into on its serial console and runs shell commands"
    }

    fn run(&self, harness: &Harness) -> Result<ScenarioResult> {
        let start = Instant::now();
        let mut result = ScenarioResult::new(self.name());

        let fixture = Fixture::setup(harness).context("setting up namespace and network")?;
        let outcome = self.exercise(harness, &fixture, &mut result);
        let teardown = fixture.teardown(harness);

        outcome?;
        teardown.context("tearing down scenario resources")?;

        result.duration = start.elapsed();
        Ok(result)
    }
}
