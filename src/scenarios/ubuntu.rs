//! Ubuntu boots, answers ping on its network, and goes away when deleted.

use super::{CheckResult, Fixture, Scenario, ScenarioResult};
use crate::api::{DiskSpec, InstanceSpec, NicSpec};
use crate::harness::Harness;
use anyhow::{Context, Result};
use std::time::Instant;

pub const UBUNTU_IMAGE: &str = "ubuntu:18.04";

pub struct UbuntuPings;

impl UbuntuPings {
    fn exercise(
        &self,
        harness: &Harness,
        fixture: &Fixture,
        result: &mut ScenarioResult,
    ) -> Result<()> {
        let spec = InstanceSpec {
            name: "ubuntu".to_string(),
            cpus: 1,
            memory: 1024,
            network: vec![NicSpec {
                network_uuid: fixture.network.uuid.clone(),
            }],
            disk: vec![DiskSpec::from_image(8, UBUNTU_IMAGE)],
            ssh_key: None,
            user_data: None,
        };
        let inst = fixture
            .client
            .create_instance(&spec)
            .context("creating ubuntu instance")?;

        let event = harness
            .await_login_prompt(&inst.uuid, None)
            .with_context(|| format!("waiting for {} to reach a login prompt", inst.uuid))?;
        result.add_check(
            "Login prompt reached",
            CheckResult::pass(format!("trigger event at {}", event.timestamp)),
        );

        // DHCP in the 18.04 cloud image is flaky; the address the API assigned
        // is the one the guest configures from its config drive.
        let interfaces = fixture
            .client
            .instance_interfaces(&inst.uuid)
            .context("listing instance interfaces")?;
        let Some(iface) = interfaces.first() else {
            result.add_check(
                "Instance has an interface",
                CheckResult::fail("at least one interface", "none"),
            );
            result.fail("Check the network was attached when the instance was created");
            return Ok(());
        };

        let ping = harness
            .assert_ping(&fixture.network.uuid, &iface.ipv4, true)
            .map(|()| format!("{} answered from {}", iface.ipv4, fixture.network.uuid));
        result.add_check(
            "Instance answers ping",
            CheckResult::from_assertion("0% packet loss", ping)?,
        );

        fixture
            .client
            .delete_instance(&inst.uuid)
            .context("deleting ubuntu instance")?;
        let remaining = fixture.client.instances().context("listing instances")?;
        let still_listed = remaining.iter().any(|i| i.uuid == inst.uuid);
        result.add_check(
            "Deleted instance no longer listed",
            if still_listed {
                CheckResult::fail(format!("{} absent", inst.uuid), "still listed")
            } else {
                CheckResult::pass(format!("{} instances remain", remaining.len()))
            },
        );

        Ok(())
    }
}

impl Scenario for UbuntuPings {
    fn name(&self) -> &str {
        "ubuntu-pings"
    }

    fn ensures(&self) -> &str {
        "An Ubuntu instance boots to a login prompt, is reachable by ping on its network, and is gone after delete"
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
