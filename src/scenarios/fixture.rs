//! Per-scenario namespace and network.

use crate::api::{CloudApi, Network, NetworkSpec};
use crate::error::{HarnessError, Result};
use crate::harness::Harness;
use tracing::{info, warn};

pub const NAMESPACE_PREFIX: &str = "ci-state-";
pub const NETBLOCK: &str = "192.168.242.0/24";

/// A throwaway namespace with one DHCP+NAT network in it.
pub struct Fixture {
    pub namespace: String,
    pub client: Box<dyn CloudApi>,
    pub network: Network,
}

impl Fixture {
    pub fn setup(harness: &Harness) -> Result<Self> {
        let namespace = format!("{}{}", NAMESPACE_PREFIX, Harness::uniquifier());
        let key = Harness::uniquifier();
        let client = harness.make_namespace(&namespace, &key)?;

        let spec = NetworkSpec {
            netblock: NETBLOCK.to_string(),
            provide_dhcp: true,
            provide_nat: true,
            name: format!("{}-net", namespace),
        };
        let network = match client.allocate_network(&spec) {
            Ok(network) => network,
            Err(e) => {
                if let Err(cleanup) = harness.remove_namespace(&namespace) {
                    warn!(namespace = %namespace, error = %cleanup, "could not remove namespace after failed setup");
                }
                return Err(e);
            }
        };
        info!(namespace = %namespace, network = %network.uuid, "fixture ready");

        Ok(Self {
            namespace,
            client,
            network,
        })
    }

    /// Delete every instance in the namespace, then the network, then the
    /// namespace itself. Keeps going past failures and reports the first.
    pub fn teardown(self, harness: &Harness) -> Result<()> {
        if harness.keeps_resources() {
            warn!(namespace = %self.namespace, network = %self.network.uuid, "keeping scenario resources");
            return Ok(());
        }

        let mut first_error: Option<HarnessError> = None;
        let mut note = |step: &str, outcome: Result<()>| {
            if let Err(e) = outcome {
                warn!(step, error = %e, "teardown step failed");
                first_error.get_or_insert(e);
            }
        };

        match self.client.instances() {
            Ok(instances) => {
                for instance in instances {
                    note("delete instance", self.client.delete_instance(&instance.uuid));
                }
            }
            Err(e) => note("list instances", Err(e)),
        }
        note("delete network", self.client.delete_network(&self.network.uuid));
        note("remove namespace", harness.remove_namespace(&self.namespace));

        match first_error {
            Some(e) => Err(e),
            None => {
                info!(namespace = %self.namespace, "fixture torn down");
                Ok(())
            }
        }
    }
}
