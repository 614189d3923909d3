//! Shared scenario plumbing: the system API client, namespace helpers and the
//! reachability check.

use crate::api::{ApiClient, CloudApi};
use crate::config::HarnessConfig;
use crate::console::ConsoleSession;
use crate::error::{HarnessError, Result};
use crate::events::{Event, EventPoller};
use crate::executor::{Executor, ShellExecutor};
use rand::distributions::Uniform;
use rand::Rng;
use tracing::info;

/// Name under which scenario namespaces register their key.
pub const NAMESPACE_KEY_NAME: &str = "test";

/// Length of the random suffixes used for namespace names and keys.
pub const UNIQUIFIER_LEN: usize = 8;

pub struct Harness {
    config: HarnessConfig,
    system: Box<dyn CloudApi>,
    executor: Box<dyn Executor>,
    keep_resources: bool,
}

impl Harness {
    /// Harness talking to the configured API and running checks locally.
    pub fn from_config(config: HarnessConfig) -> Result<Self> {
        let system = ApiClient::new(&config.api)?;
        Ok(Self::new(config, Box::new(system), Box::new(ShellExecutor)))
    }

    pub fn new(config: HarnessConfig, system: Box<dyn CloudApi>, executor: Box<dyn Executor>) -> Self {
        Self {
            config,
            system,
            executor,
            keep_resources: false,
        }
    }

    /// Leave namespaces, networks and instances behind for debugging.
    pub fn keep_resources(mut self, keep: bool) -> Self {
        self.keep_resources = keep;
        self
    }

    pub fn keeps_resources(&self) -> bool {
        self.keep_resources
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Client authenticated with the configured (system) credentials.
    pub fn system(&self) -> &dyn CloudApi {
        self.system.as_ref()
    }

    pub fn executor(&self) -> &dyn Executor {
        self.executor.as_ref()
    }

    /// Create `name` from scratch and return a client scoped to it.
    ///
    /// A leftover namespace with the same name is deleted first.
    pub fn make_namespace(&self, name: &str, key: &str) -> Result<Box<dyn CloudApi>> {
        self.remove_namespace(name)?;

        self.system.create_namespace(name)?;
        self.system.add_namespace_key(name, NAMESPACE_KEY_NAME, key)?;
        info!(namespace = name, "namespace created");
        self.system.scoped(name, key)
    }

    /// Delete `name` if it exists.
    pub fn remove_namespace(&self, name: &str) -> Result<()> {
        if self.system.namespaces()?.iter().any(|ns| ns == name) {
            self.system.delete_namespace(name)?;
            info!(namespace = name, "namespace deleted");
        }
        Ok(())
    }

    /// Random lowercase suffix for resource names.
    pub fn uniquifier() -> String {
        rand::thread_rng()
            .sample_iter(Uniform::new_inclusive(b'a', b'z'))
            .take(UNIQUIFIER_LEN)
            .map(char::from)
            .collect()
    }

    /// Event poller over the system client using the configured deadlines.
    pub fn poller(&self) -> EventPoller<&dyn CloudApi> {
        EventPoller::new(self.system(), self.config.poll)
    }

    /// Wait until the instance reports a login prompt on its console.
    pub fn await_login_prompt(&self, instance: &str, after: Option<f64>) -> Result<Event> {
        self.poller().await_login_prompt(instance, after)
    }

    /// Ping `ip` from inside the network namespace of `network` and check the
    /// outcome matches `expect_reachable`.
    pub fn assert_ping(&self, network: &str, ip: &str, expect_reachable: bool) -> Result<()> {
        let command = ping_command(network, ip, self.config.ping.count);
        // grep -c exits 1 when it counts zero matching lines
        let result = self.executor.exec(&command, &[0, 1])?;
        let reachable = parse_ping_count(&result.stdout)?;

        if reachable != expect_reachable {
            return Err(HarnessError::assertion(format!(
                "expected {} to be {} from network {}, but it was {}",
                ip,
                describe(expect_reachable),
                network,
                describe(reachable)
            )));
        }
        info!(network, ip, reachable, "ping check passed");
        Ok(())
    }

    /// Open the console of an instance served at `host:port`.
    pub fn open_console(&self, host: &str, port: u16) -> Result<ConsoleSession> {
        ConsoleSession::connect(host, port, self.config.console.clone())
    }
}

fn describe(reachable: bool) -> &'static str {
    if reachable {
        "reachable"
    } else {
        "unreachable"
    }
}

/// Shell pipeline printing `1` when the ping saw no loss and `0` otherwise.
pub fn ping_command(network: &str, ip: &str, count: u32) -> String {
    format!(
        "ip netns exec {} ping -c {} {} | grep -c \" 0% packet loss\"",
        network, count, ip
    )
}

fn parse_ping_count(stdout: &str) -> Result<bool> {
    match stdout.trim_end() {
        "1" => Ok(true),
        "0" => Ok(false),
        other => Err(HarnessError::assertion(format!(
            "unexpected ping check output {:?}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{Instance, InstanceSpec, Interface, Network, NetworkSpec};
    use crate::events::EventSource;
    use crate::executor::ExecResult;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct Calls {
        log: Vec<String>,
        namespaces: Vec<String>,
    }

    #[derive(Clone, Default)]
    struct FakeApi {
        calls: Rc<RefCell<Calls>>,
    }

    impl EventSource for FakeApi {
        fn instance_events(&self, _instance: &str) -> Result<Vec<Event>> {
            Ok(vec![Event {
                operation: "trigger".into(),
                message: "login prompt".into(),
                timestamp: 5.0,
            }])
        }
    }

    impl CloudApi for FakeApi {
        fn namespaces(&self) -> Result<Vec<String>> {
            Ok(self.calls.borrow().namespaces.clone())
        }
        fn create_namespace(&self, name: &str) -> Result<()> {
            let mut calls = self.calls.borrow_mut();
            calls.log.push(format!("create {}", name));
            calls.namespaces.push(name.to_string());
            Ok(())
        }
        fn delete_namespace(&self, name: &str) -> Result<()> {
            let mut calls = self.calls.borrow_mut();
            calls.log.push(format!("delete {}", name));
            calls.namespaces.retain(|ns| ns != name);
            Ok(())
        }
        fn add_namespace_key(&self, namespace: &str, key_name: &str, key: &str) -> Result<()> {
            self.calls
                .borrow_mut()
                .log
                .push(format!("key {} {} {}", namespace, key_name, key));
            Ok(())
        }
        fn networks(&self) -> Result<Vec<Network>> {
            Ok(Vec::new())
        }
        fn allocate_network(&self, _spec: &NetworkSpec) -> Result<Network> {
            unimplemented!()
        }
        fn delete_network(&self, _uuid: &str) -> Result<()> {
            Ok(())
        }
        fn instances(&self) -> Result<Vec<Instance>> {
            Ok(Vec::new())
        }
        fn create_instance(&self, _spec: &InstanceSpec) -> Result<Instance> {
            unimplemented!()
        }
        fn delete_instance(&self, _uuid: &str) -> Result<()> {
            Ok(())
        }
        fn instance_interfaces(&self, _uuid: &str) -> Result<Vec<Interface>> {
            Ok(Vec::new())
        }
        fn scoped(&self, namespace: &str, key: &str) -> Result<Box<dyn CloudApi>> {
            self.calls
                .borrow_mut()
                .log
                .push(format!("scoped {} {}", namespace, key));
            Ok(Box::new(self.clone()))
        }
    }

    struct CannedExecutor {
        stdout: &'static str,
        seen: RefCell<Vec<(String, Vec<i32>)>>,
    }

    impl CannedExecutor {
        fn new(stdout: &'static str) -> Self {
            Self {
                stdout,
                seen: RefCell::new(Vec::new()),
            }
        }
    }

    impl Executor for Rc<CannedExecutor> {
        fn exec(&self, command: &str, accepted: &[i32]) -> Result<ExecResult> {
            self.seen
                .borrow_mut()
                .push((command.to_string(), accepted.to_vec()));
            Ok(ExecResult {
                exit_code: Some(if self.stdout.trim() == "1" { 0 } else { 1 }),
                stdout: self.stdout.to_string(),
                stderr: String::new(),
            })
        }
    }

    fn harness(api: FakeApi, stdout: &'static str) -> (Harness, Rc<CannedExecutor>) {
        let exec = Rc::new(CannedExecutor::new(stdout));
        let h = Harness::new(HarnessConfig::default(), Box::new(api), Box::new(exec.clone()));
        (h, exec)
    }

    #[test]
    fn uniquifier_is_eight_lowercase_letters() {
        let a = Harness::uniquifier();
        assert_eq!(a.len(), UNIQUIFIER_LEN);
        assert!(a.chars().all(|c| c.is_ascii_lowercase()));
        assert_ne!(a, Harness::uniquifier());
    }

    #[test]
    fn ping_command_shape() {
        assert_eq!(
            ping_command("net-1", "192.168.242.5", 1),
            "ip netns exec net-1 ping -c 1 192.168.242.5 | grep -c \" 0% packet loss\""
        );
    }

    #[test]
    fn ping_reachable_passes() {
        let (h, exec) = harness(FakeApi::default(), "1\n");
        h.assert_ping("net-1", "10.0.0.5", true).unwrap();

        let seen = exec.seen.borrow();
        assert!(seen[0].0.starts_with("ip netns exec net-1 ping"));
        assert_eq!(seen[0].1, vec![0, 1]);
    }

    #[test]
    fn ping_mismatch_is_assertion() {
        let (h, _) = harness(FakeApi::default(), "0\n");
        let err = h.assert_ping("net-1", "10.0.0.5", true).unwrap_err();
        assert!(matches!(err, HarnessError::Assertion(_)));

        h.assert_ping("net-1", "10.0.0.5", false).unwrap();
    }

    #[test]
    fn garbage_ping_output_is_assertion() {
        let (h, _) = harness(FakeApi::default(), "Cannot open network namespace\n");
        let err = h.assert_ping("net-1", "10.0.0.5", true).unwrap_err();
        assert!(matches!(err, HarnessError::Assertion(_)));
    }

    #[test]
    fn make_namespace_replaces_leftover() {
        let api = FakeApi::default();
        api.calls.borrow_mut().namespaces.push("ci-state-old".into());
        let (h, _) = harness(api.clone(), "1");

        h.make_namespace("ci-state-old", "k3y").unwrap();

        assert_eq!(
            api.calls.borrow().log,
            vec![
                "delete ci-state-old",
                "create ci-state-old",
                "key ci-state-old test k3y",
                "scoped ci-state-old k3y",
            ]
        );
    }

    #[test]
    fn remove_namespace_skips_unknown() {
        let api = FakeApi::default();
        let (h, _) = harness(api.clone(), "1");

        h.remove_namespace("never-made").unwrap();
        assert!(api.calls.borrow().log.is_empty());
    }

    #[test]
    fn login_prompt_through_system_client() {
        let (h, _) = harness(FakeApi::default(), "1");
        let event = h.await_login_prompt("inst", Some(1.0)).unwrap();
        assert_eq!(event.timestamp, 5.0);
    }
}
