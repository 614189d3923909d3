//! Orchestration API surface used by the scenarios.
//!
//! [`CloudApi`] lists exactly the operations the harness consumes; the HTTP
//! implementation is [`ApiClient`]. Scenarios only see the trait, so tests can
//! swap in an in-memory fake.

mod client;
mod types;

pub use client::ApiClient;
pub use types::{DiskSpec, Instance, InstanceSpec, Interface, Network, NetworkSpec, NicSpec};

use crate::error::Result;
use crate::events::EventSource;

/// Namespace, network and instance operations of the orchestration system.
///
/// Event listing comes from the [`EventSource`] supertrait.
pub trait CloudApi: EventSource {
    fn namespaces(&self) -> Result<Vec<String>>;
    fn create_namespace(&self, name: &str) -> Result<()>;
    fn delete_namespace(&self, name: &str) -> Result<()>;
    fn add_namespace_key(&self, namespace: &str, key_name: &str, key: &str) -> Result<()>;

    fn networks(&self) -> Result<Vec<Network>>;
    fn allocate_network(&self, spec: &NetworkSpec) -> Result<Network>;
    fn delete_network(&self, uuid: &str) -> Result<()>;

    fn instances(&self) -> Result<Vec<Instance>>;
    fn create_instance(&self, spec: &InstanceSpec) -> Result<Instance>;
    fn delete_instance(&self, uuid: &str) -> Result<()>;
    fn instance_interfaces(&self, uuid: &str) -> Result<Vec<Interface>>;

    /// A client against the same endpoint, authenticated into `namespace`.
    fn scoped(&self, namespace: &str, key: &str) -> Result<Box<dyn CloudApi>>;
}
