use super::{ContainerInfo, ContainerSpec, ServiceAddress};
use anyhow::Result;
use std::fmt::Debug;
use std::time::Duration;

/// Trait for container runtime operations
pub trait ContainerRuntime: Send + Sync + Debug {
    /// Create a container from a spec, returning the runtime-assigned id
    fn create_container(&self, spec: &ContainerSpec) -> Result<String>;

    /// Start a created container
    fn start_container(&self, id: &str) -> Result<()>;

    /// Inspect a container's running state and published ports
    fn inspect_container(&self, id: &str) -> Result<ContainerInfo>;

    /// Combined stdout/stderr of a container
    fn container_logs(&self, id: &str) -> Result<String>;

    /// Stop a container, killing it once the grace period expires
    fn stop_container(&self, id: &str, grace: Duration) -> Result<()>;

    /// Remove a container. A container that no longer exists is not an error.
    fn remove_container(&self, id: &str) -> Result<()>;

    /// Address of the host running the daemon, used for wildcard bindings
    fn daemon_host(&self) -> String;

    /// Check if the runtime can be reached at all
    fn is_available(&self) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl Default for Credentials {
    fn default() -> Self {
        Self::new("admin", "admin")
    }
}

/// An interactive administrative shell on a service.
pub trait ShellSession: Send {
    fn send_line(&mut self, line: &str) -> Result<()>;

    /// Everything the remote side has written so far.
    fn transcript(&self) -> String;

    fn is_closed(&mut self) -> bool;
}

/// Opens authenticated shell sessions.
pub trait RemoteShell: Send + Sync + Debug {
    fn open(&self, addr: &ServiceAddress, credentials: &Credentials)
    -> Result<Box<dyn ShellSession>>;
}

/// Fetches the version string a server reports on its status endpoint.
pub trait VersionClient: Send + Sync + Debug {
    fn display_version(&self, addr: &ServiceAddress) -> Result<String>;
}

/// Tells whether a TCP port still accepts fresh connections.
pub trait PortProbe: Send + Sync + Debug {
    fn is_open(&self, addr: &ServiceAddress) -> bool;
}
