use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};

/// Everything the runtime needs to create one container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    pub image: String,
    pub hostname: Option<String>,
    pub publish_all_ports: bool,
    pub privileged: bool,
    /// Explicit `(container_port, host_port)` TCP bindings.
    pub port_bindings: Vec<(u16, u16)>,
    /// Bind mounts in `host:container` form.
    pub volumes: Vec<String>,
    /// Links in `container-name:alias` form.
    pub links: Vec<String>,
    pub env: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
    pub host_ip: String,
    pub host_port: u16,
}

/// Snapshot of what the runtime reported when a container was inspected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub running: bool,
    /// Keyed by `"<port>/<protocol>"`, e.g. `"5432/tcp"`.
    pub ports: BTreeMap<String, Vec<PortBinding>>,
}

impl ContainerInfo {
    pub fn new(id: impl Into<String>, name: impl Into<String>, running: bool) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            running,
            ports: BTreeMap::new(),
        }
    }

    pub fn with_binding(mut self, port: u16, protocol: &str, host_ip: &str, host_port: u16) -> Self {
        self.ports
            .entry(format!("{port}/{protocol}"))
            .or_default()
            .push(PortBinding {
                host_ip: host_ip.to_string(),
                host_port,
            });
        self
    }

    /// First host binding published for an internal port.
    pub fn binding(&self, port: u16, protocol: &str) -> Option<&PortBinding> {
        self.ports
            .get(&format!("{port}/{protocol}"))
            .and_then(|bindings| bindings.first())
    }

    /// Name without the leading `/` some runtimes report.
    pub fn short_name(&self) -> &str {
        self.name.trim_start_matches('/')
    }
}

/// Externally reachable `host:port` for a service inside a container.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceAddress {
    pub host: String,
    pub port: u16,
}

impl ServiceAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn to_socket_addr(&self) -> io::Result<SocketAddr> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    format!("endereço não resolvido: {self}"),
                )
            })
    }
}

impl fmt::Display for ServiceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// True for host IPs that mean "every interface of the daemon host".
pub fn is_wildcard_host(host_ip: &str) -> bool {
    matches!(host_ip, "" | "0.0.0.0" | "::" | "[::]")
}
