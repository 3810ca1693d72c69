mod alias;
mod container;
pub mod traits;

pub use alias::{ImageTable, ProbeKind, ServiceAlias};
pub use container::{ContainerInfo, ContainerSpec, PortBinding, ServiceAddress, is_wildcard_host};
pub use traits::{
    ContainerRuntime, Credentials, PortProbe, RemoteShell, ShellSession, VersionClient,
};
