pub mod cli;
pub mod domain;
pub mod error;
pub mod infra;
pub mod services;

// Make test_support available for integration tests
pub mod test_support;

pub use domain::{ContainerInfo, ContainerRuntime, ContainerSpec, ServiceAddress, ServiceAlias};
pub use error::{EnvironmentError, PortAllocationError, TeardownWarning, TimeoutError};
pub use infra::config::EnvironmentConfig;
pub use infra::{DockerAdapter, RestClient, SshShell};
pub use services::{
    Collaborators, ExistingEnvironment, ProvisionedEnvironment, TeardownReport, TestEnvironment,
};
