pub mod aliases;
pub mod doctor;
pub mod free_port;
pub mod init;
pub mod up;

pub use free_port::FreePortOptions;
pub use up::UpOptions;

use crate::domain::Credentials;
use crate::infra::config::EnvironmentConfig;
use crate::infra::{DockerAdapter, OverlayStager, RestClient, SshShell};
use crate::services::{Collaborators, TcpPortProbe};
use anyhow::Result;
use std::sync::Arc;

/// Production adapters for every collaborator.
pub fn production_collaborators(config: &EnvironmentConfig, runtime_binary: &str) -> Result<Collaborators> {
    Ok(Collaborators {
        runtime: Arc::new(DockerAdapter::new(runtime_binary)),
        shell: Arc::new(SshShell::default()),
        versions: Arc::new(RestClient::new(Credentials::default())?),
        port_probe: Arc::new(TcpPortProbe),
        overlays: Arc::new(OverlayStager::new(config.overlay_root.clone())),
    })
}
