pub mod config;
pub mod docker_adapter;
pub mod net;
pub mod overlay;
pub mod rest_client;
pub mod ssh_shell;

pub use docker_adapter::DockerAdapter;
pub use overlay::{OverlayBuilder, OverlayStager};
pub use rest_client::RestClient;
pub use ssh_shell::SshShell;
