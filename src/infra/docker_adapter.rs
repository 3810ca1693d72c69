use crate::domain::{ContainerInfo, ContainerRuntime, ContainerSpec, PortBinding};
use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::process::{Command, Output, Stdio};
use std::time::Duration;
use tracing::debug;

const DEFAULT_BINARY: &str = "docker";

/// Runtime adapter over the `docker` CLI. Any binary that accepts the same
/// arguments and prints the same inspect JSON (podman does) works too.
#[derive(Debug, Clone)]
pub struct DockerAdapter {
    binary: String,
}

impl DockerAdapter {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    fn output<I, S>(&self, args: I, context: &str) -> Result<Output>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("{context} (executando {})", self.binary))
    }

    /// Runs the command and returns its trimmed stdout, failing on a non-zero exit.
    fn run<I, S>(&self, args: I, context: &str) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let output = self.output(args, context)?;
        ensure_success(&self.binary, &output, context)?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl Default for DockerAdapter {
    fn default() -> Self {
        Self::new(DEFAULT_BINARY)
    }
}

impl ContainerRuntime for DockerAdapter {
    fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let args = create_args(spec);
        debug!("{} {}", self.binary, args.join(" "));

        let id = self.run(&args, &format!("criando container de {}", spec.image))?;
        if id.is_empty() {
            bail!("{} não retornou id ao criar container de {}", self.binary, spec.image);
        }
        Ok(id)
    }

    fn start_container(&self, id: &str) -> Result<()> {
        self.run(["start", id], &format!("iniciando container {id}"))
            .map(|_| ())
    }

    fn inspect_container(&self, id: &str) -> Result<ContainerInfo> {
        let json = self.run(
            ["container", "inspect", id],
            &format!("inspecionando container {id}"),
        )?;
        parse_inspect(&json).with_context(|| format!("interpretando inspect de {id}"))
    }

    fn container_logs(&self, id: &str) -> Result<String> {
        let context = format!("lendo logs de {id}");
        let output = self.output(["logs", id], &context)?;
        ensure_success(&self.binary, &output, &context)?;

        let mut logs = String::from_utf8_lossy(&output.stdout).into_owned();
        logs.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(logs)
    }

    fn stop_container(&self, id: &str, grace: Duration) -> Result<()> {
        let secs = grace.as_secs().to_string();
        self.run(["stop", "-t", secs.as_str(), id], &format!("parando container {id}"))
            .map(|_| ())
    }

    fn remove_container(&self, id: &str) -> Result<()> {
        let context = format!("removendo container {id}");
        let output = self.output(["rm", "-f", id], &context)?;

        if output.status.success() || is_not_found(&output) {
            return Ok(());
        }
        ensure_success(&self.binary, &output, &context)
    }

    fn daemon_host(&self) -> String {
        daemon_host_from(std::env::var("DOCKER_HOST").ok().as_deref())
    }

    fn is_available(&self) -> bool {
        Command::new(&self.binary)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }
}

fn create_args(spec: &ContainerSpec) -> Vec<String> {
    let mut args: Vec<String> = vec!["create".into()];

    if let Some(hostname) = &spec.hostname {
        args.push("--hostname".into());
        args.push(hostname.clone());
    }
    if spec.publish_all_ports {
        args.push("--publish-all".into());
    }
    if spec.privileged {
        args.push("--privileged".into());
    }

    for (container_port, host_port) in &spec.port_bindings {
        args.push("-p".into());
        args.push(format!("{host_port}:{container_port}"));
    }

    for env in &spec.env {
        args.push("-e".into());
        args.push(env.clone());
    }

    for volume in &spec.volumes {
        args.push("-v".into());
        args.push(volume.clone());
    }

    for link in &spec.links {
        args.push("--link".into());
        args.push(link.clone());
    }

    args.push(spec.image.clone());
    args
}

fn ensure_success(binary: &str, output: &Output, context: &str) -> Result<()> {
    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    bail!(
        "{binary} retornou status {:?} ({context}): {}",
        output.status.code(),
        stderr.trim()
    )
}

fn is_not_found(output: &Output) -> bool {
    String::from_utf8_lossy(&output.stderr)
        .to_ascii_lowercase()
        .contains("no such container")
}

/// `tcp://host:port` → `host`. Unix sockets and unset mean the local host.
fn daemon_host_from(docker_host: Option<&str>) -> String {
    docker_host
        .and_then(|url| url.strip_prefix("tcp://"))
        .and_then(|rest| rest.split(['/', ':']).next())
        .filter(|host| !host.is_empty())
        .unwrap_or("127.0.0.1")
        .to_string()
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "PascalCase")]
struct InspectEntry {
    id: String,
    name: String,
    state: InspectState,
    network_settings: InspectNetwork,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    running: bool,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "PascalCase")]
struct InspectNetwork {
    #[serde(default)]
    ports: Option<BTreeMap<String, Option<Vec<InspectBinding>>>>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "PascalCase")]
struct InspectBinding {
    #[serde(default)]
    host_ip: String,
    host_port: String,
}

fn parse_inspect(json: &str) -> Result<ContainerInfo> {
    let entries: Vec<InspectEntry> = serde_json::from_str(json)?;
    let Some(entry) = entries.into_iter().next() else {
        bail!("inspect não retornou nenhum container");
    };

    let mut ports = BTreeMap::new();
    for (key, bindings) in entry.network_settings.ports.unwrap_or_default() {
        // Exposed but unpublished ports come back as null
        let Some(bindings) = bindings else {
            continue;
        };

        let parsed = bindings
            .into_iter()
            .map(|b| {
                let host_port = b
                    .host_port
                    .parse::<u16>()
                    .with_context(|| format!("porta inválida '{}' em {key}", b.host_port))?;
                Ok(PortBinding {
                    host_ip: b.host_ip,
                    host_port,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        ports.insert(key, parsed);
    }

    Ok(ContainerInfo {
        id: entry.id,
        name: entry.name,
        running: entry.state.running,
        ports,
    })
}
