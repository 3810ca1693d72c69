//! In-memory stand-ins for every collaborator, shared by unit and
//! integration tests.

use crate::domain::{
    ContainerInfo, ContainerRuntime, ContainerSpec, Credentials, PortProbe,
    RemoteShell, ServiceAddress, ServiceAlias, ShellSession, VersionClient,
};
use crate::infra::config::EnvironmentConfig;
use crate::infra::overlay::OverlayStager;
use crate::services::readiness::AGENT_PING_COMMAND;
use crate::services::{Collaborators, Wait};
use anyhow::{Result, bail};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

static UNIQUE: AtomicUsize = AtomicUsize::new(0);

/// Fresh directory name under the system temp dir.
pub fn unique_temp_dir(prefix: &str) -> PathBuf {
    let n = UNIQUE.fetch_add(1, Ordering::SeqCst);
    std::env::temp_dir().join(format!("{prefix}-{}-{n}", std::process::id()))
}

#[derive(Debug, Clone)]
struct MockContainer {
    info: ContainerInfo,
    spec: Option<ContainerSpec>,
    logs: Option<String>,
}

#[derive(Debug)]
pub struct MockRuntime {
    containers: RwLock<HashMap<String, MockContainer>>,
    commands: RwLock<Vec<String>>,
    fail_on: RwLock<Option<String>>,
    exits_on_start: RwLock<bool>,
    published: RwLock<HashMap<String, Vec<(u16, u16)>>>,
    next_id: AtomicUsize,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self {
            containers: RwLock::new(HashMap::new()),
            commands: RwLock::new(Vec::new()),
            fail_on: RwLock::new(None),
            exits_on_start: RwLock::new(false),
            published: RwLock::new(HashMap::new()),
            next_id: AtomicUsize::new(1),
        }
    }

    /// A container that already exists, reachable by id or by name.
    pub fn add_running(&self, name: &str, info: ContainerInfo) {
        let mut info = info;
        info.running = true;
        if info.name.is_empty() {
            info.name = format!("/{name}");
        }
        self.containers.write().unwrap().insert(
            info.id.clone(),
            MockContainer {
                info,
                spec: None,
                logs: None,
            },
        );
    }

    pub fn set_fail_on(&self, operation: &str) {
        *self.fail_on.write().unwrap() = Some(operation.to_string());
    }

    pub fn clear_fail_on(&self) {
        *self.fail_on.write().unwrap() = None;
    }

    /// Started containers immediately report "not running".
    pub fn set_exits_on_start(&self, exits: bool) {
        *self.exits_on_start.write().unwrap() = exits;
    }

    /// Containers created from `image` with `publish_all_ports` get
    /// `container_port` bound to `host_port` on the wildcard interface.
    pub fn publish(&self, image: &str, container_port: u16, host_port: u16) {
        self.published
            .write()
            .unwrap()
            .entry(image.to_string())
            .or_default()
            .push((container_port, host_port));
    }

    pub fn set_logs(&self, id: &str, logs: &str) {
        if let Some(container) = self.containers.write().unwrap().get_mut(id) {
            container.logs = Some(logs.to_string());
        }
    }

    pub fn get_commands(&self) -> Vec<String> {
        self.commands.read().unwrap().clone()
    }

    pub fn commands_starting_with(&self, prefix: &str) -> Vec<String> {
        self.get_commands()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    /// Ids passed to `op`, in call order.
    pub fn ids_for(&self, op: &str) -> Vec<String> {
        let prefix = format!("{op}:");
        self.get_commands()
            .iter()
            .filter_map(|c| c.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }

    pub fn created_spec(&self, id: &str) -> Option<ContainerSpec> {
        self.containers
            .read()
            .unwrap()
            .get(id)
            .and_then(|c| c.spec.clone())
    }

    pub fn container_exists(&self, id: &str) -> bool {
        self.containers.read().unwrap().contains_key(id)
    }

    pub fn is_running(&self, id: &str) -> bool {
        self.containers
            .read()
            .unwrap()
            .get(id)
            .map(|c| c.info.running)
            .unwrap_or(false)
    }

    fn record_command(&self, cmd: &str) {
        self.commands.write().unwrap().push(cmd.to_string());
    }

    fn check_fail(&self, operation: &str) -> Result<()> {
        if let Some(ref fail_on) = *self.fail_on.read().unwrap() {
            if fail_on == operation {
                bail!("Mock failure on: {}", operation);
            }
        }
        Ok(())
    }

    fn lookup(&self, id_or_name: &str) -> Option<MockContainer> {
        let containers = self.containers.read().unwrap();
        containers.get(id_or_name).cloned().or_else(|| {
            containers
                .values()
                .find(|c| c.info.short_name() == id_or_name.trim_start_matches('/'))
                .cloned()
        })
    }
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerRuntime for MockRuntime {
    fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        self.record_command(&format!("create:{}", spec.image));
        self.check_fail("create")?;

        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let id = format!("mock{n:04}");
        let mut info = ContainerInfo::new(id.clone(), format!("/testbed_{n}"), false);

        for (container_port, host_port) in &spec.port_bindings {
            info = info.with_binding(*container_port, "tcp", "0.0.0.0", *host_port);
        }
        if spec.publish_all_ports {
            if let Some(ports) = self.published.read().unwrap().get(&spec.image) {
                for (container_port, host_port) in ports {
                    info = info.with_binding(*container_port, "tcp", "0.0.0.0", *host_port);
                }
            }
        }

        self.containers.write().unwrap().insert(
            id.clone(),
            MockContainer {
                info,
                spec: Some(spec.clone()),
                logs: None,
            },
        );
        Ok(id)
    }

    fn start_container(&self, id: &str) -> Result<()> {
        self.record_command(&format!("start:{}", id));
        self.check_fail("start")?;

        let exits = *self.exits_on_start.read().unwrap();
        if let Some(container) = self.containers.write().unwrap().get_mut(id) {
            container.info.running = !exits;
        }
        Ok(())
    }

    fn inspect_container(&self, id: &str) -> Result<ContainerInfo> {
        self.record_command(&format!("inspect:{}", id));
        self.check_fail("inspect")?;

        match self.lookup(id) {
            Some(container) => Ok(container.info),
            None => bail!("No such container: {id}"),
        }
    }

    fn container_logs(&self, id: &str) -> Result<String> {
        self.record_command(&format!("logs:{}", id));
        self.check_fail("logs")?;

        match self.lookup(id) {
            Some(container) => Ok(container
                .logs
                .unwrap_or_else(|| format!("saída de {id}\n"))),
            None => bail!("No such container: {id}"),
        }
    }

    fn stop_container(&self, id: &str, _grace: Duration) -> Result<()> {
        self.record_command(&format!("stop:{}", id));
        self.check_fail("stop")?;

        if let Some(container) = self.containers.write().unwrap().get_mut(id) {
            container.info.running = false;
        }
        Ok(())
    }

    fn remove_container(&self, id: &str) -> Result<()> {
        self.record_command(&format!("remove:{}", id));
        self.check_fail("remove")?;

        self.containers.write().unwrap().remove(id);
        Ok(())
    }

    fn daemon_host(&self) -> String {
        "127.0.0.1".to_string()
    }

    fn is_available(&self) -> bool {
        true
    }
}

/// Scripted administrative shell. Each command answers with the text
/// registered for it; `logout` closes the session.
#[derive(Debug, Default)]
pub struct FakeShell {
    responses: Mutex<HashMap<String, String>>,
    sent: Arc<Mutex<Vec<String>>>,
    refusals: AtomicUsize,
    broken: AtomicUsize,
    opens: AtomicUsize,
    journal: Mutex<Option<Arc<MockRuntime>>>,
}

impl FakeShell {
    pub fn new() -> Self {
        Self::default()
    }

    /// A shell where agents answer the ping with two `OK`s.
    pub fn healthy() -> Self {
        let shell = Self::new();
        shell.respond_to(
            AGENT_PING_COMMAND,
            "Connecting to ReST API\nOK\nConnecting to Broker\nOK",
        );
        shell
    }

    pub fn respond_to(&self, command: &str, output: &str) {
        self.responses
            .lock()
            .unwrap()
            .insert(command.to_string(), output.to_string());
    }

    /// The next `count` opens fail as if the port refused the connection.
    pub fn refuse_next(&self, count: usize) {
        self.refusals.store(count, Ordering::SeqCst);
    }

    /// The next `count` sessions open fine but fail every write.
    pub fn break_next(&self, count: usize) {
        self.broken.store(count, Ordering::SeqCst);
    }

    /// Lines sent from now on also land in `runtime`'s command log as
    /// `shell:<line>`, interleaved with the container calls.
    pub fn journal_to(&self, runtime: Arc<MockRuntime>) {
        *self.journal.lock().unwrap() = Some(runtime);
    }

    pub fn sent_lines(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl RemoteShell for FakeShell {
    fn open(&self, addr: &ServiceAddress, _credentials: &Credentials) -> Result<Box<dyn ShellSession>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .refusals
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            bail!("Connection refused: {addr}");
        }

        let broken = self
            .broken
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();

        Ok(Box::new(FakeSession {
            responses: self.responses.lock().unwrap().clone(),
            sent: self.sent.clone(),
            journal: self.journal.lock().unwrap().clone(),
            transcript: String::new(),
            broken,
            closed: false,
        }))
    }
}

struct FakeSession {
    responses: HashMap<String, String>,
    sent: Arc<Mutex<Vec<String>>>,
    journal: Option<Arc<MockRuntime>>,
    transcript: String,
    broken: bool,
    closed: bool,
}

impl ShellSession for FakeSession {
    fn send_line(&mut self, line: &str) -> Result<()> {
        if self.closed {
            bail!("sessão encerrada");
        }
        if self.broken {
            bail!("Broken pipe");
        }
        self.sent.lock().unwrap().push(line.to_string());
        if let Some(runtime) = &self.journal {
            runtime.record_command(&format!("shell:{line}"));
        }

        if line == "logout" {
            self.closed = true;
        } else if let Some(output) = self.responses.get(line) {
            self.transcript.push_str(output);
            self.transcript.push('\n');
        }
        Ok(())
    }

    fn transcript(&self) -> String {
        self.transcript.clone()
    }

    fn is_closed(&mut self) -> bool {
        self.closed
    }
}

/// Replays a script of version lookups, repeating the last entry forever.
#[derive(Debug)]
pub struct FakeVersionClient {
    script: Mutex<VecDeque<std::result::Result<String, String>>>,
    calls: AtomicUsize,
}

impl FakeVersionClient {
    pub fn new(script: Vec<std::result::Result<String, String>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn ready(version: &str) -> Self {
        Self::new(vec![Ok(version.to_string())])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl VersionClient for FakeVersionClient {
    fn display_version(&self, _addr: &ServiceAddress) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let mut script = self.script.lock().unwrap();
        let next = if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        };

        match next {
            Some(Ok(version)) => Ok(version),
            Some(Err(reason)) => bail!(reason),
            None => bail!("sem resposta"),
        }
    }
}

/// Reports a port open until it has been probed `closes_after` times;
/// that probe and every later one see it closed.
#[derive(Debug)]
pub struct ScriptedPortProbe {
    closes_after: usize,
    calls: Mutex<HashMap<u16, usize>>,
}

impl ScriptedPortProbe {
    pub fn closing_after(closes_after: usize) -> Self {
        Self {
            closes_after,
            calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn always_closed() -> Self {
        Self::closing_after(0)
    }

    pub fn never_closing() -> Self {
        Self::closing_after(usize::MAX)
    }

    pub fn calls_for(&self, port: u16) -> usize {
        self.calls.lock().unwrap().get(&port).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

impl PortProbe for ScriptedPortProbe {
    fn is_open(&self, addr: &ServiceAddress) -> bool {
        let mut calls = self.calls.lock().unwrap();
        let count = calls.entry(addr.port).or_insert(0);
        *count += 1;
        *count < self.closes_after
    }
}

/// Every fake wired together. Keeps concrete handles so tests can script
/// and inspect them.
#[derive(Debug)]
pub struct TestRig {
    pub runtime: Arc<MockRuntime>,
    pub shell: Arc<FakeShell>,
    pub versions: Arc<FakeVersionClient>,
    pub port_probe: Arc<ScriptedPortProbe>,
    pub overlays: Arc<OverlayStager>,
}

impl TestRig {
    pub fn new() -> Self {
        Self::with_port_probe(ScriptedPortProbe::always_closed())
    }

    pub fn with_port_probe(port_probe: ScriptedPortProbe) -> Self {
        Self {
            runtime: Arc::new(MockRuntime::new()),
            shell: Arc::new(FakeShell::healthy()),
            versions: Arc::new(FakeVersionClient::ready("22.0.0")),
            port_probe: Arc::new(port_probe),
            overlays: Arc::new(OverlayStager::new(unique_temp_dir("testbed-overlays"))),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            runtime: self.runtime.clone(),
            shell: self.shell.clone(),
            versions: self.versions.clone(),
            port_probe: self.port_probe.clone(),
            overlays: self.overlays.clone(),
        }
    }
}

impl Default for TestRig {
    fn default() -> Self {
        Self::new()
    }
}

pub fn test_collaborators() -> (Collaborators, Arc<MockRuntime>) {
    let rig = TestRig::new();
    (rig.collaborators(), rig.runtime)
}

/// Config with short budgets and throwaway output directories.
pub fn test_config(name: &str, aliases: &[ServiceAlias]) -> EnvironmentConfig {
    let mut config = EnvironmentConfig::new(name, aliases.iter().copied());
    config.advertised_host = "127.0.0.1".to_string();
    config.kafka_partitions = 3;
    config.output_dir = unique_temp_dir("testbed-logs");
    config.overlay_root = unique_temp_dir("testbed-overlays");

    let quick = Wait::new(Duration::from_millis(500), Duration::from_millis(5));
    config.timeouts.socket = quick;
    config.timeouts.http = quick;
    config.timeouts.shell_connect = quick;
    config.timeouts.shell_round_trip = quick;
    config.timeouts.agent_ping = quick;
    config.timeouts.session_close = Duration::from_millis(500);
    config.teardown.stop_grace = Duration::ZERO;
    config.teardown.port_release = Wait::new(Duration::from_millis(500), Duration::from_millis(1));
    config
}

