use crate::domain::{
    ContainerRuntime, ContainerSpec, Credentials, ImageTable, ProbeKind, RemoteShell,
    ServiceAddress, ServiceAlias, VersionClient,
};
use crate::error::{EnvironmentError, Result};
use crate::infra::config::EnvironmentConfig;
use crate::services::environment::{Collaborators, resolve_service_address};
use crate::services::ports::{BROKER_PORT_RANGE, COORDINATOR_PORT_RANGE, find_free_port};
use crate::services::readiness::{
    ReadinessTimeouts, wait_for_agent, wait_for_shell, wait_for_socket, wait_for_version,
};
use crate::services::registry::{ContainerRecord, ContainerRegistry};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Fixed spawn order. Slow-booting infrastructure first, then the database,
/// the core server, the simulators and finally the agents that link to all
/// of them. The sentinel is spawned separately once the core server is ready.
pub const SPAWN_ORDER: [ServiceAlias; 12] = [
    ServiceAlias::EventBus,
    ServiceAlias::SearchIndex2,
    ServiceAlias::SearchIndex5,
    ServiceAlias::SearchIndex6,
    ServiceAlias::Database,
    ServiceAlias::CoreServer,
    ServiceAlias::SupportServer,
    ServiceAlias::JmxSim,
    ServiceAlias::TcpAgentSim,
    ServiceAlias::Agent,
    ServiceAlias::AgentSameLocation,
    ServiceAlias::AgentOtherLocation,
];

const READY_BEFORE_SENTINEL: [ServiceAlias; 6] = [
    ServiceAlias::Database,
    ServiceAlias::EventBus,
    ServiceAlias::SearchIndex2,
    ServiceAlias::SearchIndex5,
    ServiceAlias::SearchIndex6,
    ServiceAlias::CoreServer,
];

const READY_AFTER_SENTINEL: [ServiceAlias; 6] = [
    ServiceAlias::SupportServer,
    ServiceAlias::JmxSim,
    ServiceAlias::TcpAgentSim,
    ServiceAlias::Agent,
    ServiceAlias::AgentSameLocation,
    ServiceAlias::AgentOtherLocation,
];

/// Drives spawn and readiness for one environment.
///
/// Every step reads metadata written by earlier steps (container names for
/// links, pinned ports for agents), so everything runs sequentially on the
/// caller's thread.
pub struct Orchestrator {
    runtime: Arc<dyn ContainerRuntime>,
    shell: Arc<dyn RemoteShell>,
    versions: Arc<dyn VersionClient>,
    images: ImageTable,
    name: String,
    enabled: BTreeSet<ServiceAlias>,
    mounts: BTreeMap<ServiceAlias, Vec<String>>,
    kafka_partitions: u32,
    advertised_host: String,
    timeouts: ReadinessTimeouts,
    credentials: Credentials,
}

impl Orchestrator {
    pub fn new(
        config: &EnvironmentConfig,
        collaborators: &Collaborators,
        mounts: BTreeMap<ServiceAlias, Vec<String>>,
    ) -> Self {
        Self {
            runtime: collaborators.runtime.clone(),
            shell: collaborators.shell.clone(),
            versions: collaborators.versions.clone(),
            images: config.images.clone(),
            name: config.name.clone(),
            enabled: config.enabled.clone(),
            mounts,
            kafka_partitions: config.kafka_partitions,
            advertised_host: config.advertised_host.clone(),
            timeouts: config.timeouts,
            credentials: Credentials::default(),
        }
    }

    pub fn is_enabled(&self, alias: ServiceAlias) -> bool {
        self.enabled.contains(&alias)
    }

    /// Spawns every enabled alias and blocks until each one is ready.
    ///
    /// On error the registry still lists every container created so far, so
    /// the caller can tear them down.
    pub fn start(&self, registry: &mut ContainerRegistry) -> Result<()> {
        info!(" Subindo containers: {:?}", self.enabled);

        for alias in SPAWN_ORDER {
            self.spawn(alias, registry)?;
        }

        info!("ﱮ Aguardando containers ficarem prontos...");

        for alias in READY_BEFORE_SENTINEL {
            self.wait_for(alias, registry)?;
        }

        // The sentinel relies on side effects of the core server's first run.
        self.spawn(ServiceAlias::Sentinel, registry)?;
        self.wait_for(ServiceAlias::Sentinel, registry)?;

        for alias in READY_AFTER_SENTINEL {
            self.wait_for(alias, registry)?;
        }

        info!(" Ambiente '{}' pronto", self.name);
        Ok(())
    }

    /// Creates, starts and records the container for `alias`.
    ///
    /// Returns `Ok(false)` without touching the runtime when the alias is
    /// disabled or already has a record.
    pub fn spawn(&self, alias: ServiceAlias, registry: &mut ContainerRegistry) -> Result<bool> {
        if !self.is_enabled(alias) || registry.contains(alias) {
            return Ok(false);
        }

        for dependency in alias.hard_dependencies() {
            if !registry.contains(*dependency) {
                return Err(EnvironmentError::spawn(
                    alias,
                    format!("dependência '{dependency}' ainda não foi criada"),
                ));
            }
        }

        let spec = self.container_spec(alias, registry)?;
        let pinned: Vec<u16> = spec.port_bindings.iter().map(|(_, host)| *host).collect();

        debug!("Criando container para {alias} a partir de {}", spec.image);
        let id = self
            .runtime
            .create_container(&spec)
            .map_err(|e| EnvironmentError::spawn(alias, format!("{e:#}")))?;
        registry.track_created(&id);

        self.runtime
            .start_container(&id)
            .map_err(|e| EnvironmentError::spawn(alias, format!("{e:#}")))?;

        let info = self
            .runtime
            .inspect_container(&id)
            .map_err(|e| EnvironmentError::spawn(alias, format!("{e:#}")))?;
        info!(" Container de {alias}: {id}");

        if !info.running {
            return Err(EnvironmentError::spawn(
                alias,
                format!("container {id} não está rodando após o start"),
            ));
        }

        registry.insert(ContainerRecord { alias, id, info });
        if !pinned.is_empty() {
            registry.record_ports(alias, pinned);
        }

        Ok(true)
    }

    fn container_spec(
        &self,
        alias: ServiceAlias,
        registry: &ContainerRegistry,
    ) -> Result<ContainerSpec> {
        let mut spec = ContainerSpec {
            image: self.images.image_for(alias)?.to_string(),
            hostname: Some(format!("{}.local", self.name)),
            publish_all_ports: true,
            privileged: alias == ServiceAlias::CoreServer,
            volumes: self.mounts.get(&alias).cloned().unwrap_or_default(),
            links: links_for(alias, registry),
            ..ContainerSpec::default()
        };

        if alias == ServiceAlias::EventBus {
            let coordinator = find_free_port(COORDINATOR_PORT_RANGE)?;
            let broker = find_free_port(BROKER_PORT_RANGE)?;
            info!(" Portas do event bus: coordenador {coordinator}, broker {broker}");

            spec.publish_all_ports = false;
            spec.port_bindings = vec![(2181, coordinator), (9092, broker)];
            spec.env = vec![
                format!("ADVERTISED_HOST={}", self.advertised_host),
                format!("ADVERTISED_PORT={broker}"),
                format!("NUM_PARTITIONS={}", self.kafka_partitions),
            ];
        } else if alias.is_agent() {
            spec.env = self.agent_env(alias, registry);
        }

        Ok(spec)
    }

    fn agent_env(&self, alias: ServiceAlias, registry: &ContainerRegistry) -> Vec<String> {
        let location = match alias {
            ServiceAlias::AgentOtherLocation => "BANANA",
            _ => "MINION",
        };

        let mut env = vec![
            format!("MINION_ID={}-{alias}", self.name),
            format!("MINION_LOCATION={location}"),
            format!(
                "OPENNMS_HTTP_URL=http://{}:8980/opennms",
                ServiceAlias::CoreServer.link_name()
            ),
        ];

        let broker = registry
            .info(ServiceAlias::EventBus)
            .and_then(|info| info.binding(9092, "tcp"));
        if let Some(binding) = broker {
            env.push(format!(
                "KAFKA_BOOTSTRAP_SERVERS={}:{}",
                self.advertised_host, binding.host_port
            ));
        }

        env
    }

    /// Blocks until `alias` answers its readiness probe. Disabled aliases
    /// return immediately.
    pub fn wait_for(&self, alias: ServiceAlias, registry: &ContainerRegistry) -> Result<()> {
        if !self.is_enabled(alias) {
            return Ok(());
        }

        let t = &self.timeouts;
        match alias.probe() {
            ProbeKind::RawSocket { port } => {
                let addr = self.address(alias, port, registry)?;
                wait_for_socket(alias.as_str(), &addr, t.socket)?;
            }
            ProbeKind::HttpAndShell {
                http_port,
                shell_port,
            } => {
                let http = self.address(alias, http_port, registry)?;
                wait_for_version(self.versions.as_ref(), &http, t.http)?;
                info!(" Serviço REST de {alias} online");

                let ssh = self.address(alias, shell_port, registry)?;
                wait_for_shell(
                    self.shell.as_ref(),
                    &ssh,
                    &self.credentials,
                    t.shell_connect,
                    t.shell_round_trip,
                )?;
                info!(" Shell de {alias} online");
            }
            ProbeKind::ShellFeatures { port } => {
                let ssh = self.address(alias, port, registry)?;
                wait_for_shell(
                    self.shell.as_ref(),
                    &ssh,
                    &self.credentials,
                    t.shell_connect,
                    t.shell_round_trip,
                )?;
            }
            ProbeKind::ShellPing { port } => {
                let ssh = self.address(alias, port, registry)?;
                wait_for_agent(
                    self.shell.as_ref(),
                    &ssh,
                    &self.credentials,
                    t.agent_ping,
                    t.session_close,
                )?;
            }
            ProbeKind::None => debug!("{alias} não tem probe de prontidão"),
        }

        Ok(())
    }

    fn address(
        &self,
        alias: ServiceAlias,
        port: u16,
        registry: &ContainerRegistry,
    ) -> Result<ServiceAddress> {
        let info = registry.info(alias).ok_or_else(|| EnvironmentError::Lookup {
            alias,
            reason: "nenhum container registrado".to_string(),
        })?;
        resolve_service_address(alias, info, port, "tcp", &self.runtime.daemon_host())
    }
}

/// `--link` entries for every dependency of `alias` that has a container.
fn links_for(alias: ServiceAlias, registry: &ContainerRegistry) -> Vec<String> {
    let mut seen = BTreeSet::new();
    alias
        .hard_dependencies()
        .iter()
        .chain(alias.soft_dependencies())
        .filter_map(|dependency| registry.info(*dependency).map(|info| (dependency, info)))
        .filter(|(dependency, _)| seen.insert(dependency.link_name()))
        .map(|(dependency, info)| format!("{}:{}", info.short_name(), dependency.link_name()))
        .collect()
}
