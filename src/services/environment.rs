use crate::domain::{
    ContainerInfo, ContainerRuntime, PortProbe, RemoteShell, ServiceAddress, ServiceAlias,
    VersionClient, is_wildcard_host,
};
use crate::error::{EnvironmentError, Result};
use crate::infra::config::EnvironmentConfig;
use crate::infra::overlay::OverlayStager;
use crate::services::orchestrator::Orchestrator;
use crate::services::registry::ContainerRegistry;
use crate::services::teardown::{Harvester, TeardownReport};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn};

/// What tests get to ask an environment, however it was obtained.
pub trait TestEnvironment {
    fn container_info(&self, alias: ServiceAlias) -> Option<&ContainerInfo>;

    fn aliases(&self) -> Vec<ServiceAlias>;

    /// Address substituted for bindings on the wildcard interface.
    fn daemon_host(&self) -> String;

    fn service_address(&self, alias: ServiceAlias, port: u16) -> Result<ServiceAddress> {
        self.service_address_for(alias, port, "tcp")
    }

    fn service_address_for(
        &self,
        alias: ServiceAlias,
        port: u16,
        protocol: &str,
    ) -> Result<ServiceAddress> {
        let info = self
            .container_info(alias)
            .ok_or_else(|| EnvironmentError::Lookup {
                alias,
                reason: "nenhum container com esse alias".to_string(),
            })?;
        resolve_service_address(alias, info, port, protocol, &self.daemon_host())
    }
}

/// Maps an internal `port/protocol` to the address reachable from outside
/// the container, using the daemon host for wildcard bindings.
pub fn resolve_service_address(
    alias: ServiceAlias,
    info: &ContainerInfo,
    port: u16,
    protocol: &str,
    daemon_host: &str,
) -> Result<ServiceAddress> {
    let binding = info
        .binding(port, protocol)
        .ok_or_else(|| EnvironmentError::Lookup {
            alias,
            reason: format!(
                "nenhum binding para {port}/{protocol} em {}",
                info.short_name()
            ),
        })?;

    let host = if is_wildcard_host(&binding.host_ip) {
        daemon_host.to_string()
    } else {
        binding.host_ip.clone()
    };

    Ok(ServiceAddress::new(host, binding.host_port))
}

/// External services an environment talks to.
#[derive(Debug, Clone)]
pub struct Collaborators {
    pub runtime: Arc<dyn ContainerRuntime>,
    pub shell: Arc<dyn RemoteShell>,
    pub versions: Arc<dyn VersionClient>,
    pub port_probe: Arc<dyn PortProbe>,
    pub overlays: Arc<OverlayStager>,
}

/// An environment whose containers were created by this process.
///
/// Owns the registry. Teardown runs on [`finish`](Self::finish) or, failing
/// that, on drop.
pub struct ProvisionedEnvironment {
    config: EnvironmentConfig,
    runtime: Arc<dyn ContainerRuntime>,
    registry: ContainerRegistry,
    harvester: Harvester,
    finished: bool,
}

impl ProvisionedEnvironment {
    /// Spawns every enabled alias and waits for readiness.
    ///
    /// When setup fails, whatever was created is torn down (unless teardown
    /// is skipped by config) before the error is returned.
    pub fn provision(config: EnvironmentConfig, collaborators: &Collaborators) -> Result<Self> {
        let harvester = Harvester::new(
            collaborators.runtime.clone(),
            collaborators.port_probe.clone(),
            &config.name,
            config.output_dir.clone(),
            config.teardown,
        );

        let mut env = Self {
            runtime: collaborators.runtime.clone(),
            registry: ContainerRegistry::new(),
            harvester,
            finished: false,
            config,
        };

        let started = stage_mounts(&env.config, &collaborators.overlays).and_then(|mounts| {
            Orchestrator::new(&env.config, collaborators, mounts).start(&mut env.registry)
        });

        if let Err(e) = started {
            error!(" Falha ao montar o ambiente '{}': {e}", env.config.name);
            env.finish();
            return Err(e);
        }

        Ok(env)
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn registry(&self) -> &ContainerRegistry {
        &self.registry
    }

    /// Harvests logs and, unless teardown is skipped, removes every container.
    /// Calling it again is a no-op.
    pub fn finish(&mut self) -> TeardownReport {
        if self.finished {
            return TeardownReport::default();
        }
        self.finished = true;
        self.harvester
            .tear_down(&mut self.registry, self.config.skip_teardown)
    }
}

impl TestEnvironment for ProvisionedEnvironment {
    fn container_info(&self, alias: ServiceAlias) -> Option<&ContainerInfo> {
        self.registry.info(alias)
    }

    fn aliases(&self) -> Vec<ServiceAlias> {
        self.registry.aliases()
    }

    fn daemon_host(&self) -> String {
        self.runtime.daemon_host()
    }
}

impl Drop for ProvisionedEnvironment {
    fn drop(&mut self) {
        if !self.finished {
            self.finish();
        }
    }
}

/// Stages overlay directories for the enabled aliases that take one.
fn stage_mounts(
    config: &EnvironmentConfig,
    stager: &OverlayStager,
) -> Result<BTreeMap<ServiceAlias, Vec<String>>> {
    let mut mounts = BTreeMap::new();
    for alias in &config.enabled {
        let source = config.overlays.get(alias).map(|path| path.as_path());
        let staged = stager
            .stage(&config.name, *alias, source)
            .map_err(|e| EnvironmentError::spawn(*alias, format!("{e:#}")))?;
        if !staged.is_empty() {
            mounts.insert(*alias, staged);
        }
    }
    Ok(mounts)
}

/// Stand-in for an environment provisioned by somebody else.
///
/// Containers are looked up by the names listed in config and inspected
/// once; nothing is created, stopped or removed.
pub struct ExistingEnvironment {
    runtime: Arc<dyn ContainerRuntime>,
    containers: BTreeMap<ServiceAlias, ContainerInfo>,
}

impl ExistingEnvironment {
    pub fn attach(config: &EnvironmentConfig, runtime: Arc<dyn ContainerRuntime>) -> Result<Self> {
        let mut containers = BTreeMap::new();

        for (alias, name) in &config.existing {
            if !config.enabled.contains(alias) {
                warn!("  {alias} não está habilitado, ignorando container {name}");
                continue;
            }

            let info = runtime
                .inspect_container(name)
                .map_err(|e| EnvironmentError::Lookup {
                    alias: *alias,
                    reason: format!("{e:#}"),
                })?;
            info!(" Usando container existente {name} para {alias}");
            containers.insert(*alias, info);
        }

        Ok(Self {
            runtime,
            containers,
        })
    }
}

impl TestEnvironment for ExistingEnvironment {
    fn container_info(&self, alias: ServiceAlias) -> Option<&ContainerInfo> {
        self.containers.get(&alias)
    }

    fn aliases(&self) -> Vec<ServiceAlias> {
        self.containers.keys().copied().collect()
    }

    fn daemon_host(&self) -> String {
        self.runtime.daemon_host()
    }
}
