use crate::domain::{ContainerRuntime, PortProbe, ServiceAddress, ServiceAlias};
use crate::error::TeardownWarning;
use crate::services::readiness::{Wait, await_condition};
use crate::services::registry::ContainerRegistry;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TeardownTimeouts {
    /// Grace period handed to every stop call before the runtime kills.
    pub stop_grace: Duration,
    /// Budget for a container's pinned ports to stop accepting connections.
    pub port_release: Wait,
}

impl Default for TeardownTimeouts {
    fn default() -> Self {
        Self {
            stop_grace: Duration::from_secs(5),
            port_release: Wait::new(Duration::from_secs(300), Duration::from_secs(5)),
        }
    }
}

/// Outcome of a teardown. Purely informational: nothing in here is ever
/// turned back into an error.
#[derive(Debug, Default)]
pub struct TeardownReport {
    pub logs: Vec<PathBuf>,
    pub removed: Vec<String>,
    pub warnings: Vec<TeardownWarning>,
    pub kept_running: bool,
}

impl TeardownReport {
    fn warn(&mut self, warning: TeardownWarning) {
        warn!("  {warning}");
        self.warnings.push(warning);
    }
}

/// Collects container output and takes containers down, best effort.
pub struct Harvester {
    runtime: Arc<dyn ContainerRuntime>,
    port_probe: Arc<dyn PortProbe>,
    env_name: String,
    output_dir: PathBuf,
    timeouts: TeardownTimeouts,
}

impl Harvester {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        port_probe: Arc<dyn PortProbe>,
        env_name: &str,
        output_dir: PathBuf,
        timeouts: TeardownTimeouts,
    ) -> Self {
        Self {
            runtime,
            port_probe,
            env_name: env_name.to_string(),
            output_dir,
            timeouts,
        }
    }

    /// Saves every container's output in creation order, then, unless
    /// `keep_running` is set, stops and removes them in reverse creation
    /// order and clears the registry.
    pub fn tear_down(&self, registry: &mut ContainerRegistry, keep_running: bool) -> TeardownReport {
        let mut report = TeardownReport::default();
        let order = registry.creation_order().to_vec();

        info!(" Coletando saída de {} container(s)...", order.len());
        for id in &order {
            self.harvest_logs(id, registry.alias_of(id), &mut report);
        }

        if keep_running {
            info!(" Mantendo containers rodando para inspeção");
            report.kept_running = true;
            return report;
        }

        for id in order.iter().rev() {
            let alias = registry.alias_of(id);
            let ports = alias.map(|a| registry.ports(a)).unwrap_or_default();
            self.dispose(id, alias, &ports, &mut report);
        }

        registry.clear();
        info!(" Ambiente '{}' removido", self.env_name);
        report
    }

    fn label(&self, id: &str, alias: Option<ServiceAlias>) -> String {
        alias.map(|a| a.to_string()).unwrap_or_else(|| id.to_string())
    }

    fn harvest_logs(&self, id: &str, alias: Option<ServiceAlias>, report: &mut TeardownReport) {
        let label = self.label(id, alias);

        let output = match self.runtime.container_logs(id) {
            Ok(output) => output,
            Err(e) => {
                report.warn(TeardownWarning::LogCapture {
                    container: label,
                    reason: format!("{e:#}"),
                });
                return;
            }
        };

        let path = self.output_dir.join(format!("{}.{label}.log", self.env_name));
        match fs::create_dir_all(&self.output_dir).and_then(|_| fs::write(&path, &output)) {
            Ok(()) => {
                debug!("Saída de {label} ({} bytes) em {:?}", output.len(), path);
                report.logs.push(path);
            }
            Err(e) => report.warn(TeardownWarning::LogPersist {
                container: label,
                reason: e.to_string(),
            }),
        }
    }

    fn dispose(
        &self,
        id: &str,
        alias: Option<ServiceAlias>,
        ports: &[u16],
        report: &mut TeardownReport,
    ) {
        let label = self.label(id, alias);
        info!(" Parando e removendo {label} ({id})");

        let grace = self.timeouts.stop_grace;
        if let Err(e) = self.runtime.stop_container(id, grace) {
            report.warn(TeardownWarning::Stop {
                container: label.clone(),
                reason: format!("{e:#}"),
            });
        }

        if !ports.is_empty() {
            let host = self.runtime.daemon_host();
            let addrs: Vec<ServiceAddress> = ports
                .iter()
                .map(|port| ServiceAddress::new(host.clone(), *port))
                .collect();
            let wait = self.timeouts.port_release;

            let mut first_poll = true;
            let released = await_condition(
                &format!("liberação das portas de {label}"),
                wait.timeout,
                wait.poll_interval,
                || {
                    if !first_poll {
                        if let Err(e) = self.runtime.stop_container(id, grace) {
                            debug!("Nova tentativa de parar {id} falhou: {e:#}");
                        }
                    }
                    first_poll = false;
                    Ok(self.open_ports(&addrs).is_empty().then_some(()))
                },
            );

            if let Err(e) = released {
                report.warn(TeardownWarning::PortsStillOpen {
                    container: label.clone(),
                    ports: self.open_ports(&addrs),
                    waited: e.elapsed,
                });
            }
        }

        match self.runtime.remove_container(id) {
            Ok(()) => report.removed.push(id.to_string()),
            Err(e) => report.warn(TeardownWarning::Remove {
                container: label,
                reason: format!("{e:#}"),
            }),
        }
    }

    /// Ports still accepting connections, probed in parallel.
    fn open_ports(&self, addrs: &[ServiceAddress]) -> Vec<u16> {
        thread::scope(|scope| {
            let probes: Vec<_> = addrs
                .iter()
                .map(|addr| scope.spawn(move || self.port_probe.is_open(addr)))
                .collect();

            addrs
                .iter()
                .zip(probes)
                .filter_map(|(addr, probe)| probe.join().unwrap_or(true).then_some(addr.port))
                .collect()
        })
    }
}
