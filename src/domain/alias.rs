use crate::error::EnvironmentError;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Symbolic name for a service role inside a test environment.
///
/// Aliases are decoupled from the identifiers the container runtime assigns,
/// so tests can always ask for "the database" regardless of which container
/// currently plays that role.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum,
)]
pub enum ServiceAlias {
    #[serde(rename = "database")]
    #[value(name = "database")]
    Database,
    #[serde(rename = "core-server")]
    #[value(name = "core-server")]
    CoreServer,
    #[serde(rename = "sentinel")]
    #[value(name = "sentinel")]
    Sentinel,
    #[serde(rename = "agent")]
    #[value(name = "agent")]
    Agent,
    #[serde(rename = "agent-same-location")]
    #[value(name = "agent-same-location")]
    AgentSameLocation,
    #[serde(rename = "agent-other-location")]
    #[value(name = "agent-other-location")]
    AgentOtherLocation,
    #[serde(rename = "support-server")]
    #[value(name = "support-server")]
    SupportServer,
    #[serde(rename = "search-index-2")]
    #[value(name = "search-index-2")]
    SearchIndex2,
    #[serde(rename = "search-index-5")]
    #[value(name = "search-index-5")]
    SearchIndex5,
    #[serde(rename = "search-index-6")]
    #[value(name = "search-index-6")]
    SearchIndex6,
    #[serde(rename = "event-bus")]
    #[value(name = "event-bus")]
    EventBus,
    #[serde(rename = "tcp-agent-sim")]
    #[value(name = "tcp-agent-sim")]
    TcpAgentSim,
    #[serde(rename = "jmx-sim")]
    #[value(name = "jmx-sim")]
    JmxSim,
}

/// How readiness is established for an alias once its container is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeKind {
    /// Connect to the published port and write a few bytes.
    RawSocket { port: u16 },
    /// Version lookup over HTTP, then an administrative shell session.
    HttpAndShell { http_port: u16, shell_port: u16 },
    /// Administrative shell session that lists installed features.
    ShellFeatures { port: u16 },
    /// Shell session that pings the upstream server.
    ShellPing { port: u16 },
    /// Accepted as ready once the container reports running.
    None,
}

impl ServiceAlias {
    pub const ALL: [ServiceAlias; 13] = [
        ServiceAlias::Database,
        ServiceAlias::CoreServer,
        ServiceAlias::Sentinel,
        ServiceAlias::Agent,
        ServiceAlias::AgentSameLocation,
        ServiceAlias::AgentOtherLocation,
        ServiceAlias::SupportServer,
        ServiceAlias::SearchIndex2,
        ServiceAlias::SearchIndex5,
        ServiceAlias::SearchIndex6,
        ServiceAlias::EventBus,
        ServiceAlias::TcpAgentSim,
        ServiceAlias::JmxSim,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Database => "database",
            Self::CoreServer => "core-server",
            Self::Sentinel => "sentinel",
            Self::Agent => "agent",
            Self::AgentSameLocation => "agent-same-location",
            Self::AgentOtherLocation => "agent-other-location",
            Self::SupportServer => "support-server",
            Self::SearchIndex2 => "search-index-2",
            Self::SearchIndex5 => "search-index-5",
            Self::SearchIndex6 => "search-index-6",
            Self::EventBus => "event-bus",
            Self::TcpAgentSim => "tcp-agent-sim",
            Self::JmxSim => "jmx-sim",
        }
    }

    pub fn default_image(&self) -> &'static str {
        match self {
            Self::Database => "postgres:9.5.1",
            Self::CoreServer => "stests/opennms",
            Self::Sentinel => "stests/sentinel",
            Self::Agent | Self::AgentSameLocation | Self::AgentOtherLocation => "stests/minion",
            Self::SupportServer => "stests/snmpd",
            Self::SearchIndex2 => "elasticsearch:2.4.6",
            Self::SearchIndex5 => "elasticsearch:5.6.9",
            Self::SearchIndex6 => "docker.elastic.co/elasticsearch/elasticsearch-oss:6.2.4",
            Self::EventBus => "spotify/kafka",
            Self::TcpAgentSim => "stests/tcp-agent-sim",
            Self::JmxSim => "stests/tomcat",
        }
    }

    /// Aliases that must have a registry record before this one may be spawned.
    pub fn hard_dependencies(&self) -> &'static [ServiceAlias] {
        match self {
            Self::CoreServer => &[Self::Database],
            Self::Sentinel => &[Self::Database, Self::CoreServer],
            Self::Agent | Self::AgentSameLocation | Self::AgentOtherLocation => &[Self::CoreServer],
            _ => &[],
        }
    }

    /// Aliases linked into this container only when they are enabled.
    pub fn soft_dependencies(&self) -> &'static [ServiceAlias] {
        match self {
            Self::CoreServer => &[
                Self::EventBus,
                Self::SearchIndex2,
                Self::SearchIndex5,
                Self::SearchIndex6,
            ],
            Self::Agent | Self::AgentSameLocation | Self::AgentOtherLocation => &[
                Self::SupportServer,
                Self::JmxSim,
                Self::TcpAgentSim,
                Self::EventBus,
            ],
            _ => &[],
        }
    }

    /// Hostname under which dependents reach this container through a link.
    pub fn link_name(&self) -> &'static str {
        match self {
            Self::Database => "postgres",
            Self::CoreServer => "opennms",
            Self::Sentinel => "sentinel",
            Self::Agent => "minion",
            Self::AgentSameLocation => "minion-same-location",
            Self::AgentOtherLocation => "minion-other-location",
            Self::SupportServer => "snmpd",
            Self::SearchIndex2 | Self::SearchIndex5 | Self::SearchIndex6 => "elasticsearch",
            Self::EventBus => "kafka",
            Self::TcpAgentSim => "tcp-agent-sim",
            Self::JmxSim => "tomcat",
        }
    }

    pub fn is_agent(&self) -> bool {
        matches!(
            self,
            Self::Agent | Self::AgentSameLocation | Self::AgentOtherLocation
        )
    }

    pub fn probe(&self) -> ProbeKind {
        match self {
            Self::Database => ProbeKind::RawSocket { port: 5432 },
            Self::EventBus => ProbeKind::RawSocket { port: 9092 },
            Self::SearchIndex2 | Self::SearchIndex5 | Self::SearchIndex6 => {
                ProbeKind::RawSocket { port: 9200 }
            }
            Self::CoreServer => ProbeKind::HttpAndShell {
                http_port: 8980,
                shell_port: 8101,
            },
            Self::Sentinel => ProbeKind::ShellFeatures { port: 8301 },
            Self::Agent | Self::AgentSameLocation | Self::AgentOtherLocation => {
                ProbeKind::ShellPing { port: 8201 }
            }
            Self::SupportServer | Self::TcpAgentSim | Self::JmxSim => ProbeKind::None,
        }
    }

    /// Aliases started when a caller does not ask for anything specific.
    pub fn defaults() -> BTreeSet<ServiceAlias> {
        [
            Self::CoreServer,
            Self::Agent,
            Self::SupportServer,
            Self::JmxSim,
        ]
        .into_iter()
        .collect()
    }

    /// Expands a requested set with every transitive hard dependency.
    ///
    /// An empty request yields the default set.
    pub fn normalize(requested: &BTreeSet<ServiceAlias>) -> BTreeSet<ServiceAlias> {
        let mut pending: Vec<ServiceAlias> = if requested.is_empty() {
            Self::defaults().into_iter().collect()
        } else {
            requested.iter().copied().collect()
        };

        let mut enabled = BTreeSet::new();
        while let Some(alias) = pending.pop() {
            if enabled.insert(alias) {
                pending.extend_from_slice(alias.hard_dependencies());
            }
        }
        enabled
    }
}

impl fmt::Display for ServiceAlias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceAlias {
    type Err = EnvironmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|alias| alias.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| EnvironmentError::Configuration(format!("alias desconhecido: '{s}'")))
    }
}

/// Immutable alias → image reference table, built once per process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageTable {
    images: BTreeMap<ServiceAlias, String>,
}

impl ImageTable {
    pub fn defaults() -> Self {
        Self::from_entries(
            ServiceAlias::ALL
                .iter()
                .map(|alias| (*alias, alias.default_image().to_string())),
        )
    }

    pub fn from_entries(entries: impl IntoIterator<Item = (ServiceAlias, String)>) -> Self {
        Self {
            images: entries.into_iter().collect(),
        }
    }

    /// Default table with the given aliases pointed at other images.
    pub fn with_overrides(
        overrides: &BTreeMap<ServiceAlias, String>,
    ) -> Result<Self, EnvironmentError> {
        let mut table = Self::defaults();
        for (alias, image) in overrides {
            if image.trim().is_empty() {
                return Err(EnvironmentError::Configuration(format!(
                    "imagem vazia configurada para '{alias}'"
                )));
            }
            table.images.insert(*alias, image.clone());
        }
        Ok(table)
    }

    pub fn image_for(&self, alias: ServiceAlias) -> Result<&str, EnvironmentError> {
        self.images
            .get(&alias)
            .map(String::as_str)
            .ok_or_else(|| {
                EnvironmentError::Configuration(format!("nenhuma imagem mapeada para '{alias}'"))
            })
    }
}

impl Default for ImageTable {
    fn default() -> Self {
        Self::defaults()
    }
}
