use crate::domain::{ImageTable, ServiceAlias};
use crate::error::EnvironmentError;
use crate::infra::net::non_local_address;
use crate::services::{ReadinessTimeouts, TeardownTimeouts, Wait};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_TESTBED_TOML_NAME: &str = "testbed.toml";
pub const DEFAULT_TESTBED_TOML: &str = include_str!("../../config/default_testbed.toml");

pub const DEFAULT_ENVIRONMENT_NAME: &str = "testbed";
pub const DEFAULT_KAFKA_PARTITIONS: u32 = 3;
pub const DEFAULT_OUTPUT_DIR: &str = "target/logs";
pub const DEFAULT_OVERLAY_ROOT: &str = "target/overlays";

pub fn default_config_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".config/testbed")
}

pub fn ensure_config_dir(config_dir: &Path) -> Result<()> {
    fs::create_dir_all(config_dir).with_context(|| format!("criando {:?}", config_dir))
}

/// Writes the default `testbed.toml` unless one is already there.
/// Returns whether a file was written.
pub fn install_default_config(target_dir: &Path) -> Result<bool> {
    ensure_config_dir(target_dir)?;

    let target = target_dir.join(DEFAULT_TESTBED_TOML_NAME);
    if target.exists() {
        return Ok(false);
    }

    fs::write(&target, DEFAULT_TESTBED_TOML)
        .with_context(|| format!("escrevendo template em {:?}", target))?;
    Ok(true)
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct EnvironmentSection {
    pub name: Option<String>,
    pub aliases: Option<Vec<String>>,
    pub skip_teardown: Option<bool>,
    pub use_existing: Option<bool>,
    pub kafka_partitions: Option<u32>,
    pub advertised_host: Option<String>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct PathsConfig {
    pub output_dir: Option<String>,
    pub overlay_root: Option<String>,
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct WaitConfig {
    pub timeout: Option<String>,
    pub poll: Option<String>,
}

impl WaitConfig {
    fn merge(&mut self, other: WaitConfig) {
        if other.timeout.is_some() {
            self.timeout = other.timeout;
        }
        if other.poll.is_some() {
            self.poll = other.poll;
        }
    }

    fn apply(&self, base: Wait) -> std::result::Result<Wait, EnvironmentError> {
        Ok(Wait {
            timeout: optional_duration(self.timeout.as_deref())?.unwrap_or(base.timeout),
            poll_interval: optional_duration(self.poll.as_deref())?.unwrap_or(base.poll_interval),
        })
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct TimeoutsConfig {
    #[serde(default)]
    pub socket: WaitConfig,
    #[serde(default)]
    pub http: WaitConfig,
    #[serde(default)]
    pub shell_connect: WaitConfig,
    #[serde(default)]
    pub shell_round_trip: WaitConfig,
    #[serde(default)]
    pub agent_ping: WaitConfig,
    #[serde(default)]
    pub port_release: WaitConfig,
    pub session_close: Option<String>,
    pub stop_grace: Option<String>,
}

/// Raw, partially filled configuration as read from one TOML file.
#[derive(Deserialize, Debug, Default, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub environment: EnvironmentSection,
    #[serde(default)]
    pub paths: PathsConfig,
    /// Overlay source directory per alias, as `[overlays] core-server = "..."`
    #[serde(default)]
    pub overlays: BTreeMap<String, String>,
    /// Image overrides per alias
    #[serde(default)]
    pub images: BTreeMap<String, String>,
    /// Container names to attach to when `use_existing` is set
    #[serde(default)]
    pub existing: BTreeMap<String, String>,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
}

impl AppConfig {
    /// Merges another AppConfig into self.
    /// Values from `other` overwrite values in `self` if present.
    pub fn merge(&mut self, other: AppConfig) {
        let env = other.environment;
        if env.name.is_some() {
            self.environment.name = env.name;
        }
        if env.aliases.is_some() {
            self.environment.aliases = env.aliases;
        }
        if env.skip_teardown.is_some() {
            self.environment.skip_teardown = env.skip_teardown;
        }
        if env.use_existing.is_some() {
            self.environment.use_existing = env.use_existing;
        }
        if env.kafka_partitions.is_some() {
            self.environment.kafka_partitions = env.kafka_partitions;
        }
        if env.advertised_host.is_some() {
            self.environment.advertised_host = env.advertised_host;
        }

        if other.paths.output_dir.is_some() {
            self.paths.output_dir = other.paths.output_dir;
        }
        if other.paths.overlay_root.is_some() {
            self.paths.overlay_root = other.paths.overlay_root;
        }

        // Per-alias tables: entries with the same alias overwrite
        self.overlays.extend(other.overlays);
        self.images.extend(other.images);
        self.existing.extend(other.existing);

        let t = other.timeouts;
        self.timeouts.socket.merge(t.socket);
        self.timeouts.http.merge(t.http);
        self.timeouts.shell_connect.merge(t.shell_connect);
        self.timeouts.shell_round_trip.merge(t.shell_round_trip);
        self.timeouts.agent_ping.merge(t.agent_ping);
        self.timeouts.port_release.merge(t.port_release);
        if t.session_close.is_some() {
            self.timeouts.session_close = t.session_close;
        }
        if t.stop_grace.is_some() {
            self.timeouts.stop_grace = t.stop_grace;
        }
    }

    /// Validates every value and fills in defaults.
    pub fn into_environment_config(self) -> std::result::Result<EnvironmentConfig, EnvironmentError> {
        let name = self
            .environment
            .name
            .unwrap_or_else(|| DEFAULT_ENVIRONMENT_NAME.to_string());
        validate_name(&name)?;

        let requested = self
            .environment
            .aliases
            .unwrap_or_default()
            .iter()
            .map(|a| a.parse::<ServiceAlias>())
            .collect::<std::result::Result<BTreeSet<_>, _>>()?;

        let overlays = parse_alias_keys(self.overlays)?
            .into_iter()
            .map(|(alias, path)| (alias, expand_path(&path)))
            .collect();

        let images = ImageTable::with_overrides(&parse_alias_keys(self.images)?)?;
        let existing = parse_alias_keys(self.existing)?;

        let kafka_partitions = self
            .environment
            .kafka_partitions
            .unwrap_or(DEFAULT_KAFKA_PARTITIONS);
        if kafka_partitions == 0 {
            return Err(EnvironmentError::Configuration(
                "kafka_partitions deve ser maior que zero".to_string(),
            ));
        }

        let t = &self.timeouts;
        let base = ReadinessTimeouts::default();
        let timeouts = ReadinessTimeouts {
            socket: t.socket.apply(base.socket)?,
            http: t.http.apply(base.http)?,
            shell_connect: t.shell_connect.apply(base.shell_connect)?,
            shell_round_trip: t.shell_round_trip.apply(base.shell_round_trip)?,
            agent_ping: t.agent_ping.apply(base.agent_ping)?,
            session_close: optional_duration(t.session_close.as_deref())?
                .unwrap_or(base.session_close),
        };

        let base_teardown = TeardownTimeouts::default();
        let teardown = TeardownTimeouts {
            stop_grace: optional_duration(t.stop_grace.as_deref())?
                .unwrap_or(base_teardown.stop_grace),
            port_release: t.port_release.apply(base_teardown.port_release)?,
        };

        let advertised_host = self
            .environment
            .advertised_host
            .unwrap_or_else(|| non_local_address().to_string());

        Ok(EnvironmentConfig {
            name,
            enabled: ServiceAlias::normalize(&requested),
            overlays,
            skip_teardown: self.environment.skip_teardown.unwrap_or(false),
            use_existing: self.environment.use_existing.unwrap_or(false),
            kafka_partitions,
            output_dir: expand_path(self.paths.output_dir.as_deref().unwrap_or(DEFAULT_OUTPUT_DIR)),
            overlay_root: expand_path(
                self.paths
                    .overlay_root
                    .as_deref()
                    .unwrap_or(DEFAULT_OVERLAY_ROOT),
            ),
            images,
            timeouts,
            teardown,
            existing,
            advertised_host,
        })
    }
}

/// Fully resolved settings for one environment.
#[derive(Debug, Clone)]
pub struct EnvironmentConfig {
    /// Used for the container hostname, agent ids and log file names.
    pub name: String,
    /// Normalized: never empty, closed under hard dependencies.
    pub enabled: BTreeSet<ServiceAlias>,
    pub overlays: BTreeMap<ServiceAlias, PathBuf>,
    /// Leave containers running after logs are harvested.
    pub skip_teardown: bool,
    pub use_existing: bool,
    pub kafka_partitions: u32,
    pub output_dir: PathBuf,
    pub overlay_root: PathBuf,
    pub images: ImageTable,
    pub timeouts: ReadinessTimeouts,
    pub teardown: TeardownTimeouts,
    pub existing: BTreeMap<ServiceAlias, String>,
    pub advertised_host: String,
}

impl EnvironmentConfig {
    /// Defaults for `aliases`, normalized. An empty list means the default set.
    pub fn new(name: impl Into<String>, aliases: impl IntoIterator<Item = ServiceAlias>) -> Self {
        let requested: BTreeSet<ServiceAlias> = aliases.into_iter().collect();
        Self {
            name: name.into(),
            enabled: ServiceAlias::normalize(&requested),
            overlays: BTreeMap::new(),
            skip_teardown: false,
            use_existing: false,
            kafka_partitions: DEFAULT_KAFKA_PARTITIONS,
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            overlay_root: PathBuf::from(DEFAULT_OVERLAY_ROOT),
            images: ImageTable::defaults(),
            timeouts: ReadinessTimeouts::default(),
            teardown: TeardownTimeouts::default(),
            existing: BTreeMap::new(),
            advertised_host: non_local_address().to_string(),
        }
    }

    pub fn is_enabled(&self, alias: ServiceAlias) -> bool {
        self.enabled.contains(&alias)
    }
}

pub fn load_app_config(config_dir: &Path) -> Result<AppConfig> {
    load_app_config_from(config_dir, Path::new("./"))
}

/// Reads the global config in `config_dir`, then merges the one in
/// `local_dir` over it. Missing files are skipped.
pub fn load_app_config_from(config_dir: &Path, local_dir: &Path) -> Result<AppConfig> {
    let mut app_config = AppConfig::default();

    let global_config_path = config_dir.join(DEFAULT_TESTBED_TOML_NAME);
    if global_config_path.exists() {
        app_config = read_app_config(&global_config_path)
            .with_context(|| format!("config global em {:?}", global_config_path))?;
        debug!("Config global carregada de {:?}", global_config_path);
    }

    let local_config_path = local_dir.join(DEFAULT_TESTBED_TOML_NAME);
    if local_config_path.exists() {
        let local_app_config = read_app_config(&local_config_path)
            .with_context(|| format!("config local em {:?}", local_config_path))?;
        info!("  Usando config local {:?}", local_config_path);
        app_config.merge(local_app_config);
    }

    Ok(app_config)
}

pub fn load_environment_config(config_dir: &Path) -> Result<EnvironmentConfig> {
    Ok(load_app_config(config_dir)?.into_environment_config()?)
}

fn read_app_config(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path).with_context(|| format!("lendo {:?}", path))?;
    toml::from_str(&content).with_context(|| format!("parse de {:?}", path))
}

/// Parses `"250ms"`, `"10s"` or `"5m"`.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if let Some(stripped) = s.strip_suffix("ms") {
        let millis: u64 = stripped.trim().parse()?;
        Ok(Duration::from_millis(millis))
    } else if let Some(stripped) = s.strip_suffix('s') {
        let secs: u64 = stripped.trim().parse()?;
        Ok(Duration::from_secs(secs))
    } else if let Some(stripped) = s.strip_suffix('m') {
        let mins: u64 = stripped.trim().parse()?;
        let secs = mins
            .checked_mul(60)
            .ok_or_else(|| anyhow::anyhow!("Duração grande demais: {}", s))?;
        Ok(Duration::from_secs(secs))
    } else {
        Err(anyhow::anyhow!("Formato de duração inválido: {}", s))
    }
}

fn optional_duration(value: Option<&str>) -> std::result::Result<Option<Duration>, EnvironmentError> {
    value
        .map(|v| parse_duration(v).map_err(|e| EnvironmentError::Configuration(format!("'{v}': {e}"))))
        .transpose()
}

fn parse_alias_keys<V>(
    table: BTreeMap<String, V>,
) -> std::result::Result<BTreeMap<ServiceAlias, V>, EnvironmentError> {
    table
        .into_iter()
        .map(|(key, value)| Ok((key.parse::<ServiceAlias>()?, value)))
        .collect()
}

fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).into_owned())
}

/// The name ends up in a hostname, so it follows container name rules.
fn validate_name(name: &str) -> std::result::Result<(), EnvironmentError> {
    let invalid = |reason: String| Err(EnvironmentError::Configuration(reason));

    let Some(first_char) = name.chars().next() else {
        return invalid("nome do ambiente vazio".to_string());
    };
    if !first_char.is_ascii_alphanumeric() {
        return invalid(format!(
            "nome do ambiente '{name}' deve começar com letra ou número"
        ));
    }
    if let Some(c) = name
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && *c != '-' && *c != '_')
    {
        return invalid(format!(
            "nome do ambiente '{name}' contém caractere inválido '{c}'"
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let toml = r#"
[environment]
name = "smoke"
aliases = ["sentinel", "event-bus"]
kafka_partitions = 6
advertised_host = "10.0.0.5"

[paths]
output_dir = "/tmp/testbed-logs"

[overlays]
core-server = "/tmp/overlay"

[images]
database = "postgres:16"

[timeouts]
stop_grace = "2s"

[timeouts.socket]
timeout = "30s"
poll = "500ms"
"#;

        let config: AppConfig = toml::from_str(toml).unwrap();
        let env = config.into_environment_config().unwrap();

        assert_eq!(env.name, "smoke");
        assert!(env.is_enabled(ServiceAlias::Sentinel));
        assert!(env.is_enabled(ServiceAlias::CoreServer));
        assert!(env.is_enabled(ServiceAlias::Database));
        assert!(env.is_enabled(ServiceAlias::EventBus));
        assert!(!env.is_enabled(ServiceAlias::Agent));
        assert_eq!(env.kafka_partitions, 6);
        assert_eq!(env.advertised_host, "10.0.0.5");
        assert_eq!(env.output_dir, PathBuf::from("/tmp/testbed-logs"));
        assert_eq!(env.overlay_root, PathBuf::from(DEFAULT_OVERLAY_ROOT));
        assert_eq!(
            env.overlays.get(&ServiceAlias::CoreServer),
            Some(&PathBuf::from("/tmp/overlay"))
        );
        assert_eq!(env.images.image_for(ServiceAlias::Database).unwrap(), "postgres:16");
        assert_eq!(env.timeouts.socket.timeout, Duration::from_secs(30));
        assert_eq!(env.timeouts.socket.poll_interval, Duration::from_millis(500));
        assert_eq!(env.timeouts.http, ReadinessTimeouts::default().http);
        assert_eq!(env.teardown.stop_grace, Duration::from_secs(2));
    }

    #[test]
    fn empty_config_uses_defaults() {
        let env = AppConfig::default().into_environment_config().unwrap();

        assert_eq!(env.name, DEFAULT_ENVIRONMENT_NAME);
        assert_eq!(env.enabled, ServiceAlias::normalize(&BTreeSet::new()));
        assert_eq!(env.kafka_partitions, DEFAULT_KAFKA_PARTITIONS);
        assert!(!env.skip_teardown);
        assert!(!env.use_existing);
        assert_eq!(env.timeouts, ReadinessTimeouts::default());
        assert_eq!(env.teardown, TeardownTimeouts::default());
    }

    #[test]
    fn rejects_unknown_alias() {
        let toml = r#"
[environment]
aliases = ["database", "kafka"]
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        let err = config.into_environment_config().unwrap_err();
        assert!(err.to_string().contains("kafka"));
    }

    #[test]
    fn rejects_unknown_alias_in_tables() {
        let toml = r#"
[images]
redis = "redis:7"
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        assert!(config.into_environment_config().is_err());
    }

    #[test]
    fn rejects_bad_duration() {
        let toml = r#"
[timeouts.http]
timeout = "5h"
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        let err = config.into_environment_config().unwrap_err();
        assert!(matches!(err, EnvironmentError::Configuration(_)));
    }

    #[test]
    fn rejects_invalid_name() {
        let mut config = AppConfig::default();
        config.environment.name = Some("meu ambiente".to_string());
        assert!(config.into_environment_config().is_err());

        let mut config = AppConfig::default();
        config.environment.name = Some(String::new());
        assert!(config.into_environment_config().is_err());
    }

    #[test]
    fn rejects_zero_partitions() {
        let mut config = AppConfig::default();
        config.environment.kafka_partitions = Some(0);
        assert!(config.into_environment_config().is_err());
    }

    #[test]
    fn merge_overrides_scalars_and_extends_tables() {
        let mut base: AppConfig = toml::from_str(
            r#"
[environment]
name = "global"
skip_teardown = true

[images]
database = "postgres:15"
jmx-sim = "tomcat:9"

[timeouts.agent_ping]
timeout = "1m"
poll = "2s"
"#,
        )
        .unwrap();

        let local: AppConfig = toml::from_str(
            r#"
[environment]
name = "local"

[images]
database = "postgres:16"

[timeouts.agent_ping]
poll = "1s"
"#,
        )
        .unwrap();

        base.merge(local);

        assert_eq!(base.environment.name.as_deref(), Some("local"));
        assert_eq!(base.environment.skip_teardown, Some(true));
        assert_eq!(base.images.get("database").unwrap(), "postgres:16");
        assert_eq!(base.images.get("jmx-sim").unwrap(), "tomcat:9");
        assert_eq!(
            base.timeouts.agent_ping,
            WaitConfig {
                timeout: Some("1m".to_string()),
                poll: Some("1s".to_string()),
            }
        );
    }

    #[test]
    fn parses_durations() {
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration(" 10s ").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("xs").is_err());
    }

    #[test]
    fn rejects_minutes_that_overflow() {
        let err = parse_duration("307445734561825861m").unwrap_err();
        assert!(err.to_string().contains("grande demais"));

        let mut config = AppConfig::default();
        config.timeouts.socket.timeout = Some("307445734561825861m".to_string());
        assert!(matches!(
            config.into_environment_config(),
            Err(EnvironmentError::Configuration(_))
        ));
    }

    #[test]
    fn expands_tilde_in_paths() {
        let mut config = AppConfig::default();
        config.paths.overlay_root = Some("~/overlays".to_string());
        let env = config.into_environment_config().unwrap();
        assert!(!env.overlay_root.starts_with("~"));
    }

    #[test]
    fn loads_global_then_local() {
        let global = tempfile::tempdir().unwrap();
        let local = tempfile::tempdir().unwrap();
        fs::write(
            global.path().join(DEFAULT_TESTBED_TOML_NAME),
            "[environment]\nname = \"global\"\nkafka_partitions = 2\n",
        )
        .unwrap();
        fs::write(
            local.path().join(DEFAULT_TESTBED_TOML_NAME),
            "[environment]\nname = \"local\"\n",
        )
        .unwrap();

        let config = load_app_config_from(global.path(), local.path()).unwrap();
        assert_eq!(config.environment.name.as_deref(), Some("local"));
        assert_eq!(config.environment.kafka_partitions, Some(2));
    }

    #[test]
    fn reports_parse_errors_with_path() {
        let global = tempfile::tempdir().unwrap();
        let local = tempfile::tempdir().unwrap();
        fs::write(global.path().join(DEFAULT_TESTBED_TOML_NAME), "[environment\n").unwrap();

        let err = load_app_config_from(global.path(), local.path()).unwrap_err();
        assert!(format!("{err:#}").contains(DEFAULT_TESTBED_TOML_NAME));
    }

    #[test]
    fn installs_default_config_once() {
        let temp = tempfile::tempdir().unwrap();
        let target = temp.path().join("cfg");

        assert!(install_default_config(&target).unwrap());
        assert!(!install_default_config(&target).unwrap());

        let installed: AppConfig =
            toml::from_str(&fs::read_to_string(target.join(DEFAULT_TESTBED_TOML_NAME)).unwrap())
                .unwrap();
        assert!(installed.into_environment_config().is_ok());
    }
}
