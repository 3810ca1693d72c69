use crate::cli::production_collaborators;
use crate::domain::ServiceAlias;
use crate::infra::config::{EnvironmentConfig, load_app_config};
use crate::services::{ExistingEnvironment, ProvisionedEnvironment, TeardownReport, TestEnvironment};
use anyhow::{Context, Result};
use clap::Args;
use std::io::{self, BufRead};
use std::path::Path;
use tracing::info;

#[derive(Args, Debug, Default)]
pub struct UpOptions {
    /// Aliases a subir (repetível). Sem nenhum, usa o conjunto padrão
    #[arg(short, long = "alias", value_enum)]
    pub aliases: Vec<ServiceAlias>,
    /// Nome do ambiente (hostname, ids dos agentes, nomes de log)
    #[arg(long)]
    pub name: Option<String>,
    /// Mantém os containers rodando ao sair
    #[arg(long)]
    pub keep_running: bool,
    /// Usa containers já existentes listados em [existing]
    #[arg(long)]
    pub existing: bool,
    /// Derruba o ambiente assim que ficar pronto
    #[arg(long)]
    pub no_wait: bool,
    /// Binário do runtime de containers
    #[arg(long, env = "TESTBED_RUNTIME", default_value = "docker")]
    pub runtime: String,
}

/// Loads config and applies the command line on top of it.
pub fn resolve_config(options: &UpOptions, config_dir: &Path) -> Result<EnvironmentConfig> {
    let mut app_config = load_app_config(config_dir)?;

    if !options.aliases.is_empty() {
        app_config.environment.aliases =
            Some(options.aliases.iter().map(|a| a.to_string()).collect());
    }
    if let Some(name) = &options.name {
        app_config.environment.name = Some(name.clone());
    }
    if options.keep_running {
        app_config.environment.skip_teardown = Some(true);
    }
    if options.existing {
        app_config.environment.use_existing = Some(true);
    }

    Ok(app_config.into_environment_config()?)
}

pub fn run(options: UpOptions, config_dir: &Path) -> Result<()> {
    let config = resolve_config(&options, config_dir)?;
    let collaborators = production_collaborators(&config, &options.runtime)?;

    if config.use_existing {
        let env = ExistingEnvironment::attach(&config, collaborators.runtime.clone())?;
        print_addresses(&env);
        return Ok(());
    }

    info!(" Montando ambiente '{}'", config.name);
    let mut env = ProvisionedEnvironment::provision(config, &collaborators)?;
    print_addresses(&env);

    if !options.no_wait {
        println!("Pressione Enter para encerrar o ambiente...");
        let mut line = String::new();
        io::stdin()
            .lock()
            .read_line(&mut line)
            .context("lendo stdin")?;
    }

    let report = env.finish();
    print_report(&report);
    Ok(())
}

/// Every published binding of every alias, as seen from this host.
pub fn print_addresses(env: &dyn TestEnvironment) {
    println!("📦 Serviços:");
    for alias in env.aliases() {
        let Some(info) = env.container_info(alias) else {
            continue;
        };
        println!("- {:<22} {}", alias, info.short_name());

        for key in info.ports.keys() {
            let Some((port, protocol)) = key
                .split_once('/')
                .and_then(|(p, proto)| p.parse::<u16>().ok().map(|p| (p, proto)))
            else {
                continue;
            };
            if let Ok(addr) = env.service_address_for(alias, port, protocol) {
                println!("    {:<10} -> {}", key, addr);
            }
        }
    }
}

fn print_report(report: &TeardownReport) {
    for log in &report.logs {
        println!("📝 {}", log.display());
    }
    if report.kept_running {
        println!("⚠️  Containers mantidos rodando");
    } else {
        println!("✅ {} container(s) removido(s)", report.removed.len());
    }
    if !report.warnings.is_empty() {
        println!("⚠️  {} aviso(s) durante o encerramento", report.warnings.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line_overrides_config() {
        let config_dir = tempfile::tempdir().unwrap();
        std::fs::write(
            config_dir.path().join("testbed.toml"),
            "[environment]\nname = \"global\"\naliases = [\"jmx-sim\"]\nadvertised_host = \"10.1.1.1\"\n",
        )
        .unwrap();

        let options = UpOptions {
            aliases: vec![ServiceAlias::Sentinel],
            name: Some("cli".to_string()),
            keep_running: true,
            ..UpOptions::default()
        };

        let config = resolve_config(&options, config_dir.path()).unwrap();
        assert_eq!(config.name, "cli");
        assert!(config.skip_teardown);
        assert!(config.is_enabled(ServiceAlias::Sentinel));
        assert!(config.is_enabled(ServiceAlias::Database));
        assert!(!config.is_enabled(ServiceAlias::JmxSim));
        assert_eq!(config.advertised_host, "10.1.1.1");
    }
}
