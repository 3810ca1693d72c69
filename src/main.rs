use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use testbed::cli::{self, FreePortOptions, UpOptions};
use testbed::infra::config::default_config_dir;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "testbed",
    about = "Ambientes descartáveis de containers para testes de integração"
)]
struct Cli {
    /// Diretório de configuração (default: ~/.config/testbed)
    #[arg(long, env = "TESTBED_CONFIG_DIR", default_value_os_t = default_config_dir())]
    config_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sobe o ambiente, mostra os endereços e derruba ao sair
    Up(UpOptions),
    /// Lista aliases, imagens e dependências
    Aliases,
    /// Verifica runtime, ssh e sshpass
    Doctor {
        /// Binário do runtime de containers
        #[arg(long, env = "TESTBED_RUNTIME", default_value = "docker")]
        runtime: String,
    },
    /// Encontra uma porta TCP livre num intervalo
    FreePort(FreePortOptions),
    /// Instala o testbed.toml padrão no diretório de configuração
    Init,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Up(options) => cli::up::run(options, &cli.config_dir),
        Commands::Aliases => cli::aliases::run(&cli.config_dir),
        Commands::Doctor { runtime } => cli::doctor::run(&cli.config_dir, &runtime),
        Commands::FreePort(options) => cli::free_port::run(options),
        Commands::Init => cli::init::run(&cli.config_dir),
    }
}
