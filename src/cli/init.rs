use crate::infra::config::{DEFAULT_TESTBED_TOML_NAME, install_default_config};
use anyhow::Result;
use std::path::Path;
use tracing::info;

pub fn run(config_dir: &Path) -> Result<()> {
    info!(" Preparando config em {:?}", config_dir);

    if install_default_config(config_dir)? {
        println!(
            "✅ Config criado em {:?}. Ajuste conforme necessário.",
            config_dir.join(DEFAULT_TESTBED_TOML_NAME)
        );
    } else {
        println!(
            "⚠️  {:?} já existe, nada a fazer",
            config_dir.join(DEFAULT_TESTBED_TOML_NAME)
        );
    }

    Ok(())
}
