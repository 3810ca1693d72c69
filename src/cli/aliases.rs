use crate::domain::{ImageTable, ServiceAlias};
use crate::infra::config::load_environment_config;
use anyhow::Result;
use std::path::Path;

pub fn run(config_dir: &Path) -> Result<()> {
    let config = load_environment_config(config_dir)?;
    let defaults = ServiceAlias::defaults();

    println!("📋 Aliases conhecidos (* = habilitado):");
    for line in describe(&config.images, |alias| config.is_enabled(alias), &defaults) {
        println!("{line}");
    }
    Ok(())
}

fn describe(
    images: &ImageTable,
    enabled: impl Fn(ServiceAlias) -> bool,
    defaults: &std::collections::BTreeSet<ServiceAlias>,
) -> Vec<String> {
    ServiceAlias::ALL
        .iter()
        .map(|alias| {
            let marker = if enabled(*alias) { "*" } else { " " };
            let image = images.image_for(*alias).unwrap_or("?");
            let mut line = format!("{marker} {:<22} {image}", alias.as_str());

            if !alias.hard_dependencies().is_empty() {
                line.push_str(&format!(" | requer: {}", join(alias.hard_dependencies())));
            }
            if !alias.soft_dependencies().is_empty() {
                line.push_str(&format!(" | liga: {}", join(alias.soft_dependencies())));
            }
            if defaults.contains(alias) {
                line.push_str(" | padrão");
            }
            line
        })
        .collect()
}

fn join(aliases: &[ServiceAlias]) -> String {
    aliases
        .iter()
        .map(|a| a.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
