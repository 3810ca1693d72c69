use crate::domain::ContainerRuntime;
use crate::infra::DockerAdapter;
use anyhow::{Result, bail};
use std::path::Path;
use std::process::{Command, Stdio};

/// Tools the production adapters shell out to, besides the runtime itself.
const SHELL_TOOLS: [(&str, &str); 2] = [("ssh", "-V"), ("sshpass", "-V")];

pub fn run(config_dir: &Path, runtime_binary: &str) -> Result<()> {
    println!("🔍 Checando dependências e configuração...");
    let mut missing = Vec::new();

    if DockerAdapter::new(runtime_binary).is_available() {
        println!("✅ {runtime_binary} disponível");
    } else {
        println!("❌ {runtime_binary} não encontrado no PATH");
        missing.push(runtime_binary.to_string());
    }

    for (tool, version_flag) in SHELL_TOOLS {
        if command_available(tool, version_flag) {
            println!("✅ {tool} disponível");
        } else {
            println!("❌ {tool} não encontrado no PATH");
            missing.push(tool.to_string());
        }
    }

    if config_dir.exists() {
        println!("✅ Diretório de config: {:?}", config_dir);
    } else {
        println!(
            "⚠️  Diretório de config ausente em {:?} (use testbed init)",
            config_dir
        );
    }

    if !missing.is_empty() {
        bail!("Dependências ausentes: {}", missing.join(", "));
    }
    Ok(())
}

fn command_available(cmd: &str, version_flag: &str) -> bool {
    // ssh -V exits 0 but writes to stderr; sshpass -V exits 0 too
    Command::new(cmd)
        .arg(version_flag)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}
