use crate::domain::ServiceAlias;
use anyhow::{Context, Result, bail};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

/// Where an alias expects its overlay inside the container, if it takes one.
pub fn overlay_mount_point(alias: ServiceAlias) -> Option<&'static str> {
    match alias {
        ServiceAlias::CoreServer => Some("/opennms-docker-overlay"),
        ServiceAlias::Sentinel => Some("/sentinel-docker-overlay"),
        a if a.is_agent() => Some("/minion-docker-overlay"),
        _ => None,
    }
}

/// Extra host directories bind-mounted so logs survive the container.
fn log_mount_points(alias: ServiceAlias) -> &'static [(&'static str, &'static str)] {
    match alias {
        ServiceAlias::CoreServer => &[
            ("logs", "/var/log/opennms"),
            ("karaf-logs", "/opt/opennms/data/log"),
        ],
        _ => &[],
    }
}

/// Stages per-alias overlay directories under `<root>/<env-name>/<alias>`.
///
/// The first time an alias is staged through a given stager its directory
/// is cleared; later stagings append to what is there. Directories are
/// never deleted afterwards, so repeated runs against the same environment
/// name leave the previous run's files in place until the next first touch.
#[derive(Debug)]
pub struct OverlayStager {
    root: PathBuf,
    touched: Mutex<HashSet<PathBuf>>,
}

impl OverlayStager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            touched: Mutex::new(HashSet::new()),
        }
    }

    pub fn alias_dir(&self, env_name: &str, alias: ServiceAlias) -> PathBuf {
        self.root.join(env_name).join(alias.as_str())
    }

    /// Prepares the directories for `alias` and returns the bind mounts
    /// (`host:container`) to hand to the runtime. Aliases without an overlay
    /// mount point get no mounts.
    pub fn stage(
        &self,
        env_name: &str,
        alias: ServiceAlias,
        source: Option<&Path>,
    ) -> Result<Vec<String>> {
        let Some(mount_point) = overlay_mount_point(alias) else {
            return Ok(Vec::new());
        };

        let alias_dir = absolute(&self.alias_dir(env_name, alias))?;
        self.touch(&alias_dir)?;

        let overlay = alias_dir.join("overlay");
        fs::create_dir_all(&overlay).with_context(|| format!("criando {:?}", overlay))?;
        if let Some(source) = source {
            copy_tree(source, &overlay)?;
        }

        let mut mounts = vec![format!("{}:{mount_point}", overlay.display())];
        for (dir, target) in log_mount_points(alias) {
            let host_dir = alias_dir.join(dir);
            fs::create_dir_all(&host_dir).with_context(|| format!("criando {:?}", host_dir))?;
            mounts.push(format!("{}:{target}", host_dir.display()));
        }

        info!(" Overlay de {alias} preparado em {:?}", overlay);
        Ok(mounts)
    }

    /// Clears `dir` the first time it is seen by this stager.
    fn touch(&self, dir: &Path) -> Result<()> {
        let mut touched = self
            .touched
            .lock()
            .map_err(|_| anyhow::anyhow!("estado do overlay corrompido"))?;

        if touched.insert(dir.to_path_buf()) && dir.exists() {
            debug!("Limpando overlay antigo em {:?}", dir);
            fs::remove_dir_all(dir).with_context(|| format!("removendo {:?}", dir))?;
        }
        Ok(())
    }
}

/// Accumulates files into an overlay directory before it is staged.
#[derive(Debug)]
pub struct OverlayBuilder {
    root: PathBuf,
}

impl OverlayBuilder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn add_file(&self, contents: &str, target: &str) -> Result<&Self> {
        let path = self.target_path(target)?;
        fs::write(&path, contents).with_context(|| format!("escrevendo {:?}", path))?;
        Ok(self)
    }

    /// Copies every file below `directory` to `target_dir` inside the overlay.
    pub fn add_files(&self, directory: &Path, target_dir: &str) -> Result<&Self> {
        if !directory.is_dir() {
            bail!("{:?} não é um diretório", directory);
        }
        let target = self.root.join(target_dir);
        copy_tree(directory, &target)?;
        Ok(self)
    }

    pub fn build(self) -> PathBuf {
        self.root
    }

    fn target_path(&self, target: &str) -> Result<PathBuf> {
        let path = self.root.join(target);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("criando {:?}", parent))?;
        }
        Ok(path)
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    Ok(std::env::current_dir()?.join(path))
}

fn copy_tree(from: &Path, to: &Path) -> Result<()> {
    for entry in fs::read_dir(from).with_context(|| format!("lendo {:?}", from))? {
        let entry = entry?;
        let source = entry.path();
        let target = to.join(entry.file_name());

        if entry.file_type()?.is_dir() {
            copy_tree(&source, &target)?;
        } else {
            fs::create_dir_all(to).with_context(|| format!("criando {:?}", to))?;
            debug!("Copiando {:?} para {:?}", source, target);
            fs::copy(&source, &target)
                .with_context(|| format!("copiando {:?} para {:?}", source, target))?;
        }
    }
    Ok(())
}
