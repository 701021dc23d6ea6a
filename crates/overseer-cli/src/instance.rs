//! Locating the config file and the instance a command talks to.

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result, bail};
use overseer_attach::{find_instance, list_instances};
use overseer_config::{Config, default_socket_dir, search_paths};
use tracing::debug;

/// The config file to use: `explicit`, or the first default location that
/// exists.
pub(crate) fn locate_config(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    let candidates = search_paths();
    candidates
        .iter()
        .find(|path| path.is_file())
        .cloned()
        .with_context(|| {
            let searched: Vec<String> = candidates.iter().map(|p| p.display().to_string()).collect();
            format!("no config file found (searched {})", searched.join(", "))
        })
}

/// Where sockets live and which instance is meant when none is named.
#[derive(Debug, Clone)]
pub(crate) struct Target {
    pub(crate) socket_dir: PathBuf,
    pub(crate) default_name: Option<String>,
    pub(crate) command_prefix: String,
}

impl Target {
    /// Build from the command line. An explicit config must load; a default
    /// one is used only if it does.
    pub(crate) fn resolve(config: Option<&Path>, socket_dir: Option<PathBuf>) -> Result<Self> {
        let loaded = match config {
            Some(path) => Some(
                overseer_config::load_file(path)
                    .with_context(|| format!("failed to load {}", path.display()))?,
            ),
            None => match overseer_config::load(None) {
                Ok(config) => Some(config),
                Err(err) => {
                    debug!(error = %err, "No usable default config");
                    None
                },
            },
        };
        Ok(Self::from_config(loaded.as_ref(), socket_dir))
    }

    fn from_config(config: Option<&Config>, socket_dir: Option<PathBuf>) -> Self {
        let socket_dir = socket_dir.unwrap_or_else(|| {
            config.map_or_else(default_socket_dir, |c| c.resolve(&c.attach.socket_dir))
        });
        Self {
            socket_dir,
            default_name: config.map(|c| c.server.name.clone()),
            command_prefix: config.map_or_else(|| "~".to_string(), |c| c.attach.command_prefix.clone()),
        }
    }

    /// Socket of `name`, or of the default instance.
    pub(crate) fn socket(&self, name: Option<&str>) -> Result<PathBuf> {
        let name = match name {
            Some(name) => name.to_string(),
            None => self.default_instance()?,
        };
        Ok(find_instance(&self.socket_dir, &name)?)
    }

    /// A command line for the daemon, e.g. `~stop`.
    pub(crate) fn command(&self, name: &str) -> String {
        format!("{}{name}", self.command_prefix)
    }

    fn default_instance(&self) -> Result<String> {
        if let Some(name) = &self.default_name {
            return Ok(name.clone());
        }
        let running = list_instances(&self.socket_dir)?;
        match running.as_slice() {
            [only] => Ok(only.clone()),
            [] => bail!("no running instances in {}", self.socket_dir.display()),
            _ => bail!(
                "several instances are running ({}), name one",
                running.join(", ")
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(dir: &Path) -> Target {
        Target::from_config(None, Some(dir.to_path_buf()))
    }

    #[test]
    fn test_single_instance_is_default() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("survival.sock"), b"").unwrap();
        let socket = target(dir.path()).socket(None).unwrap();
        assert_eq!(socket, dir.path().join("survival.sock"));
    }

    #[test]
    fn test_ambiguous_without_name() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.sock"), b"").unwrap();
        std::fs::write(dir.path().join("b.sock"), b"").unwrap();
        let err = target(dir.path()).socket(None).unwrap_err();
        assert!(err.to_string().contains("a, b"));
        assert!(target(dir.path()).socket(Some("b")).is_ok());
    }

    #[test]
    fn test_unknown_instance() {
        let dir = tempfile::tempdir().unwrap();
        assert!(target(dir.path()).socket(Some("creative")).is_err());
        assert!(target(dir.path()).socket(None).is_err());
    }

    #[test]
    fn test_config_supplies_defaults() {
        let mut config = overseer_config::parse(
            "[server]\nname = \"survival\"\njar = \"server.jar\"\n[attach]\nsocket_dir = \"run\"\ncommand_prefix = \"!\"\n",
            "test",
        )
        .unwrap();
        config.base_dir = Some(PathBuf::from("/srv/mc"));
        let target = Target::from_config(Some(&config), None);
        assert_eq!(target.socket_dir, PathBuf::from("/srv/mc/run"));
        assert_eq!(target.default_name.as_deref(), Some("survival"));
        assert_eq!(target.command("stop"), "!stop");
    }
}
