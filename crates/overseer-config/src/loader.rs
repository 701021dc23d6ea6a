//! Config file discovery and loading.
//!
//! Search order when no path is given:
//! 1. `./overseer.toml`
//! 2. `<user config dir>/overseer/overseer.toml`

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{ConfigError, ConfigResult};
use crate::types::Config;
use crate::validate;

/// Default config file name.
pub const CONFIG_FILE_NAME: &str = "overseer.toml";

/// Maximum allowed config file size (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1_048_576;

/// Candidate config locations, most specific first.
#[must_use]
pub fn search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(CONFIG_FILE_NAME)];
    if let Some(dirs) = directories::ProjectDirs::from("", "", "overseer") {
        paths.push(dirs.config_dir().join(CONFIG_FILE_NAME));
    }
    paths
}

/// Load the config from `path`, or from the first default location that
/// exists.
///
/// # Errors
///
/// Returns a [`ConfigError`] if no file is found, or the file cannot be
/// read, parsed or validated.
pub fn load(path: Option<&Path>) -> ConfigResult<Config> {
    if let Some(path) = path {
        return load_file(path);
    }
    let candidates = search_paths();
    for candidate in &candidates {
        if candidate.is_file() {
            return load_file(candidate);
        }
        debug!(path = %candidate.display(), "config file not found, skipping");
    }
    Err(ConfigError::NotFound {
        searched: candidates
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", "),
    })
}

/// Load a config from a specific file path.
///
/// Relative paths inside the file resolve against the file's directory.
///
/// # Errors
///
/// Returns a [`ConfigError`] if the file cannot be read, parsed or validated.
pub fn load_file(path: &Path) -> ConfigResult<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.display().to_string(),
        source: e,
    })?;

    if content.len() as u64 > MAX_CONFIG_FILE_SIZE {
        return Err(ConfigError::ValidationError {
            field: path.display().to_string(),
            message: format!(
                "config file is {} bytes, exceeding the {MAX_CONFIG_FILE_SIZE} byte limit",
                content.len()
            ),
        });
    }

    let mut config = parse(&content, &path.display().to_string())?;
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    config.base_dir = absolute.parent().map(Path::to_path_buf);

    info!(path = %path.display(), "loaded config");
    Ok(config)
}

/// Parse and validate config text. `origin` names the source in errors.
///
/// # Errors
///
/// Returns a [`ConfigError`] if the text does not parse or validate.
pub fn parse(content: &str, origin: &str) -> ConfigResult<Config> {
    let config: Config = toml::from_str(content).map_err(|e| ConfigError::ParseError {
        path: origin.to_owned(),
        source: e,
    })?;
    validate::validate(&config)?;
    Ok(config)
}
