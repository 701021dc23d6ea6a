//! Where attach sockets live.

use std::path::{Path, PathBuf};

use crate::error::{AttachError, AttachResult};

/// Socket file extension.
pub const SOCKET_EXTENSION: &str = "sock";

/// Socket path for instance `name` in `dir`.
#[must_use]
pub fn socket_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.{SOCKET_EXTENSION}"))
}

/// Names of instances with a socket in `dir`, sorted. A missing directory
/// has none.
///
/// # Errors
///
/// Returns an error if `dir` exists but cannot be read.
pub fn list_instances(dir: &Path) -> AttachResult<Vec<String>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut names = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(SOCKET_EXTENSION) {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            names.push(stem.to_string());
        }
    }
    names.sort();
    Ok(names)
}

/// Socket path of a running instance.
///
/// # Errors
///
/// Returns [`AttachError::UnknownInstance`] if no socket exists.
pub fn find_instance(dir: &Path, name: &str) -> AttachResult<PathBuf> {
    let path = socket_path(dir, name);
    if path.exists() {
        Ok(path)
    } else {
        Err(AttachError::UnknownInstance {
            name: name.to_string(),
            dir: dir.to_path_buf(),
        })
    }
}
