use std::path::{Path, PathBuf};

use lazy_static::lazy_static;

lazy_static! {
    /// Default root directory for all persisted node state. Individual
    /// component configs (`keys/`, `records.db`, `peers.db`, ...) resolve
    /// their paths relative to this unless overridden.
    pub static ref ASTRA_HOME_DIR: PathBuf = directories::ProjectDirs::from("net", "astra", "astra-node")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".astra"));
}

/// Join a relative path onto [`ASTRA_HOME_DIR`].
pub fn home_path(rel: impl AsRef<Path>) -> PathBuf {
    ASTRA_HOME_DIR.join(rel)
}

/// Create `path`'s parent directory tree if it doesn't already exist.
pub fn ensure_parent_dir(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}
