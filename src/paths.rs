//! Runtime path helpers.
//!
//! Configuration/secrets often live next to the compiled binary's working
//! directory rather than the crate dir, so `.env` is searched in both.

use std::path::{Path, PathBuf};

pub fn crate_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
}

/// Load `.env` once, searching common locations:
/// - current working directory
/// - its parent
/// - the crate dir
pub fn load_dotenv() {
    static ONCE: std::sync::OnceLock<()> = std::sync::OnceLock::new();
    ONCE.get_or_init(|| {
        let mut candidates: Vec<PathBuf> = Vec::new();

        if let Ok(cwd) = std::env::current_dir() {
            candidates.push(cwd.join(".env"));
            if let Some(parent) = cwd.parent() {
                candidates.push(parent.join(".env"));
            }
        }

        candidates.push(crate_dir().join(".env"));

        for p in candidates {
            if p.exists() && dotenvy::from_path(&p).is_ok() {
                tracing::debug!("Loaded .env from {}", p.display());
                return;
            }
        }

        let _ = dotenvy::dotenv();
    });
}

/// Resolve a data file relative to the working directory.
pub fn resolve_data_file(name: impl AsRef<Path>) -> PathBuf {
    std::env::current_dir()
        .map(|cwd| cwd.join(name.as_ref()))
        .unwrap_or_else(|_| name.as_ref().to_path_buf())
}
