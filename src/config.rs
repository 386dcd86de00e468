use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::cache::{DB_EXTENSION, tmp_path};

/// `--db` if given, otherwise the archive path with its extension replaced
/// by `.entDB`.
pub fn resolve_db_path(db: Option<&Path>, archive_path: &Path) -> PathBuf {
    match db {
        Some(p) => p.to_path_buf(),
        None => archive_path.with_extension(DB_EXTENSION),
    }
}

pub fn default_mount_root() -> PathBuf {
    std::env::temp_dir()
}

pub fn clear_db(db_path: &Path) -> Result<()> {
    remove_file_if_exists(db_path, "db")?;
    remove_file_if_exists(&tmp_path(db_path), "partial db")?;
    Ok(())
}

fn remove_file_if_exists(path: &Path, kind: &str) -> Result<()> {
    if path.exists() {
        std::fs::remove_file(path)
            .with_context(|| format!("Failed to remove {kind} file: {}", path.display()))?;
    }
    Ok(())
}
