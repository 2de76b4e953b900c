// xtrabackup-assistant/src/utils/mod.rs
pub mod echo;
pub mod environment;
pub mod process;
pub mod progress;
pub mod slack;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use which::which;

use crate::errors::{AppError, Result};

/// Finds an external tool in the system PATH.
pub fn find_executable(name: &str) -> Result<PathBuf> {
    which(name).map_err(|_| {
        AppError::ToolMissing(format!(
            "{} executable not found in PATH. Please ensure Percona tools are installed and in your PATH.",
            name
        ))
    })
}

/// Removes everything inside `dir_path` but keeps the directory itself and
/// any `.gitignore` marker. A missing directory is not an error.
pub fn clear_dir(dir_path: &Path) -> io::Result<()> {
    let entries = match fs::read_dir(dir_path) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };

    for entry in entries {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            fs::remove_dir_all(entry.path())?;
        } else if entry.file_name() != ".gitignore" {
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

pub fn is_dir_empty(dir_path: &Path) -> io::Result<bool> {
    Ok(fs::read_dir(dir_path)?.next().is_none())
}

/// Removes `start` and then its ancestors while they are empty, never
/// touching `stop_at` or anything above it.
pub fn prune_empty_dirs(start: &Path, stop_at: &Path) -> io::Result<()> {
    let mut current = start.to_path_buf();
    while current.starts_with(stop_at) && current != stop_at {
        match is_dir_empty(&current) {
            Ok(true) => fs::remove_dir(&current)?,
            Ok(false) => break,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => break,
        }
    }
    Ok(())
}

/// Deletes a partially written file and prunes its now-empty parent.
pub fn discard_partial_file(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    if let Some(parent) = path.parent() {
        if parent.exists() && is_dir_empty(parent)? {
            fs::remove_dir(parent)?;
        }
    }
    Ok(())
}

/// Moves a file, falling back to copy + delete across filesystems.
pub fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    if let Some(parent) = to.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(_) => {
            fs::copy(from, to)?;
            fs::remove_file(from)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_clear_dir_keeps_gitignore() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        fs::write(dir.path().join(".gitignore"), "*")?;
        fs::write(dir.path().join("xtrabackup.log"), "log")?;
        fs::create_dir_all(dir.path().join("nested/deeper"))?;
        fs::write(dir.path().join("nested/deeper/file"), "x")?;

        clear_dir(dir.path())?;

        let left: Vec<_> = fs::read_dir(dir.path())?
            .map(|e| e.map(|e| e.file_name().to_string_lossy().to_string()))
            .collect::<io::Result<_>>()?;
        assert_eq!(left, vec![".gitignore".to_string()]);
        Ok(())
    }

    #[test]
    fn test_clear_missing_dir_is_ok() {
        assert!(clear_dir(Path::new("/definitely/not/here")).is_ok());
    }

    #[test]
    fn test_prune_stops_at_root_and_non_empty() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        let month = root.path().join("2023/01");
        fs::create_dir_all(&month)?;
        fs::create_dir_all(root.path().join("2023/02"))?;

        prune_empty_dirs(&month, root.path())?;
        assert!(!month.exists());
        // year still holds 02
        assert!(root.path().join("2023").exists());

        prune_empty_dirs(&root.path().join("2023/02"), root.path())?;
        assert!(!root.path().join("2023").exists());
        assert!(root.path().exists());
        Ok(())
    }

    #[test]
    fn test_discard_partial_file_prunes_parent() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        let month = root.path().join("2023/01");
        fs::create_dir_all(&month)?;
        let partial = month.join("part.tar");
        fs::write(&partial, b"half")?;

        discard_partial_file(&partial)?;
        assert!(!partial.exists());
        assert!(!month.exists());
        Ok(())
    }
}
