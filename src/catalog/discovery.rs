// xtrabackup-assistant/src/catalog/discovery.rs
use regex::Regex;
use std::path::Path;
use walkdir::WalkDir;

use super::record::{BackupRecord, Source, ARCHIVE_EXTENSION};
use crate::errors::{AppError, Result};
use crate::transfer::TransferClient;
use crate::utils::echo::Echo;

const AUTHOR: &str = "Assistant";

/// Archives stored under a local backups root. Foreign files are skipped
/// with a warning; a missing root yields nothing.
pub fn local_records(root: &Path, echo: &Echo) -> Result<Vec<BackupRecord>> {
    if !root.exists() {
        return Ok(Vec::new());
    }

    let mut records = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|e| AppError::Io(e.into()))?;
        if !entry.file_type().is_file() || !has_archive_extension(entry.path()) {
            continue;
        }
        let size = entry.metadata().map_err(|e| AppError::Io(e.into()))?.len();
        if let Some(record) = accept(BackupRecord::parse(entry.path(), Source::Local, size), echo)? {
            records.push(record);
        }
    }
    Ok(records)
}

/// Archives stored under a remote backups root.
pub fn remote_records(client: &mut TransferClient, root: &Path, echo: &Echo) -> Result<Vec<BackupRecord>> {
    let pattern = Regex::new(&format!(r"\.{}$", ARCHIVE_EXTENSION))
        .map_err(|e| AppError::Config(format!("invalid archive pattern: {}", e)))?;

    let mut records = Vec::new();
    for entry in client.recursive_find(root, &pattern)? {
        if let Some(record) = accept(BackupRecord::parse(entry.path, Source::Remote, entry.size), echo)? {
            records.push(record);
        }
    }
    Ok(records)
}

fn has_archive_extension(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == ARCHIVE_EXTENSION)
}

/// Turns a malformed name into a skip; anything else propagates.
fn accept(parsed: Result<BackupRecord>, echo: &Echo) -> Result<Option<BackupRecord>> {
    match parsed {
        Ok(record) => Ok(Some(record)),
        Err(AppError::MalformedRecord { name, reason }) => {
            echo.warn(AUTHOR, format!("Skipping unrecognized file {}: {}", name, reason));
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
