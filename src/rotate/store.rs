// xtrabackup-assistant/src/rotate/store.rs
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

use crate::catalog::Catalog;
use crate::errors::{AppError, Result};
use crate::transfer::TransferClient;
use crate::utils::echo::Echo;
use crate::utils::is_dir_empty;

/// Where a rotation deletes from.
pub trait ArtifactStore {
    fn name(&self) -> &'static str;
    fn root(&self) -> &Path;
    fn remove_file(&mut self, path: &Path) -> Result<()>;
    fn is_empty_dir(&mut self, path: &Path) -> Result<bool>;
    fn remove_dir(&mut self, path: &Path) -> Result<()>;
}

pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LocalStore { root: root.into() }
    }
}

impl ArtifactStore for LocalStore {
    fn name(&self) -> &'static str {
        "local"
    }

    fn root(&self) -> &Path {
        &self.root
    }

    fn remove_file(&mut self, path: &Path) -> Result<()> {
        fs::remove_file(path).map_err(AppError::Io)
    }

    fn is_empty_dir(&mut self, path: &Path) -> Result<bool> {
        match is_dir_empty(path) {
            Ok(empty) => Ok(empty),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    fn remove_dir(&mut self, path: &Path) -> Result<()> {
        fs::remove_dir(path).map_err(AppError::Io)
    }
}

pub struct RemoteStore<'a> {
    client: &'a mut TransferClient,
    root: PathBuf,
}

impl<'a> RemoteStore<'a> {
    pub fn new(client: &'a mut TransferClient, root: impl Into<PathBuf>) -> Self {
        RemoteStore {
            client,
            root: root.into(),
        }
    }
}

impl ArtifactStore for RemoteStore<'_> {
    fn name(&self) -> &'static str {
        "sftp"
    }

    fn root(&self) -> &Path {
        &self.root
    }

    fn remove_file(&mut self, path: &Path) -> Result<()> {
        self.client.delete(path, false)
    }

    fn is_empty_dir(&mut self, path: &Path) -> Result<bool> {
        self.client.is_empty_dir(path)
    }

    fn remove_dir(&mut self, path: &Path) -> Result<()> {
        self.client.delete(path, false)
    }
}

#[derive(Debug, Default)]
pub struct RotationReport {
    pub deleted: Vec<String>,
    /// `(filename, reason)` for every record that could not be deleted.
    pub failed: Vec<(String, String)>,
}

/// Deletes every record of `to_delete`, one at a time, pruning the month
/// and then the year directory once they are empty. A failed deletion is
/// reported and the run goes on.
pub fn execute(
    to_delete: &Catalog,
    store: &mut dyn ArtifactStore,
    echo: &Echo,
    cancel: &CancellationToken,
) -> Result<RotationReport> {
    let author = store.name();
    let mut report = RotationReport::default();

    for record in to_delete {
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled("rotation interrupted".to_string()));
        }

        let filename = record.filename();
        if let Err(e) = store.remove_file(record.path()) {
            echo.error(author, format!("Failed to delete {}: {}", filename, e));
            report.failed.push((filename, e.to_string()));
            continue;
        }
        echo.info(author, format!("Deleted {}", filename));
        report.deleted.push(filename);

        let month_dir = record.path().parent();
        let year_dir = month_dir.and_then(Path::parent);
        for dir in [month_dir, year_dir].into_iter().flatten() {
            match prune(store, dir) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    echo.warn(author, format!("Failed to remove empty directory {}: {}", dir.display(), e));
                    break;
                }
            }
        }
    }

    Ok(report)
}

/// Removes `dir` if it is an empty directory strictly below the store root.
fn prune(store: &mut dyn ArtifactStore, dir: &Path) -> Result<bool> {
    if dir == store.root() || !dir.starts_with(store.root()) {
        return Ok(false);
    }
    if !store.is_empty_dir(dir)? {
        return Ok(false);
    }
    store.remove_dir(dir)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{BackupRecord, Source};
    use crate::transfer::memory::{MemoryConnector, MemoryFs};
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str) -> BackupRecord {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"x").unwrap();
        BackupRecord::parse(path, Source::Local, 1).unwrap()
    }

    #[test]
    fn test_local_execution_prunes_month_then_year() {
        let root = TempDir::new().unwrap();
        let old = touch(root.path(), "2022/11/2022-11-02-00-00_shop_8.0.35.tar");
        let jan = touch(root.path(), "2023/01/2023-01-05-00-00_shop_8.0.35.tar");
        touch(root.path(), "2023/01/2023-01-20-00-00_shop_8.0.35.tar");

        let to_delete: Catalog = [old, jan].into_iter().collect();
        let mut store = LocalStore::new(root.path());
        let report = execute(&to_delete, &mut store, &Echo::quiet(), &CancellationToken::new()).unwrap();

        assert_eq!(report.deleted.len(), 2);
        assert!(report.failed.is_empty());
        assert!(!root.path().join("2022").exists());
        assert!(root.path().join("2023/01/2023-01-20-00-00_shop_8.0.35.tar").exists());
        assert!(root.path().exists());
    }

    #[test]
    fn test_failures_do_not_stop_the_run() {
        let root = TempDir::new().unwrap();
        let gone = BackupRecord::parse(
            root.path().join("2022/10/2022-10-01-00-00_shop_8.0.35.tar"),
            Source::Local,
            1,
        )
        .unwrap();
        let present = touch(root.path(), "2022/11/2022-11-02-00-00_shop_8.0.35.tar");

        let to_delete: Catalog = [gone, present].into_iter().collect();
        let mut store = LocalStore::new(root.path());
        let report = execute(&to_delete, &mut store, &Echo::quiet(), &CancellationToken::new()).unwrap();

        assert_eq!(report.deleted, vec!["2022-11-02-00-00_shop_8.0.35.tar".to_string()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "2022-10-01-00-00_shop_8.0.35.tar");
    }

    #[test]
    fn test_remote_execution() {
        let fs = MemoryFs::new();
        fs.add_file("/storage/2021/05/2021-05-01-00-00_shop_8.0.35.tar", b"1");
        fs.add_file("/storage/2021/06/2021-06-01-00-00_shop_8.0.35.tar", b"1");

        let mut client = TransferClient::connect(
            Box::new(MemoryConnector::new(fs.clone())),
            Echo::quiet(),
            CancellationToken::new(),
        )
        .unwrap();
        let record = BackupRecord::parse("/storage/2021/05/2021-05-01-00-00_shop_8.0.35.tar", Source::Remote, 1).unwrap();
        let to_delete: Catalog = [record].into_iter().collect();

        let mut store = RemoteStore::new(&mut client, "/storage");
        let report = execute(&to_delete, &mut store, &Echo::quiet(), &CancellationToken::new()).unwrap();

        assert_eq!(report.deleted.len(), 1);
        assert!(!fs.has_dir("/storage/2021/05"));
        // year still holds June
        assert!(fs.has_dir("/storage/2021"));
        assert!(fs.has_dir("/storage"));
    }
}
