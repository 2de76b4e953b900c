// xtrabackup-assistant/src/transfer/mod.rs
//! Remote artifact storage.
//!
//! `TransferClient` wraps one session to a remote backend and guarantees
//! that a failed or interrupted upload/download never leaves a partial
//! artifact behind.

pub mod sftp;

#[cfg(test)]
pub(crate) mod memory;

use regex::Regex;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

use crate::errors::{AppError, Result};
use crate::utils::discard_partial_file;
use crate::utils::echo::Echo;
use crate::utils::progress::{copy_with_progress, is_cancelled_io, ProgressSink};

/// Mode of every directory the client creates remotely.
pub const REMOTE_DIR_MODE: i32 = 0o755;

const AUTHOR: &str = "SFTP";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub path: PathBuf,
    pub size: u64,
    pub is_dir: bool,
}

/// One live connection to a remote file store.
pub trait RemoteSession: Send {
    /// Entries directly under `path`, with full paths.
    fn read_dir(&mut self, path: &Path) -> io::Result<Vec<RemoteEntry>>;
    fn stat(&mut self, path: &Path) -> io::Result<RemoteEntry>;
    fn mkdir(&mut self, path: &Path, mode: i32) -> io::Result<()>;
    fn create(&mut self, path: &Path) -> io::Result<Box<dyn Write + '_>>;
    fn open(&mut self, path: &Path) -> io::Result<Box<dyn Read + '_>>;
    fn remove_file(&mut self, path: &Path) -> io::Result<()>;
    fn remove_dir(&mut self, path: &Path) -> io::Result<()>;
    fn close(&mut self);
}

/// Opens sessions. Kept by the client so it can reconnect after a drop.
pub trait Connector: Send + Sync {
    fn connect(&self) -> io::Result<Box<dyn RemoteSession>>;
    /// Human-readable target, e.g. `user@host:22`.
    fn describe(&self) -> String;
}

/// Errors after which the session can no longer be trusted.
fn is_connection_loss(err: &io::Error) -> bool {
    is_cancelled_io(err)
        || matches!(
            err.kind(),
            io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::BrokenPipe
                | io::ErrorKind::UnexpectedEof
                | io::ErrorKind::TimedOut
                | io::ErrorKind::NotConnected
        )
}

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "remote session is closed")
}

pub struct TransferClient {
    connector: Box<dyn Connector>,
    session: Option<Box<dyn RemoteSession>>,
    cancel: CancellationToken,
    echo: Echo,
}

impl TransferClient {
    /// Opens the first session. Fails fast, no retries.
    pub fn connect(connector: Box<dyn Connector>, echo: Echo, cancel: CancellationToken) -> Result<Self> {
        let session = connector.connect().map_err(|source| AppError::Connection {
            target: connector.describe(),
            source,
        })?;

        Ok(TransferClient {
            connector,
            session: Some(session),
            cancel,
            echo,
        })
    }

    fn session(&mut self) -> io::Result<&mut Box<dyn RemoteSession>> {
        self.session.as_mut().ok_or_else(not_connected)
    }

    /// All files under `root` whose name matches `pattern`, sorted by path.
    ///
    /// A root that cannot be listed yields nothing; a subdirectory that
    /// cannot be listed is an error.
    pub fn recursive_find(&mut self, root: &Path, pattern: &Regex) -> Result<Vec<RemoteEntry>> {
        let session = self
            .session()
            .map_err(|e| AppError::transfer(root.display().to_string(), e))?;

        let mut found = Vec::new();
        let mut pending = vec![root.to_path_buf()];

        while let Some(dir) = pending.pop() {
            let entries = match session.read_dir(&dir) {
                Ok(entries) => entries,
                Err(_) if dir == root => return Ok(found),
                Err(e) => return Err(AppError::transfer(dir.display().to_string(), e)),
            };

            for entry in entries {
                if entry.is_dir {
                    pending.push(entry.path);
                } else if entry
                    .path
                    .file_name()
                    .is_some_and(|name| pattern.is_match(&name.to_string_lossy()))
                {
                    found.push(entry);
                }
            }
        }

        found.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(found)
    }

    pub fn is_empty_dir(&mut self, path: &Path) -> Result<bool> {
        let session = self
            .session()
            .map_err(|e| AppError::transfer(path.display().to_string(), e))?;
        let entries = session
            .read_dir(path)
            .map_err(|e| AppError::transfer(path.display().to_string(), e))?;
        Ok(entries.is_empty())
    }

    /// Creates `path` and every missing ancestor.
    fn mkdir_p(&mut self, path: &Path) -> io::Result<()> {
        let session = self.session()?;
        let mut current = PathBuf::new();
        for component in path.components() {
            current.push(component);
            if current.parent().is_none() {
                // filesystem root
                continue;
            }
            match session.stat(&current) {
                Ok(entry) if entry.is_dir => {}
                Ok(_) => {
                    return Err(io::Error::new(
                        io::ErrorKind::AlreadyExists,
                        format!("{} exists and is not a directory", current.display()),
                    ))
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => session.mkdir(&current, REMOTE_DIR_MODE)?,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Uploads `local` to `remote`, creating remote parents as needed.
    ///
    /// If the copy is interrupted or the connection drops, the dead session
    /// is replaced by a new one which removes the partial remote file (and
    /// its parent when left empty) before the error is returned.
    pub fn upload(&mut self, local: &Path, remote: &Path, progress: &dyn ProgressSink) -> Result<u64> {
        let remote_name = remote.display().to_string();
        let total = fs::metadata(local)?.len();

        if let Some(parent) = remote.parent() {
            self.mkdir_p(parent).map_err(|e| AppError::transfer(&remote_name, e))?;
        }

        progress.start("Uploading...", total);
        let result = self.write_remote(local, remote, progress);
        progress.finish();

        let err = match result {
            Ok(written) => return Ok(written),
            Err(err) => err,
        };

        self.echo.info(AUTHOR, "Error or terminate signal received. Cleaning up....");
        let cleanup = if is_connection_loss(&err) {
            self.close();
            self.reconnect().and_then(|_| self.discard_remote(remote))
        } else {
            self.discard_remote(remote)
        };
        if let Err(cleanup_err) = cleanup {
            self.echo.warn(
                AUTHOR,
                format!("Failed to remove partial upload {}: {}", remote_name, cleanup_err),
            );
        }

        Err(AppError::transfer(remote_name, err))
    }

    fn write_remote(&mut self, local: &Path, remote: &Path, progress: &dyn ProgressSink) -> io::Result<u64> {
        let cancel = self.cancel.clone();
        let mut source = File::open(local)?;
        let session = self.session()?;
        let mut target = session.create(remote)?;
        copy_with_progress(&mut source, &mut target, progress, &cancel)
    }

    /// Downloads `remote` into `local`, creating local parents as needed.
    /// On failure the partial local file and an emptied parent are removed.
    pub fn download(&mut self, remote: &Path, local: &Path, progress: &dyn ProgressSink) -> Result<u64> {
        let remote_name = remote.display().to_string();

        if let Some(parent) = local.parent() {
            fs::create_dir_all(parent)?;
        }

        let total = self
            .session()
            .and_then(|session| session.stat(remote))
            .map_err(|e| AppError::transfer(&remote_name, e))?
            .size;

        progress.start("Downloading...", total);
        let result = self.read_remote(remote, local, progress);
        progress.finish();

        let err = match result {
            Ok(read) => return Ok(read),
            Err(err) => err,
        };

        self.echo.info(AUTHOR, "Error or terminate signal received. Cleaning up....");
        if is_connection_loss(&err) {
            self.close();
        }
        if let Err(cleanup_err) = discard_partial_file(local) {
            self.echo.warn(
                AUTHOR,
                format!("Failed to remove partial download {}: {}", local.display(), cleanup_err),
            );
        }

        Err(AppError::transfer(remote_name, err))
    }

    fn read_remote(&mut self, remote: &Path, local: &Path, progress: &dyn ProgressSink) -> io::Result<u64> {
        let cancel = self.cancel.clone();
        let mut target = File::create(local)?;
        let session = self.session()?;
        let mut source = session.open(remote)?;
        copy_with_progress(&mut source, &mut target, progress, &cancel)
    }

    /// Deletes a file, or an empty directory.
    pub fn delete(&mut self, path: &Path, ignore_missing: bool) -> Result<()> {
        let result = self.session().and_then(|session| {
            let entry = session.stat(path)?;
            if entry.is_dir {
                session.remove_dir(path)
            } else {
                session.remove_file(path)
            }
        });

        match result {
            Ok(()) => Ok(()),
            Err(e) if ignore_missing && e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::transfer(path.display().to_string(), e)),
        }
    }

    fn reconnect(&mut self) -> io::Result<()> {
        self.session = Some(self.connector.connect()?);
        Ok(())
    }

    /// Best-effort removal of a partial upload and its emptied parent.
    fn discard_remote(&mut self, remote: &Path) -> io::Result<()> {
        let session = self.session()?;
        match session.remove_file(remote) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        if let Some(parent) = remote.parent() {
            if session.read_dir(parent)?.is_empty() {
                session.remove_dir(parent)?;
            }
        }
        Ok(())
    }

    /// Idempotent.
    pub fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close();
        }
    }
}

impl Drop for TransferClient {
    fn drop(&mut self) {
        self.close();
    }
}
