// xtrabackup-assistant/src/errors.rs
use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::utils::progress::is_cancelled_io;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Malformed backup name '{name}': {reason}")]
    MalformedRecord { name: String, reason: String },

    #[error("Failed to init the remote storage connection to {target}: {source}")]
    Connection {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("Transfer of {path} failed: {source}")]
    Transfer {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to create a backup! Error log: {}", log_path.display())]
    DumpTool { log_path: PathBuf },

    #[error("Stream extraction failed: {0}")]
    StreamExtraction(String),

    #[error("Decompression failed: {0}")]
    Decompression(String),

    #[error("Prepare failed: {0}")]
    Prepare(String),

    #[error("Archive {} does not contain a *.{extension} member", archive.display())]
    ArchiveContents { archive: PathBuf, extension: String },

    #[error("There is no backup number {0}")]
    InvalidSelection(usize),

    #[error("Required tool is missing: {0}")]
    ToolMissing(String),

    #[error("Tool version is not recognized: {0}")]
    ToolVersion(String),

    #[error("Notification failed: {0}")]
    Notification(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl AppError {
    pub fn malformed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        AppError::MalformedRecord {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Wraps a failed transfer. A cancelled copy becomes `Cancelled`.
    pub fn transfer(path: impl Into<String>, source: io::Error) -> Self {
        let path = path.into();
        if is_cancelled_io(&source) {
            AppError::Cancelled(format!("transfer of {} interrupted", path))
        } else {
            AppError::Transfer { path, source }
        }
    }

    /// Wraps a failed local copy of `what`. A cancelled copy becomes `Cancelled`.
    pub fn local_io(what: impl AsRef<str>, source: io::Error) -> Self {
        if is_cancelled_io(&source) {
            AppError::Cancelled(format!("{} interrupted", what.as_ref()))
        } else {
            AppError::Io(source)
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, AppError::Cancelled(_))
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupted_transfer_is_reported_as_cancellation() {
        let err = AppError::transfer("/b/2023/01/x.tar", crate::utils::progress::cancelled_io());
        assert!(err.is_cancelled());
        assert!(AppError::local_io("archiving", crate::utils::progress::cancelled_io()).is_cancelled());

        let err = AppError::transfer("/b/2023/01/x.tar", io::Error::new(io::ErrorKind::PermissionDenied, "nope"));
        assert!(!err.is_cancelled());
        assert!(err.to_string().contains("/b/2023/01/x.tar"));
    }

    #[test]
    fn dump_tool_error_names_the_log() {
        let err = AppError::DumpTool { log_path: PathBuf::from("logs/2023-01-05-10-00-error.log") };
        assert_eq!(
            err.to_string(),
            "Failed to create a backup! Error log: logs/2023-01-05-10-00-error.log"
        );
    }
}
