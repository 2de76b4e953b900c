// xtrabackup-assistant/src/backup/logic.rs
use chrono::NaiveDateTime;
use indicatif::DecimalBytes;
use std::fmt;
use std::fs;
use std::path::Path;
use tokio_util::sync::CancellationToken;

use super::archive::create_archive;
use super::db_dump::{dump_server, DumpOutput};
use crate::catalog::record::ARCHIVE_EXTENSION;
use crate::catalog::{ArtifactName, BackupRecord, Source};
use crate::config::AppConfig;
use crate::errors::{AppError, Result};
use crate::transfer::{Connector, TransferClient};
use crate::utils::echo::Echo;

const AUTHOR: &str = "Assistant";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateStage {
    Dumping,
    Archiving,
    Uploading,
}

impl fmt::Display for CreateStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CreateStage::Dumping => write!(f, "dumping"),
            CreateStage::Archiving => write!(f, "archiving"),
            CreateStage::Uploading => write!(f, "uploading"),
        }
    }
}

/// Where the finished archive should go after it is stored locally.
pub enum UploadTarget<'a> {
    /// The operator asked for a local-only backup.
    Disabled,
    /// No remote storage is configured.
    NotConfigured,
    /// Connected only once the archive exists.
    Remote {
        connector: Box<dyn Connector>,
        root: &'a Path,
    },
}

#[derive(Debug)]
pub struct CreateOutcome {
    pub local: BackupRecord,
    pub remote: Option<BackupRecord>,
}

/// Dump, archive, then optionally upload one backup.
pub struct CreateSaga<'a> {
    config: &'a AppConfig,
    xtrabackup_path: &'a Path,
    mysql_version: &'a str,
    echo: &'a Echo,
    cancel: &'a CancellationToken,
}

impl<'a> CreateSaga<'a> {
    pub fn new(
        config: &'a AppConfig,
        xtrabackup_path: &'a Path,
        mysql_version: &'a str,
        echo: &'a Echo,
        cancel: &'a CancellationToken,
    ) -> Self {
        CreateSaga {
            config,
            xtrabackup_path,
            mysql_version,
            echo,
            cancel,
        }
    }

    pub async fn run(&self, created_at: NaiveDateTime, upload: UploadTarget<'_>) -> Result<CreateOutcome> {
        let dump = self.dump(created_at).await.inspect_err(|e| self.failed(CreateStage::Dumping, e))?;
        let local = self.archive(&dump).inspect_err(|e| self.failed(CreateStage::Archiving, e))?;

        self.echo.success(
            AUTHOR,
            format!(
                "Backup successfully created: {} ({})",
                local.path().display(),
                DecimalBytes(local.size_bytes())
            ),
        );

        let remote = match upload {
            UploadTarget::Disabled => None,
            UploadTarget::NotConfigured => {
                self.echo.warn(
                    AUTHOR,
                    "'sftp' option is missing in the config. Upload is skipped. \
                     To avoid this warning use additional option: 'create --no-upload'",
                );
                None
            }
            UploadTarget::Remote { connector, root } => {
                let uploaded = TransferClient::connect(connector, self.echo.clone(), self.cancel.clone())
                    .and_then(|mut client| {
                        self.echo.info("SFTP", "Connected to SFTP backups storage.");
                        self.upload(&mut client, &local, root)
                    })
                    .inspect_err(|e| self.failed(CreateStage::Uploading, e))?;
                Some(uploaded)
            }
        };

        Ok(CreateOutcome { local, remote })
    }

    /// Stage 1: dump stream and log in the temp dir.
    pub async fn dump(&self, created_at: NaiveDateTime) -> Result<DumpOutput> {
        let name = ArtifactName::new(
            created_at,
            self.config.project_name.as_str(),
            self.mysql_version,
            ARCHIVE_EXTENSION,
        );
        dump_server(
            self.xtrabackup_path,
            &self.config.xtrabackup,
            &self.config.directories,
            name,
            self.echo,
            self.cancel,
        )
        .await
    }

    /// Stage 2: `<backups>/<YYYY>/<MM>/<name>.tar`.
    pub fn archive(&self, dump: &DumpOutput) -> Result<BackupRecord> {
        let backups = &self.config.directories.backups;
        let filename = dump.name.with_extension(ARCHIVE_EXTENSION).to_string();
        let archive_path = backups
            .join(crate::catalog::record::partition_for(dump.name.created_at))
            .join(&filename);

        self.echo.info("tar", "Start creating archive");
        let progress = self.echo.progress("tar");
        create_archive(
            &dump.stream_path,
            &dump.log_path,
            &archive_path,
            backups,
            progress.as_ref(),
            self.cancel,
        )?;
        self.echo.info("tar", "Archive created");

        let size = fs::metadata(&archive_path)?.len();
        // a name this process produced must parse
        BackupRecord::parse(archive_path, Source::Local, size)
    }

    /// Stage 3: same partitioning under the remote root.
    pub fn upload(&self, client: &mut TransferClient, local: &BackupRecord, remote_root: &Path) -> Result<BackupRecord> {
        let remote_path = remote_root.join(local.partition()).join(local.filename());

        let progress = self.echo.progress("SFTP");
        let written = client.upload(local.path(), &remote_path, progress.as_ref())?;
        self.echo.success("SFTP", "Dump successfully uploaded to SFTP backups storage!");

        BackupRecord::parse(remote_path, Source::Remote, written)
    }

    fn failed(&self, stage: CreateStage, err: &AppError) {
        if !err.is_cancelled() {
            tracing::error!(stage = %stage, "create failed: {}", err);
        }
    }
}
