// xtrabackup-assistant/src/rotate/mod.rs
mod policy;
mod store;

pub use policy::RetentionPolicy;
use policy::plan;
use store::{execute, ArtifactStore, LocalStore, RemoteStore, RotationReport};

use chrono::{Local, NaiveDateTime};
use tokio_util::sync::CancellationToken;

use crate::catalog::discovery::{local_records, remote_records};
use crate::catalog::Catalog;
use crate::config::AppConfig;
use crate::errors::{AppError, Result};
use crate::transfer::TransferClient;
use crate::utils::echo::Echo;

const AUTHOR: &str = "Rotation";

/// Applies the retention policy to local and, if configured, remote storage.
pub async fn run_rotate_flow(
    app_config: &AppConfig,
    echo: &Echo,
    cancel: &CancellationToken,
    dry_run: bool,
) -> Result<()> {
    let policy = app_config.rotation.ok_or_else(|| {
        AppError::Config("'rotation' option is missing in the config. Rotation is not possible.".to_string())
    })?;
    let now = Local::now().naive_local();

    echo.info(AUTHOR, "🔄 Rotating local backups...");
    let local = Catalog::from_iter(local_records(&app_config.directories.backups, echo)?);
    let mut local_store = LocalStore::new(&app_config.directories.backups);
    rotate_store(&local, &policy, now, &mut local_store, echo, cancel, dry_run)?;

    match &app_config.sftp {
        Some(sftp) => {
            echo.info(AUTHOR, "🔄 Rotating SFTP backups...");
            let mut client = TransferClient::sftp(sftp, echo.clone(), cancel.clone())?;
            let remote = Catalog::from_iter(remote_records(&mut client, &sftp.path, echo)?);
            let mut remote_store = RemoteStore::new(&mut client, &sftp.path);
            rotate_store(&remote, &policy, now, &mut remote_store, echo, cancel, dry_run)?;
        }
        None => echo.info(AUTHOR, "'sftp' option is missing in the config. Remote rotation is skipped."),
    }

    Ok(())
}

/// Plans and (unless `dry_run`) executes rotation of a single store.
pub fn rotate_store(
    catalog: &Catalog,
    policy: &RetentionPolicy,
    now: NaiveDateTime,
    store: &mut dyn ArtifactStore,
    echo: &Echo,
    cancel: &CancellationToken,
    dry_run: bool,
) -> Result<Option<RotationReport>> {
    let rotation = plan(catalog, policy, now);
    let author = store.name();

    if rotation.is_empty() {
        echo.info(author, "Nothing to rotate.");
        return Ok(None);
    }

    let to_delete = rotation.to_delete();
    echo.raw(to_delete.render_table("Backups to be deleted"));
    for record in to_delete.iter() {
        if let Some(reason) = rotation.reason_for(record) {
            echo.info(author, format!("{} is {}", record.filename(), reason.label()));
        }
    }

    if dry_run {
        echo.info(author, format!("Dry run: {} backup(s) would be deleted.", to_delete.len()));
        return Ok(None);
    }

    let report = execute(&to_delete, store, echo, cancel)?;
    if report.failed.is_empty() {
        echo.success(author, format!("{} backup(s) deleted.", report.deleted.len()));
    } else {
        echo.warn(
            author,
            format!(
                "{} backup(s) deleted, {} failed.",
                report.deleted.len(),
                report.failed.len()
            ),
        );
    }
    Ok(Some(report))
}
