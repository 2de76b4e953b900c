// xtrabackup-assistant/src/backup/mod.rs
mod logic;
pub(crate) mod archive;
pub(crate) mod db_dump;

pub use logic::CreateOutcome;
use logic::{CreateSaga, UploadTarget};

use chrono::{Local, NaiveDateTime, Timelike};
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::errors::Result;
use crate::transfer::sftp::SftpConnector;
use crate::utils::echo::Echo;
use crate::utils::environment::{Environment, Toolset};

/// Public entry point for the `create` command.
pub async fn run_create_flow(
    app_config: &AppConfig,
    env: &Environment,
    tools: &Toolset,
    echo: &Echo,
    cancel: &CancellationToken,
    upload: bool,
) -> Result<CreateOutcome> {
    let saga = CreateSaga::new(app_config, &tools.xtrabackup, &env.mysql_version, echo, cancel);
    let created_at = current_minute();

    match (&app_config.sftp, upload) {
        (_, false) => saga.run(created_at, UploadTarget::Disabled).await,
        (None, true) => saga.run(created_at, UploadTarget::NotConfigured).await,
        (Some(sftp), true) => {
            let target = UploadTarget::Remote {
                connector: Box::new(SftpConnector::from_config(sftp)),
                root: &sftp.path,
            };
            saga.run(created_at, target).await
        }
    }
}

/// Local wall-clock time truncated to the minute, the resolution of artifact names.
fn current_minute() -> NaiveDateTime {
    let now = Local::now().naive_local();
    now.with_second(0).and_then(|t| t.with_nanosecond(0)).unwrap_or(now)
}
