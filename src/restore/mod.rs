// xtrabackup-assistant/src/restore/mod.rs
mod logic;

pub use logic::RestoreOutcome;
use logic::{PromptSelector, RemoteSource, RestoreSaga};

use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::errors::Result;
use crate::transfer::TransferClient;
use crate::utils::echo::Echo;
use crate::utils::environment::{Environment, Toolset};

/// Public entry point for the `restore` command.
///
/// An unreachable remote storage only narrows the choice to local backups.
pub async fn run_restore_flow(
    app_config: &AppConfig,
    env: &Environment,
    tools: &Toolset,
    echo: &Echo,
    cancel: &CancellationToken,
) -> Result<RestoreOutcome> {
    let saga = RestoreSaga::new(app_config, tools, echo, cancel);
    let target_version = env.xtrabackup_version.clone();
    let mut selector = PromptSelector::new(cancel.clone());

    let mut client = match &app_config.sftp {
        Some(sftp) => match TransferClient::sftp(sftp, echo.clone(), cancel.clone()) {
            Ok(client) => Some(client),
            Err(e) => {
                echo.warn("SFTP", format!("Remote backups are not available: {}", e));
                None
            }
        },
        None => None,
    };

    let remote = match (&mut client, &app_config.sftp) {
        (Some(client), Some(sftp)) => Some(RemoteSource {
            client,
            root: &sftp.path,
        }),
        _ => None,
    };

    saga.run(target_version, remote, &mut selector).await
}
