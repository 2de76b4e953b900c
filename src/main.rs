//! XtraBackup Assistant
//!
//! Creates, restores and rotates Percona XtraBackup archives kept locally
//! and on an SFTP backups storage.

// xtrabackup-assistant/src/main.rs
mod backup;
mod catalog;
mod config;
mod errors;
mod restore;
mod rotate;
mod transfer;
mod utils;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;

use config::{resolve_config_path, AppConfig};
use errors::AppError;
use restore::RestoreOutcome;
use utils::echo::{init_log_file, Echo};
use utils::environment::{Environment, Toolset};
use utils::slack::Notifier;

const AUTHOR: &str = "Assistant";

#[derive(Debug, Parser)]
#[command(name = "xtrabackup-assistant", version, about = "Percona XtraBackup backups assistant")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Dump the server into a new archive and upload it
    Create {
        /// Keep the archive locally only
        #[arg(long)]
        no_upload: bool,
    },
    /// Pick an archive and restore it into the restore directory
    Restore,
    /// Delete archives the retention policy no longer keeps
    Rotate {
        /// Only print what would be deleted
        #[arg(long)]
        dry_run: bool,
    },
}

/// Main entry point for the assistant
#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    let echo = Echo::new();

    let config_path = resolve_config_path();
    let app_config = match AppConfig::load_from_json(&config_path) {
        Ok(app_config) => app_config,
        Err(e) => {
            eprintln!("❌ Error: failed to load configuration from {}: {}", config_path.display(), e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_log_file(&app_config.directories.primary_log()) {
        echo.warn(AUTHOR, format!("Logging to file is disabled: {:#}", e));
    }
    if !app_config.ignored_nodes.is_empty() {
        echo.warn(
            AUTHOR,
            format!("Unknown config options are ignored: {}", app_config.ignored_nodes.join(", ")),
        );
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("terminate signal received");
            on_signal.cancel();
        }
    });

    let result = run_app(cli.command, &app_config, &echo, &cancel).await;

    if let Err(e) = utils::clear_dir(&app_config.directories.temp) {
        echo.warn(
            AUTHOR,
            format!("Failed to clear {}: {}", app_config.directories.temp.display(), e),
        );
    }

    match result {
        Ok(()) => {
            println!("✅ Operation completed successfully.");
            ExitCode::SUCCESS
        }
        Err(e) if is_cancelled(&e) => {
            echo.warn(AUTHOR, "Terminating...");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("❌ Error: {:?}", e);
            notify_failure(&app_config, &echo, &e).await;
            ExitCode::FAILURE
        }
    }
}

async fn run_app(command: Command, app_config: &AppConfig, echo: &Echo, cancel: &CancellationToken) -> Result<()> {
    let env = Environment::detect()
        .await
        .context("Failed to detect installed Percona tools")?;
    env.print_versions(echo);

    match command {
        Command::Create { no_upload } => {
            echo.info(AUTHOR, "🚀 Starting backup creation...");
            let tools = Toolset::locate().context("Failed to locate Percona tools")?;
            let outcome = backup::run_create_flow(app_config, &env, &tools, echo, cancel, !no_upload)
                .await
                .context("Backup creation failed")?;
            tracing::info!(
                local = %outcome.local.path().display(),
                uploaded = outcome.remote.is_some(),
                "backup created"
            );
        }
        Command::Restore => {
            echo.info(AUTHOR, "🔄 Starting restore...");
            let tools = Toolset::locate().context("Failed to locate Percona tools")?;
            let outcome = restore::run_restore_flow(app_config, &env, &tools, echo, cancel)
                .await
                .context("Restore failed")?;
            if let RestoreOutcome::Restored { record, restore_dir } = outcome {
                echo.info(
                    AUTHOR,
                    format!(
                        "Prepared data directory of {}: {}",
                        record.filename(),
                        restore_dir.display()
                    ),
                );
            }
        }
        Command::Rotate { dry_run } => {
            echo.info(AUTHOR, "⚙️ Starting backups rotation...");
            rotate::run_rotate_flow(app_config, echo, cancel, dry_run)
                .await
                .context("Backups rotation failed")?;
        }
    }
    Ok(())
}

fn is_cancelled(err: &anyhow::Error) -> bool {
    err.downcast_ref::<AppError>().is_some_and(AppError::is_cancelled)
}

async fn notify_failure(app_config: &AppConfig, echo: &Echo, err: &anyhow::Error) {
    let Some(slack) = app_config.slack.clone() else {
        return;
    };
    let sent = match Notifier::new(slack) {
        Ok(notifier) => notifier.notify(&app_config.project_name, &format!("{:#}", err)).await,
        Err(e) => Err(e),
    };
    if let Err(e) = sent {
        echo.warn("Slack", format!("Failed to send the error notification: {}", e));
    }
}
