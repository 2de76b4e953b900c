// xtrabackup-assistant/src/restore/logic.rs
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::backup::archive::extract_member_with_extension;
use crate::backup::db_dump::format_diagnostic_line;
use crate::catalog::discovery::{local_records, remote_records};
use crate::catalog::record::STREAM_EXTENSION;
use crate::catalog::{BackupRecord, Catalog, Source, ToolVersion};
use crate::config::AppConfig;
use crate::errors::{AppError, Result};
use crate::transfer::TransferClient;
use crate::utils::clear_dir;
use crate::utils::echo::Echo;
use crate::utils::environment::Toolset;
use crate::utils::process::run_tool;
use crate::utils::progress::ProgressSink;

const AUTHOR: &str = "Assistant";
const TOOL_AUTHOR: &str = "XtraBackup";

const DECOMPRESS_POLL_INTERVAL: Duration = Duration::from_millis(500);
const COMPRESSED_SUFFIXES: [&str; 3] = ["qp", "zst", "lz4"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreStage {
    Listing,
    Selecting,
    Fetching,
    ExtractingArchive,
    ExtractingInnerStream,
    Decompressing,
    Preparing,
}

impl fmt::Display for RestoreStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RestoreStage::Listing => "listing",
            RestoreStage::Selecting => "selecting",
            RestoreStage::Fetching => "fetching",
            RestoreStage::ExtractingArchive => "extracting archive",
            RestoreStage::ExtractingInnerStream => "extracting xbstream",
            RestoreStage::Decompressing => "decompressing",
            RestoreStage::Preparing => "preparing",
        };
        write!(f, "{}", name)
    }
}

/// Picks one backup out of a non-empty catalog by its 1-based number.
pub trait Selector {
    async fn select(&mut self, catalog: &Catalog) -> Result<usize>;
}

/// Asks the operator on stdin until a listed number is typed.
///
/// Stdin is read on a detached thread so a pending read never holds up a
/// cancelled run.
pub struct PromptSelector {
    cancel: CancellationToken,
    input: Option<mpsc::UnboundedReceiver<io::Result<String>>>,
}

impl PromptSelector {
    pub fn new(cancel: CancellationToken) -> Self {
        PromptSelector { cancel, input: None }
    }

    #[cfg(test)]
    fn with_input(cancel: CancellationToken, input: mpsc::UnboundedReceiver<io::Result<String>>) -> Self {
        PromptSelector {
            cancel,
            input: Some(input),
        }
    }

    fn input(&mut self) -> &mut mpsc::UnboundedReceiver<io::Result<String>> {
        self.input.get_or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            thread::spawn(move || {
                for line in io::stdin().lock().lines() {
                    let failed = line.is_err();
                    if tx.send(line).is_err() || failed {
                        break;
                    }
                }
            });
            rx
        })
    }
}

impl Selector for PromptSelector {
    async fn select(&mut self, catalog: &Catalog) -> Result<usize> {
        let cancel = self.cancel.clone();
        loop {
            print!("Enter backup number to restore [1-{}]: ", catalog.len());
            io::stdout().flush()?;

            let input = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                line = self.input().recv() => line,
            };
            let input = match input {
                Some(line) => line?,
                None => {
                    println!();
                    return Err(AppError::Cancelled("backup selection aborted".to_string()));
                }
            };
            match input.trim().parse::<usize>() {
                Ok(number) if catalog.get(number).is_some() => return Ok(number),
                _ => println!("❌ Invalid choice '{}'.", input.trim()),
            }
        }
    }
}

/// Remote storage taking part in listing and fetching.
pub struct RemoteSource<'a> {
    pub client: &'a mut TransferClient,
    pub root: &'a Path,
}

#[derive(Debug)]
pub enum RestoreOutcome {
    /// Neither store holds a backup this xtrabackup can read.
    NothingAvailable,
    Restored { record: BackupRecord, restore_dir: PathBuf },
}

/// Select, fetch, unpack, decompress and prepare one backup.
///
/// Every stage from archive extraction on is compensated by clearing the
/// restore directory, so a retry always starts from a clean slate.
pub struct RestoreSaga<'a> {
    config: &'a AppConfig,
    tools: &'a Toolset,
    echo: &'a Echo,
    cancel: &'a CancellationToken,
}

impl<'a> RestoreSaga<'a> {
    pub fn new(config: &'a AppConfig, tools: &'a Toolset, echo: &'a Echo, cancel: &'a CancellationToken) -> Self {
        RestoreSaga {
            config,
            tools,
            echo,
            cancel,
        }
    }

    pub async fn run(
        &self,
        target_version: ToolVersion,
        mut remote: Option<RemoteSource<'_>>,
        selector: &mut impl Selector,
    ) -> Result<RestoreOutcome> {
        let catalog = self
            .list(target_version, remote.as_mut())
            .inspect_err(|e| self.failed(RestoreStage::Listing, e))?;

        let Some(selected) = self
            .select(&catalog, selector)
            .await
            .inspect_err(|e| self.failed(RestoreStage::Selecting, e))?
        else {
            return Ok(RestoreOutcome::NothingAvailable);
        };

        let local = match selected.source() {
            Source::Local => selected,
            Source::Remote => self
                .fetch(&selected, remote.as_mut())
                .inspect_err(|e| self.failed(RestoreStage::Fetching, e))?,
        };

        let restore_dir = self.config.directories.restore.clone();
        if let Err((stage, err)) = self.unpack(&local).await {
            self.failed(stage, &err);
            self.echo.info(AUTHOR, "Error or terminate signal received. Cleaning up....");
            if let Err(cleanup_err) = clear_dir(&restore_dir) {
                self.echo.warn(
                    AUTHOR,
                    format!("Failed to clear {}: {}", restore_dir.display(), cleanup_err),
                );
            }
            return Err(err);
        }

        self.echo.success(
            AUTHOR,
            format!("Backup {} restored into {}", local.filename(), restore_dir.display()),
        );
        Ok(RestoreOutcome::Restored {
            record: local,
            restore_dir,
        })
    }

    /// Local archives plus, when reachable, remote ones. A remote listing
    /// failure only drops the remote candidates.
    pub fn list(&self, target_version: ToolVersion, remote: Option<&mut RemoteSource<'_>>) -> Result<Catalog> {
        let mut catalog = Catalog::for_tool(target_version);
        catalog.extend(local_records(&self.config.directories.backups, self.echo)?);

        if let Some(remote) = remote {
            match remote_records(remote.client, remote.root, self.echo) {
                Ok(records) => catalog.extend(records),
                Err(e) => self.echo.warn(
                    AUTHOR,
                    format!("Remote backups are not available, listing local ones only: {}", e),
                ),
            }
        }
        Ok(catalog)
    }

    async fn select(&self, catalog: &Catalog, selector: &mut impl Selector) -> Result<Option<BackupRecord>> {
        if catalog.is_empty() {
            self.echo.warn(AUTHOR, "Not found available backups.");
            return Ok(None);
        }

        self.echo.raw(catalog.render_table("Available backups"));
        let number = selector.select(catalog).await?;
        let record = catalog.get(number).cloned().ok_or(AppError::InvalidSelection(number))?;
        self.echo.info(AUTHOR, format!("Selected backup: {}", record.filename()));
        Ok(Some(record))
    }

    /// Downloads a remote archive into the matching local partition.
    fn fetch(&self, record: &BackupRecord, remote: Option<&mut RemoteSource<'_>>) -> Result<BackupRecord> {
        let remote = remote.ok_or_else(|| AppError::Connection {
            target: record.path().display().to_string(),
            source: io::Error::new(io::ErrorKind::NotConnected, "remote storage is not connected"),
        })?;

        let local_path = self
            .config
            .directories
            .backups
            .join(record.partition())
            .join(record.filename());

        let progress = self.echo.progress("SFTP");
        let size = remote.client.download(record.path(), &local_path, progress.as_ref())?;
        self.echo.success("SFTP", format!("Downloaded {}", record.filename()));

        BackupRecord::parse(local_path, Source::Local, size)
    }

    async fn unpack(&self, local: &BackupRecord) -> std::result::Result<(), (RestoreStage, AppError)> {
        let restore_dir = &self.config.directories.restore;
        let prepare_dir = || -> Result<()> {
            clear_dir(restore_dir)?;
            fs::create_dir_all(restore_dir)?;
            Ok(())
        };
        prepare_dir().map_err(|e| (RestoreStage::ExtractingArchive, e))?;

        let stream = self
            .extract_archive(local)
            .map_err(|e| (RestoreStage::ExtractingArchive, e))?;
        let extracted = self.extract_stream(&stream).await;
        if let Err(e) = fs::remove_file(&stream) {
            tracing::warn!("failed to remove {}: {}", stream.display(), e);
        }
        extracted.map_err(|e| (RestoreStage::ExtractingInnerStream, e))?;

        self.decompress().await.map_err(|e| (RestoreStage::Decompressing, e))?;
        self.prepare().await.map_err(|e| (RestoreStage::Preparing, e))
    }

    /// Copies the `.xbstream` member into the temp dir.
    fn extract_archive(&self, local: &BackupRecord) -> Result<PathBuf> {
        self.echo.info("tar", format!("Extracting {}", local.filename()));
        let progress = self.echo.progress("tar");
        extract_member_with_extension(
            local.path(),
            STREAM_EXTENSION,
            &self.config.directories.temp,
            progress.as_ref(),
            self.cancel,
        )
    }

    async fn extract_stream(&self, stream: &Path) -> Result<()> {
        self.echo.info("xbstream", "Extracting xbstream...");
        let mut cmd = Command::new(&self.tools.xbstream);
        cmd.arg("-x")
            .arg(format!("--parallel={}", self.config.xtrabackup.parallel))
            .arg(format!("--directory={}", self.config.directories.restore.display()))
            .stdin(Stdio::from(File::open(stream)?))
            .stdout(Stdio::piped());

        let output = run_tool(cmd, self.cancel, |line| self.echo.tool_line("xbstream", line)).await?;
        if !output.success() {
            return Err(AppError::StreamExtraction(output.diagnostics.trim().to_string()));
        }
        Ok(())
    }

    async fn decompress(&self) -> Result<()> {
        let restore_dir = self.config.directories.restore.clone();
        let total = count_compressed(&restore_dir);
        self.echo.info(TOOL_AUTHOR, format!("Decompressing {} files...", total));

        let progress: Arc<dyn ProgressSink> = Arc::from(self.echo.progress(TOOL_AUTHOR));
        progress.start("Decompressing...", total);
        let stop = self.cancel.child_token();
        let poller = tokio::spawn(track_decompression(
            restore_dir.clone(),
            total,
            Arc::clone(&progress),
            stop.clone(),
        ));

        let mut cmd = Command::new(&self.tools.xtrabackup);
        cmd.arg("--decompress")
            .arg(format!("--parallel={}", self.config.xtrabackup.parallel))
            .arg("--remove-original")
            .arg(format!("--target-dir={}", restore_dir.display()))
            .stdout(Stdio::piped());
        let output = run_tool(cmd, self.cancel, |line| self.tool_line(line)).await;

        stop.cancel();
        if let Err(e) = poller.await {
            tracing::warn!("decompression progress poller failed: {}", e);
        }
        if output.as_ref().is_ok_and(|o| o.success()) {
            progress.update(total);
        }
        progress.finish();

        let output = output?;
        if !output.success() {
            return Err(AppError::Decompression(output.diagnostics.trim().to_string()));
        }
        Ok(())
    }

    async fn prepare(&self) -> Result<()> {
        self.echo.info(TOOL_AUTHOR, "Preparing backup...");
        let mut cmd = Command::new(&self.tools.xtrabackup);
        cmd.arg("--prepare")
            .arg(format!("--target-dir={}", self.config.directories.restore.display()))
            .stdout(Stdio::piped());

        let output = run_tool(cmd, self.cancel, |line| self.tool_line(line)).await?;
        if !output.success() {
            return Err(AppError::Prepare(output.diagnostics.trim().to_string()));
        }
        Ok(())
    }

    fn tool_line(&self, line: &str) {
        self.echo.tool_line(TOOL_AUTHOR, format_diagnostic_line(line));
    }

    fn failed(&self, stage: RestoreStage, err: &AppError) {
        if !err.is_cancelled() {
            tracing::error!(stage = %stage, "restore failed: {}", err);
        }
    }
}

/// Files still carrying a compression suffix under `dir`.
fn count_compressed(dir: &Path) -> u64 {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| COMPRESSED_SUFFIXES.contains(&ext))
        })
        .count() as u64
}

async fn track_decompression(dir: PathBuf, total: u64, progress: Arc<dyn ProgressSink>, stop: CancellationToken) {
    let mut ticker = tokio::time::interval(DECOMPRESS_POLL_INTERVAL);
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {
                let remaining = count_compressed(&dir);
                progress.update(total.saturating_sub(remaining));
                if remaining == 0 {
                    break;
                }
            }
        }
    }
}
