// xtrabackup-assistant/src/backup/db_dump.rs
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::Regex;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::catalog::record::{TIMESTAMP_FORMAT, STREAM_EXTENSION};
use crate::catalog::ArtifactName;
use crate::config::{Directories, XtrabackupConfig};
use crate::errors::{AppError, Result};
use crate::utils::echo::Echo;
use crate::utils::move_file;
use crate::utils::process::run_tool;

pub const DUMP_LOG_NAME: &str = "xtrabackup.log";
const AUTHOR: &str = "XtraBackup";
const DISPLAY_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// The raw, compressed dump stream and its log, both in the temp dir.
#[derive(Debug, Clone)]
pub struct DumpOutput {
    pub name: ArtifactName,
    pub stream_path: PathBuf,
    pub log_path: PathBuf,
}

/// Streams a compressed backup of the server into the temp dir.
///
/// Every stderr line of the tool is reformatted, appended to the dump log
/// and echoed. On a non-zero exit the log is moved to
/// `<error_logs>/<timestamp>-error.log` and `AppError::DumpTool` is returned.
pub async fn dump_server(
    xtrabackup_path: &Path,
    xtrabackup: &XtrabackupConfig,
    directories: &Directories,
    name: ArtifactName,
    echo: &Echo,
    cancel: &CancellationToken,
) -> Result<DumpOutput> {
    fs::create_dir_all(&directories.temp)?;

    let stream_path = directories.temp.join(name.with_extension(STREAM_EXTENSION).to_string());
    let log_path = directories.temp.join(DUMP_LOG_NAME);

    let stream_file = File::create(&stream_path)?;
    let mut log_file = File::create(&log_path)?;

    let mut cmd = Command::new(xtrabackup_path);
    cmd.arg("--backup")
        .arg("--stream=xbstream")
        .arg("--compress")
        .arg(format!("--parallel={}", xtrabackup.parallel))
        .arg(format!("--compress-threads={}", xtrabackup.compress_threads))
        .arg(format!("--user={}", xtrabackup.user))
        .arg(format!("--password={}", xtrabackup.password))
        .arg(format!("--host={}", xtrabackup.host))
        .arg(format!("--target-dir={}", directories.temp.display()))
        .stdin(Stdio::null())
        .stdout(Stdio::from(stream_file));

    echo.info("Assistant", format!("Creating backup {}", stream_path.display()));

    let mut log_error = None;
    let result = run_tool(cmd, cancel, |line| {
        let formatted = format_diagnostic_line(line);
        if log_error.is_none() {
            if let Err(e) = writeln!(log_file, "{}", formatted) {
                log_error = Some(e);
            }
        }
        echo.tool_line(AUTHOR, &formatted);
    })
    .await;
    drop(log_file);

    let output = match result {
        Ok(output) => output,
        Err(e) => {
            let _ = fs::remove_file(&stream_path);
            return Err(e);
        }
    };

    if !output.success() {
        let _ = fs::remove_file(&stream_path);
        let error_log_path = directories
            .error_logs
            .join(format!("{}-error.log", name.created_at.format(TIMESTAMP_FORMAT)));
        move_file(&log_path, &error_log_path)?;
        return Err(AppError::DumpTool { log_path: error_log_path });
    }

    if let Some(e) = log_error {
        return Err(AppError::Io(e));
    }

    Ok(DumpOutput {
        name,
        stream_path,
        log_path,
    })
}

/// Normalises one diagnostic line of the dump tool.
///
/// A leading ISO-8601 timestamp, or the version-check `YYMMDD HH:MM:SS`
/// pair, becomes `[YYYY-MM-DD HH:MM:SS]`. Whitespace runs collapse to one
/// space.
pub fn format_diagnostic_line(line: &str) -> String {
    let mut tokens: Vec<String> = line.split_whitespace().map(String::from).collect();
    let Some(first) = tokens.first() else {
        return String::new();
    };

    if let Some(at) = parse_iso8601(first) {
        tokens[0] = format!("[{}]", at.format(DISPLAY_FORMAT));
    } else if let Some(at) = parse_version_check_stamp(line) {
        tokens.splice(0..2, [format!("[{}]", at.format(DISPLAY_FORMAT))]);
    }

    tokens.join(" ")
}

fn parse_iso8601(token: &str) -> Option<NaiveDateTime> {
    if let Ok(at) = DateTime::parse_from_rfc3339(token) {
        return Some(at.naive_local());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(at) = NaiveDateTime::parse_from_str(token, format) {
            return Some(at);
        }
    }
    NaiveDate::parse_from_str(token, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

fn parse_version_check_stamp(line: &str) -> Option<NaiveDateTime> {
    let re = Regex::new(r"^\d{6} \d{2}:\d{2}:\d{2}").ok()?;
    let stamp = re.find(line)?;
    NaiveDateTime::parse_from_str(stamp.as_str(), "%y%m%d %H:%M:%S").ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::process::testing::write_script;
    use tempfile::TempDir;

    fn xtrabackup_config() -> XtrabackupConfig {
        XtrabackupConfig {
            user: "backup".to_string(),
            password: "secret".to_string(),
            host: "127.0.0.1".to_string(),
            parallel: 4,
            compress_threads: 2,
        }
    }

    fn directories(root: &Path) -> Directories {
        Directories {
            backups: root.join("backups"),
            temp: root.join("tmp"),
            restore: root.join("restore"),
            error_logs: root.join("logs"),
        }
    }

    fn name() -> ArtifactName {
        ArtifactName::parse("2023-01-05-10-30_shop_8.0.35-27.tar").unwrap()
    }

    #[test]
    fn test_format_iso_timestamp() {
        assert_eq!(
            format_diagnostic_line("2023-11-20T10:00:01.123456-00:00 0 [Note] [MY-011825] [Xtrabackup] Connecting"),
            "[2023-11-20 10:00:01] 0 [Note] [MY-011825] [Xtrabackup] Connecting"
        );
    }

    #[test]
    fn test_format_version_check_timestamp() {
        assert_eq!(
            format_diagnostic_line("231120 10:00:02 version_check Connecting to MySQL server"),
            "[2023-11-20 10:00:02] version_check Connecting to MySQL server"
        );
    }

    #[test]
    fn test_format_plain_line() {
        assert_eq!(format_diagnostic_line("  xtrabackup:   Transaction log\tof lsn "), "xtrabackup: Transaction log of lsn");
        assert_eq!(format_diagnostic_line("   "), "");
    }

    #[tokio::test]
    async fn test_successful_dump() {
        let root = TempDir::new().unwrap();
        let tool = write_script(
            root.path(),
            "xtrabackup",
            "echo '2023-01-05T10:30:00.000000-00:00 0 [Note] starting' >&2\nprintf 'STREAM:%s' \"$*\"\nexit 0",
        );
        let dirs = directories(root.path());

        let dump = dump_server(&tool, &xtrabackup_config(), &dirs, name(), &Echo::quiet(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(dump.stream_path, dirs.temp.join("2023-01-05-10-30_shop_8.0.35-27.xbstream"));
        let stream = fs::read_to_string(&dump.stream_path).unwrap();
        assert!(stream.contains("--backup --stream=xbstream --compress --parallel=4 --compress-threads=2"));
        assert!(stream.contains("--user=backup --password=secret --host=127.0.0.1"));
        assert_eq!(fs::read_to_string(&dump.log_path).unwrap(), "[2023-01-05 10:30:00] 0 [Note] starting\n");
    }

    #[tokio::test]
    async fn test_latin1_diagnostics_keep_the_dump() {
        let root = TempDir::new().unwrap();
        let tool = write_script(root.path(), "xtrabackup", "printf 'table caf\\351 copied\\n' >&2\nprintf STREAM\nexit 0");
        let dirs = directories(root.path());

        let dump = dump_server(&tool, &xtrabackup_config(), &dirs, name(), &Echo::quiet(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(fs::read_to_string(&dump.stream_path).unwrap(), "STREAM");
        assert_eq!(fs::read_to_string(&dump.log_path).unwrap(), "table caf\u{FFFD} copied\n");
    }

    #[tokio::test]
    async fn test_failed_dump_moves_log_and_skips_archive() {
        let root = TempDir::new().unwrap();
        let tool = write_script(root.path(), "xtrabackup", "echo 'Access denied for user' >&2\nexit 1");
        let dirs = directories(root.path());

        let err = dump_server(&tool, &xtrabackup_config(), &dirs, name(), &Echo::quiet(), &CancellationToken::new())
            .await
            .unwrap_err();

        let expected_log = dirs.error_logs.join("2023-01-05-10-30-error.log");
        match err {
            AppError::DumpTool { log_path } => assert_eq!(log_path, expected_log),
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(fs::read_to_string(&expected_log).unwrap(), "Access denied for user\n");
        assert!(!dirs.temp.join(DUMP_LOG_NAME).exists());
        assert!(!dirs.temp.join("2023-01-05-10-30_shop_8.0.35-27.xbstream").exists());
        assert!(!dirs.backups.exists());
    }
}
