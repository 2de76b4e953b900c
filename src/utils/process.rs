// xtrabackup-assistant/src/utils/process.rs
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::errors::{AppError, Result};

/// What an external tool left behind once it exited.
#[derive(Debug)]
pub struct ToolOutput {
    pub status: ExitStatus,
    /// Captured stderr lines, followed by stdout when the caller piped it.
    pub diagnostics: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

/// Runs `cmd` to completion, handing every stderr line to `on_line` as it
/// arrives.
///
/// Stdout and stdin are left as the caller configured them; a piped stdout
/// is drained into `diagnostics`. When `cancel` fires the child is killed
/// and awaited before `AppError::Cancelled` is returned.
pub async fn run_tool<F>(mut cmd: Command, cancel: &CancellationToken, mut on_line: F) -> Result<ToolOutput>
where
    F: FnMut(&str),
{
    let program = cmd.as_std().get_program().to_string_lossy().to_string();
    cmd.stderr(Stdio::piped()).kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            AppError::ToolMissing(format!("{} executable not found", program))
        } else {
            AppError::Io(e)
        }
    })?;

    let stdout_task = child.stdout.take().map(|mut stdout| {
        tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stdout.read_to_end(&mut buf).await;
            String::from_utf8_lossy(&buf).into_owned()
        })
    });

    let mut diagnostics = String::new();
    if let Some(stderr) = child.stderr.take() {
        let mut lines = BufReader::new(stderr).split(b'\n');
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = child.kill().await;
                    return Err(AppError::Cancelled(format!("{} terminated", program)));
                }
                line = lines.next_segment() => match line? {
                    Some(raw) => {
                        let line = decode_line(&raw);
                        on_line(&line);
                        diagnostics.push_str(&line);
                        diagnostics.push('\n');
                    }
                    None => break,
                },
            }
        }
    }

    let status = tokio::select! {
        _ = cancel.cancelled() => {
            let _ = child.kill().await;
            return Err(AppError::Cancelled(format!("{} terminated", program)));
        }
        status = child.wait() => status?,
    };

    if let Some(task) = stdout_task {
        if let Ok(out) = task.await {
            diagnostics.push_str(&out);
        }
    }

    Ok(ToolOutput { status, diagnostics })
}

/// Tools may print bytes in the server's charset; those are replaced, not fatal.
fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}
