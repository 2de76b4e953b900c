// xtrabackup-assistant/src/utils/echo.rs
use chrono::Local;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

use crate::utils::progress::{ConsoleProgress, NoProgress, ProgressSink};

/// Operator-facing output handle.
///
/// Every message is printed as `[author] [time] text` and mirrored as a
/// `tracing` event, which ends up in the primary log once `init_log_file`
/// has run. Clone it freely; a quiet handle only emits the tracing events.
#[derive(Debug, Clone, Default)]
pub struct Echo {
    quiet: bool,
}

impl Echo {
    pub fn new() -> Self {
        Echo { quiet: false }
    }

    /// Handle that never prints, for tests and dry runs.
    pub fn quiet() -> Self {
        Echo { quiet: true }
    }

    pub fn info(&self, author: &str, text: impl AsRef<str>) {
        let text = text.as_ref();
        tracing::info!(author = author, "{}", text);
        self.print(&format!("[{}] [{}] {}", author, now_stamp(), text));
    }

    pub fn success(&self, author: &str, text: impl AsRef<str>) {
        let text = text.as_ref();
        tracing::info!(author = author, "{}", text);
        self.print(&format!("[{}] [{}] ✅ {}", author, now_stamp(), text));
    }

    pub fn warn(&self, author: &str, text: impl AsRef<str>) {
        let text = text.as_ref();
        tracing::warn!(author = author, "{}", text);
        self.print(&format!("[{}] ⚠️ {}", author, text));
    }

    pub fn error(&self, author: &str, text: impl AsRef<str>) {
        let text = text.as_ref();
        tracing::error!(author = author, "{}", text);
        if !self.quiet {
            eprintln!("[{}] ❌ {}", author, text);
        }
    }

    /// A line of external tool output, already carrying its own timestamp.
    pub fn tool_line(&self, author: &str, text: impl AsRef<str>) {
        let text = text.as_ref();
        tracing::info!(author = author, "{}", text);
        self.print(&format!("[{}] {}", author, text));
    }

    /// Progress display for a long step; silent for a quiet handle.
    pub fn progress(&self, author: &str) -> Box<dyn ProgressSink> {
        if self.quiet {
            Box::new(NoProgress)
        } else {
            Box::new(ConsoleProgress::new(author))
        }
    }

    /// Pre-rendered output such as tables; not mirrored to the log.
    pub fn raw(&self, text: impl AsRef<str>) {
        self.print(text.as_ref());
    }

    fn print(&self, line: &str) {
        if !self.quiet {
            println!("{}", line);
        }
    }
}

fn now_stamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Opens the primary log for the lifetime of the process.
///
/// Level comes from `RUST_LOG`, defaulting to `info`.
pub fn init_log_file(log_path: &Path) -> anyhow::Result<()> {
    use anyhow::Context;

    if let Some(parent) = log_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create log directory: {}", parent.display()))?;
        }
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .with_context(|| format!("Failed to open log file: {}", log_path.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install log subscriber: {}", e))?;

    Ok(())
}
