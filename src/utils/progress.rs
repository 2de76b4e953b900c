// xtrabackup-assistant/src/utils/progress.rs
use indicatif::{ProgressBar, ProgressStyle};
use std::fmt;
use std::io::{self, Read, Write};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

const COPY_CHUNK: usize = 64 * 1024;

/// Receives byte-level (or item-level) progress of a long operation.
pub trait ProgressSink: Send + Sync {
    fn start(&self, label: &str, total: u64);
    /// Absolute amount done so far.
    fn update(&self, done: u64);
    fn finish(&self);
}

/// Discards all progress.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn start(&self, _label: &str, _total: u64) {}
    fn update(&self, _done: u64) {}
    fn finish(&self) {}
}

/// Transient terminal progress bar.
pub struct ConsoleProgress {
    author: String,
    bar: Mutex<Option<ProgressBar>>,
}

impl ConsoleProgress {
    pub fn new(author: &str) -> Self {
        ConsoleProgress {
            author: author.to_string(),
            bar: Mutex::new(None),
        }
    }
}

impl ProgressSink for ConsoleProgress {
    fn start(&self, label: &str, total: u64) {
        let bar = ProgressBar::new(total);
        if let Ok(style) = ProgressStyle::with_template(
            "[{prefix}] {spinner} {msg} [{bar:40}] {bytes}/{total_bytes} ({bytes_per_sec})",
        ) {
            bar.set_style(style.progress_chars("=> "));
        }
        bar.set_prefix(self.author.clone());
        bar.set_message(label.to_string());
        if let Ok(mut slot) = self.bar.lock() {
            *slot = Some(bar);
        }
    }

    fn update(&self, done: u64) {
        if let Ok(slot) = self.bar.lock() {
            if let Some(bar) = slot.as_ref() {
                bar.set_position(done);
            }
        }
    }

    fn finish(&self) {
        if let Ok(mut slot) = self.bar.lock() {
            if let Some(bar) = slot.take() {
                bar.finish_and_clear();
            }
        }
    }
}

#[derive(Debug)]
struct TerminateSignal;

impl fmt::Display for TerminateSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "terminate signal received")
    }
}

impl std::error::Error for TerminateSignal {}

/// The error every copy loop returns once cancelled. Not `Interrupted`,
/// which `std::io::copy` and friends silently retry.
pub fn cancelled_io() -> io::Error {
    io::Error::other(TerminateSignal)
}

pub fn is_cancelled_io(err: &io::Error) -> bool {
    err.get_ref().is_some_and(|inner| inner.is::<TerminateSignal>())
}

/// Copies `reader` into `writer` chunk by chunk, reporting progress and
/// checking `cancel` between chunks. Cancellation surfaces as
/// `cancelled_io()`.
pub fn copy_with_progress<R: Read + ?Sized, W: Write + ?Sized>(
    reader: &mut R,
    writer: &mut W,
    progress: &dyn ProgressSink,
    cancel: &CancellationToken,
) -> io::Result<u64> {
    let mut buf = vec![0u8; COPY_CHUNK];
    let mut copied: u64 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(cancelled_io());
        }
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n])?;
        copied += n as u64;
        progress.update(copied);
    }

    writer.flush()?;
    Ok(copied)
}

/// Reader adapter for consumers that pull the data themselves (e.g. the tar
/// builder): reports progress and fails with `cancelled_io()` on cancellation.
pub struct ProgressReader<'a, R> {
    inner: R,
    progress: &'a dyn ProgressSink,
    cancel: &'a CancellationToken,
    done: u64,
}

impl<'a, R: Read> ProgressReader<'a, R> {
    pub fn new(inner: R, progress: &'a dyn ProgressSink, cancel: &'a CancellationToken) -> Self {
        ProgressReader {
            inner,
            progress,
            cancel,
            done: 0,
        }
    }
}

impl<R: Read> Read for ProgressReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.cancel.is_cancelled() {
            return Err(cancelled_io());
        }
        let n = self.inner.read(buf)?;
        self.done += n as u64;
        self.progress.update(self.done);
        Ok(n)
    }
}
