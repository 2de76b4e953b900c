// xtrabackup-assistant/src/backup/archive.rs
use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use tar::{Archive, Builder, Header};
use tokio_util::sync::CancellationToken;

use crate::errors::{AppError, Result};
use crate::utils::progress::{copy_with_progress, ProgressReader, ProgressSink};
use crate::utils::{discard_partial_file, prune_empty_dirs};

/// Creates an uncompressed TAR archive holding the dump stream and its log.
///
/// The parent directory of `archive_dest_path` is created when missing. If
/// packaging fails or is cancelled, the partial archive is deleted and any
/// directory left empty below `store_root` is removed.
///
/// # Arguments
/// * `stream_path` - The raw dump stream.
/// * `log_path` - The dump tool's log, stored next to the stream.
/// * `archive_dest_path` - Where the `.tar` archive will be created.
/// * `store_root` - Root of the date-partitioned backups store.
///
/// # Returns
/// Path to the created archive file.
pub fn create_archive(
    stream_path: &Path,
    log_path: &Path,
    archive_dest_path: &Path,
    store_root: &Path,
    progress: &dyn ProgressSink,
    cancel: &CancellationToken,
) -> Result<PathBuf> {
    if let Some(parent) = archive_dest_path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }

    let total = fs::metadata(stream_path)?.len();
    progress.start("Creating archive...", total);
    let result = write_archive(stream_path, log_path, archive_dest_path, progress, cancel);
    progress.finish();

    if let Err(e) = result {
        let _ = discard_partial_file(archive_dest_path);
        if let Some(parent) = archive_dest_path.parent() {
            let _ = prune_empty_dirs(parent, store_root);
        }
        return Err(AppError::local_io(format!("archiving of {}", archive_dest_path.display()), e));
    }

    Ok(archive_dest_path.to_path_buf())
}

fn write_archive(
    stream_path: &Path,
    log_path: &Path,
    archive_dest_path: &Path,
    progress: &dyn ProgressSink,
    cancel: &CancellationToken,
) -> io::Result<()> {
    let archive_file = File::create(archive_dest_path)?;
    let mut tar_builder = Builder::new(BufWriter::new(archive_file));

    let stream = File::open(stream_path)?;
    let mut header = Header::new_gnu();
    header.set_metadata(&stream.metadata()?);
    let stream_name = file_name(stream_path)?;
    tar_builder.append_data(&mut header, stream_name, ProgressReader::new(stream, progress, cancel))?;

    tar_builder.append_path_with_name(log_path, file_name(log_path)?)?;

    let writer = tar_builder.into_inner()?;
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()
}

fn file_name(path: &Path) -> io::Result<&std::ffi::OsStr> {
    path.file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, format!("{} has no file name", path.display())))
}

/// Copies the single `*.<extension>` member of `archive_path` into
/// `scratch_dir`, returning the extracted file's path.
///
/// # Returns
/// `AppError::ArchiveContents` if no member has the extension.
pub fn extract_member_with_extension(
    archive_path: &Path,
    extension: &str,
    scratch_dir: &Path,
    progress: &dyn ProgressSink,
    cancel: &CancellationToken,
) -> Result<PathBuf> {
    fs::create_dir_all(scratch_dir)?;

    let mut archive = Archive::new(File::open(archive_path)?);
    for entry in archive.entries()? {
        let mut entry = entry?;
        let member_path = entry.path()?.into_owned();
        let Some(member_name) = member_path.file_name() else {
            continue;
        };
        if member_path.extension().is_none_or(|ext| ext != extension) {
            continue;
        }

        let dest_path = scratch_dir.join(member_name);
        progress.start("Extracting archive...", entry.size());
        let copied = File::create(&dest_path)
            .and_then(|mut dest| copy_with_progress(&mut entry, &mut dest, progress, cancel));
        progress.finish();

        return match copied {
            Ok(_) => Ok(dest_path),
            Err(e) => {
                let _ = fs::remove_file(&dest_path);
                Err(AppError::local_io(format!("extraction of {}", archive_path.display()), e))
            }
        };
    }

    Err(AppError::ArchiveContents {
        archive: archive_path.to_path_buf(),
        extension: extension.to_string(),
    })
}
