// xtrabackup-assistant/src/catalog/record.rs
use chrono::{Datelike, NaiveDateTime};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::errors::{AppError, Result};

/// Filename timestamp prefix, e.g. `2023-01-05-10-30`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H-%M";
/// Extension of finished, archived artifacts.
pub const ARCHIVE_EXTENSION: &str = "tar";
/// Extension of the raw dump stream produced by the dump tool.
pub const STREAM_EXTENSION: &str = "xbstream";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Local,
    Remote,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Local => write!(f, "local"),
            Source::Remote => write!(f, "sftp"),
        }
    }
}

/// The parts of `<YYYY-MM-DD-HH-MM>_<project>_<version>.<ext>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactName {
    pub created_at: NaiveDateTime,
    pub project: String,
    pub dump_tool_version: String,
    pub extension: String,
}

impl ArtifactName {
    pub fn new(
        created_at: NaiveDateTime,
        project: impl Into<String>,
        dump_tool_version: impl Into<String>,
        extension: impl Into<String>,
    ) -> Self {
        ArtifactName {
            created_at,
            project: project.into(),
            dump_tool_version: dump_tool_version.into(),
            extension: extension.into(),
        }
    }

    pub fn parse(filename: &str) -> Result<Self> {
        let (stem, extension) = filename
            .rsplit_once('.')
            .filter(|(stem, ext)| !stem.is_empty() && !ext.is_empty())
            .ok_or_else(|| AppError::malformed(filename, "missing file extension"))?;

        let (timestamp, rest) = stem
            .split_once('_')
            .ok_or_else(|| AppError::malformed(filename, "missing '_' separators"))?;
        let (project, version) = rest
            .rsplit_once('_')
            .ok_or_else(|| AppError::malformed(filename, "missing project or version token"))?;

        if project.is_empty() || version.is_empty() {
            return Err(AppError::malformed(filename, "empty project or version token"));
        }

        let created_at = NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT)
            .map_err(|e| AppError::malformed(filename, format!("bad timestamp prefix '{}': {}", timestamp, e)))?;
        // chrono tolerates unpadded fields; the convention does not
        if created_at.format(TIMESTAMP_FORMAT).to_string() != timestamp {
            return Err(AppError::malformed(filename, format!("non-canonical timestamp '{}'", timestamp)));
        }

        Ok(ArtifactName::new(created_at, project, version, extension))
    }

    pub fn stem(&self) -> String {
        format!(
            "{}_{}_{}",
            self.created_at.format(TIMESTAMP_FORMAT),
            self.project,
            self.dump_tool_version
        )
    }

    pub fn with_extension(&self, extension: &str) -> Self {
        ArtifactName {
            extension: extension.to_string(),
            ..self.clone()
        }
    }
}

impl fmt::Display for ArtifactName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.stem(), self.extension)
    }
}

/// One archived backup found on a storage backend.
///
/// Two records are the same artifact iff their filenames are equal,
/// whatever their source.
#[derive(Debug, Clone)]
pub struct BackupRecord {
    source: Source,
    path: PathBuf,
    size_bytes: u64,
    name: ArtifactName,
}

impl BackupRecord {
    pub fn parse(path: impl Into<PathBuf>, source: Source, size_bytes: u64) -> Result<Self> {
        let path = path.into();
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| AppError::malformed(path.display().to_string(), "path has no filename"))?;
        let name = ArtifactName::parse(&filename)?;

        Ok(BackupRecord {
            source,
            path,
            size_bytes,
            name,
        })
    }

    pub fn source(&self) -> Source {
        self.source
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn filename(&self) -> String {
        self.name.to_string()
    }

    pub fn created_at(&self) -> NaiveDateTime {
        self.name.created_at
    }

    pub fn dump_tool_version(&self) -> &str {
        &self.name.dump_tool_version
    }

    /// `<YYYY>/<MM>` partition this artifact belongs to.
    pub fn partition(&self) -> PathBuf {
        partition_for(self.created_at())
    }

    pub fn same_artifact(&self, other: &BackupRecord) -> bool {
        self.filename() == other.filename()
    }
}

/// Year/month directory used by both local and remote stores.
pub fn partition_for(at: NaiveDateTime) -> PathBuf {
    PathBuf::from(format!("{:04}", at.year())).join(format!("{:02}", at.month()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_parse_well_formed_filename() {
        let record = BackupRecord::parse(
            "/data/backups/2023/01/2023-01-05-10-30_shop_8.0.35-27.tar",
            Source::Local,
            1024,
        )
        .unwrap();

        assert_eq!(record.filename(), "2023-01-05-10-30_shop_8.0.35-27.tar");
        assert_eq!(record.dump_tool_version(), "8.0.35-27");
        assert_eq!(
            record.created_at(),
            NaiveDate::from_ymd_opt(2023, 1, 5).unwrap().and_hms_opt(10, 30, 0).unwrap()
        );
        assert_eq!(record.partition(), PathBuf::from("2023/01"));
        assert_eq!(record.size_bytes(), 1024);
    }

    #[test]
    fn test_project_may_contain_underscores() {
        let name = ArtifactName::parse("2023-02-10-00-05_my_shop_db_8.0.34.tar").unwrap();
        assert_eq!(name.project, "my_shop_db");
        assert_eq!(name.dump_tool_version, "8.0.34");
    }

    #[test]
    fn test_round_trip_reproduces_filename() {
        for filename in [
            "2023-01-05-10-30_shop_8.0.35-27.tar",
            "1999-12-31-23-59_a_5.7.44-48.xbstream",
            "2024-02-29-00-00_multi_part_name_8.0.tar",
        ] {
            let parsed = ArtifactName::parse(filename).unwrap();
            let rebuilt = ArtifactName::new(
                parsed.created_at,
                parsed.project.clone(),
                parsed.dump_tool_version.clone(),
                parsed.extension.clone(),
            );
            assert_eq!(rebuilt.to_string(), filename);
        }
    }

    #[test]
    fn test_malformed_names_are_rejected() {
        for filename in [
            "notes.txt",
            "2023-01-05_shop_8.0.35.tar",
            "2023-13-05-10-30_shop_8.0.35.tar",
            "2023-1-5-10-30_shop_8.0.35.tar",
            "2023-01-05-10-30_shop.tar",
            "2023-01-05-10-30_shop_8.",
        ] {
            let result = BackupRecord::parse(filename, Source::Local, 0);
            assert!(
                matches!(result, Err(AppError::MalformedRecord { .. })),
                "expected {} to be rejected",
                filename
            );
        }
    }

    #[test]
    fn test_same_artifact_ignores_source() {
        let local = BackupRecord::parse("/local/2023/01/2023-01-05-10-30_shop_8.0.35.tar", Source::Local, 1).unwrap();
        let remote = BackupRecord::parse("/remote/2023/01/2023-01-05-10-30_shop_8.0.35.tar", Source::Remote, 2).unwrap();
        assert!(local.same_artifact(&remote));
    }

    #[test]
    fn test_with_extension_swaps_only_extension() {
        let stream = ArtifactName::parse("2023-01-05-10-30_shop_8.0.35.xbstream").unwrap();
        assert_eq!(
            stream.with_extension(ARCHIVE_EXTENSION).to_string(),
            "2023-01-05-10-30_shop_8.0.35.tar"
        );
    }
}
