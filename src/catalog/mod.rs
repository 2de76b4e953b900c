// xtrabackup-assistant/src/catalog/mod.rs
//! Backup artifacts and the ordered, de-duplicated catalog over them.

pub(crate) mod discovery;
pub(crate) mod record;
pub(crate) mod version;

pub use record::{ArtifactName, BackupRecord, Source};
pub use version::ToolVersion;

use indicatif::DecimalBytes;
use std::cmp::Ordering;

/// With the release of Percona XtraBackup 8.0.34-29, backups taken on any
/// 8.0.x server are restorable regardless of patch ordering.
fn cross_patch_threshold() -> ToolVersion {
    ToolVersion::new(vec![8, 0, 34], Some(29))
}
const CROSS_PATCH_MAJOR: u64 = 8;
const CROSS_PATCH_MINOR: u64 = 0;

/// Backup records sorted by creation time, newest first, ties by filename.
///
/// Only `insert`/`extend` mutate it; duplicates (by filename) and records
/// the target tool cannot restore are silently dropped.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    records: Vec<BackupRecord>,
    target_version: Option<ToolVersion>,
}

impl Catalog {
    /// A catalog that accepts every record.
    pub fn new() -> Self {
        Catalog::default()
    }

    /// A catalog that only accepts records restorable by `target_version`.
    pub fn for_tool(target_version: ToolVersion) -> Self {
        Catalog {
            records: Vec::new(),
            target_version: Some(target_version),
        }
    }

    /// Returns `true` if the record was added.
    pub fn insert(&mut self, record: BackupRecord) -> bool {
        if self.contains(&record) || !self.is_compatible(&record) {
            return false;
        }
        self.records.push(record);
        self.records.sort_by(catalog_order);
        true
    }

    pub fn extend<I: IntoIterator<Item = BackupRecord>>(&mut self, records: I) {
        for record in records {
            self.insert(record);
        }
    }

    pub fn contains(&self, record: &BackupRecord) -> bool {
        self.records.iter().any(|r| r.same_artifact(record))
    }

    pub fn is_compatible(&self, record: &BackupRecord) -> bool {
        match &self.target_version {
            None => true,
            Some(target) => is_compatible(record.dump_tool_version(), target),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, BackupRecord> {
        self.records.iter()
    }

    /// 1-based lookup matching `numbered()`.
    pub fn get(&self, number: usize) -> Option<&BackupRecord> {
        number.checked_sub(1).and_then(|i| self.records.get(i))
    }

    /// Display numbers for interactive selection, valid until the next insert.
    pub fn numbered(&self) -> Vec<(usize, &BackupRecord)> {
        self.records.iter().enumerate().map(|(i, r)| (i + 1, r)).collect()
    }

    /// Plain-text table of `numbered()`, one row per record.
    pub fn render_table(&self, title: &str) -> String {
        let rows: Vec<[String; 5]> = self
            .numbered()
            .into_iter()
            .map(|(no, r)| {
                [
                    no.to_string(),
                    r.created_at().format("%Y-%m-%d %H:%M").to_string(),
                    r.filename(),
                    DecimalBytes(r.size_bytes()).to_string(),
                    r.source().to_string(),
                ]
            })
            .collect();

        let header = ["No", "Date", "Filename", "Size", "Source"].map(String::from);
        let mut widths = header.clone().map(|h| h.len());
        for row in &rows {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.chars().count());
            }
        }

        let line = |cells: &[String; 5]| {
            cells
                .iter()
                .zip(widths)
                .map(|(cell, width)| format!("{:<width$}", cell, width = width))
                .collect::<Vec<_>>()
                .join(" | ")
        };

        let mut out = format!("{}\n{}\n", title, line(&header));
        out.push_str(&"-".repeat(widths.iter().sum::<usize>() + 3 * (widths.len() - 1)));
        for row in &rows {
            out.push('\n');
            out.push_str(&line(row));
        }
        out
    }
}

impl<'a> IntoIterator for &'a Catalog {
    type Item = &'a BackupRecord;
    type IntoIter = std::slice::Iter<'a, BackupRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

impl FromIterator<BackupRecord> for Catalog {
    fn from_iter<I: IntoIterator<Item = BackupRecord>>(iter: I) -> Self {
        let mut catalog = Catalog::new();
        catalog.extend(iter);
        catalog
    }
}

pub(crate) fn catalog_order(a: &BackupRecord, b: &BackupRecord) -> Ordering {
    b.created_at()
        .cmp(&a.created_at())
        .then_with(|| a.filename().cmp(&b.filename()))
}

/// Whether a backup taken on `record_version` can be restored with `target`.
/// Unparseable record versions are never compatible.
pub fn is_compatible(record_version: &str, target: &ToolVersion) -> bool {
    let Ok(record_version) = record_version.parse::<ToolVersion>() else {
        return false;
    };

    if *target >= cross_patch_threshold()
        && record_version.major() == CROSS_PATCH_MAJOR
        && record_version.minor() == CROSS_PATCH_MINOR
    {
        return true;
    }

    record_version <= *target
}
