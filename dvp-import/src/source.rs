//! Dated CSV snapshot discovery and reading
//!
//! Snapshot files are named `YYYY-MM-DD.csv`, so sorting by file name is
//! sorting by date. Files are re-opened for every batch and read top to
//! bottom; skipping to an offset means reading and discarding rows.

use chrono::NaiveDate;
use csv::{Reader, ReaderBuilder, StringRecord, StringRecordsIntoIter};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{ImportError, ImportResult};
use crate::mapper::{RawRow, DELEGATE_COLUMN};

/// Extension of snapshot files
pub const SNAPSHOT_EXTENSION: &str = "csv";

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Parse the snapshot date out of a file name such as `2023-01-01.csv`
pub fn parse_snapshot_date(file_name: &str) -> ImportResult<NaiveDate> {
    let stem = file_name
        .strip_suffix(&format!(".{}", SNAPSHOT_EXTENSION))
        .unwrap_or(file_name);

    NaiveDate::parse_from_str(stem, DATE_FORMAT)
        .map_err(|_| ImportError::InvalidFileName(file_name.to_string()))
}

/// One dated snapshot on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotFile {
    pub path: PathBuf,
    /// Bare file name, used as the checkpoint key
    pub file_name: String,
    /// Date every record in the file is stamped with
    pub date: NaiveDate,
}

impl SnapshotFile {
    pub fn from_path(path: &Path) -> ImportResult<Self> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ImportError::InvalidFileName(path.display().to_string()))?
            .to_string();
        let date = parse_snapshot_date(&file_name)?;

        Ok(Self {
            path: path.to_path_buf(),
            file_name,
            date,
        })
    }

    /// Number of data rows (header excluded)
    pub fn count_rows(&self) -> ImportResult<u64> {
        let mut reader = self.open()?;
        let mut count = 0u64;
        let mut record = StringRecord::new();
        while reader.read_record(&mut record)? {
            count += 1;
        }
        Ok(count)
    }

    /// Open the file and position the reader after `offset` data rows
    pub fn rows_from(&self, offset: u64) -> ImportResult<SnapshotRows> {
        let mut reader = self.open()?;
        let headers = reader.headers()?.clone();

        if !headers.iter().any(|h| h == DELEGATE_COLUMN) {
            return Err(ImportError::MissingColumn {
                path: self.path.clone(),
                column: DELEGATE_COLUMN.to_string(),
            });
        }

        let mut records = reader.into_records();
        for _ in 0..offset {
            match records.next() {
                Some(record) => {
                    record?;
                }
                None => break,
            }
        }

        Ok(SnapshotRows { headers, records })
    }

    fn open(&self) -> ImportResult<Reader<File>> {
        // Short or long rows are tolerated; missing cells read as absent
        Ok(ReaderBuilder::new().flexible(true).from_path(&self.path)?)
    }
}

/// Rows of a snapshot, keyed by header
pub struct SnapshotRows {
    headers: StringRecord,
    records: StringRecordsIntoIter<File>,
}

impl Iterator for SnapshotRows {
    type Item = ImportResult<RawRow>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = match self.records.next()? {
            Ok(record) => record,
            Err(e) => return Some(Err(e.into())),
        };

        Some(Ok(self
            .headers
            .iter()
            .zip(record.iter())
            .map(|(header, cell)| (header.to_string(), cell.to_string()))
            .collect()))
    }
}

/// List snapshot files directly inside `dir`, oldest first
///
/// Files without the snapshot extension are ignored; files with it whose
/// name is not a date are skipped with a warning.
pub fn list_snapshot_files(dir: &Path) -> ImportResult<Vec<SnapshotFile>> {
    if !dir.is_dir() {
        return Err(ImportError::DirectoryNotFound(dir.to_path_buf()));
    }

    let mut files = Vec::new();

    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Error accessing entry: {}", e);
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(SNAPSHOT_EXTENSION) {
            continue;
        }

        match SnapshotFile::from_path(path) {
            Ok(file) => files.push(file),
            Err(e) => warn!("Skipping {}: {}", path.display(), e),
        }
    }

    files.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    debug!("Found {} snapshot files in {}", files.len(), dir.display());

    Ok(files)
}
