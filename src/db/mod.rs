//! Flat-file record store.
//!
//! Each table is one CSV file with a fixed header written on first use.
//! The patient table is rewritten in full on every update, so all of its
//! mutations go through a single lock; the detection table is only ever
//! appended to, one whole line per write.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};

use serde::de::DeserializeOwned;
use serde::Serialize;

mod detections;
mod patients;

pub use detections::{DetectionRecord, DetectionTable, DETECTIONS_HEADER};
pub use patients::{PatientRecord, PatientTable, PATIENTS_HEADER};

use crate::config::DataPaths;
use crate::sequence::SequenceStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("CSV error on {path}: {source}")]
    Csv {
        path: String,
        #[source]
        source: csv::Error,
    },
    #[error("patient {0} already exists")]
    Duplicate(String),
}

/// Shared handle to every table the server persists.
#[derive(Debug, Clone)]
pub struct Db {
    pub patients: PatientTable,
    pub detections: DetectionTable,
    pub sequences: SequenceStore,
}

impl Db {
    /// Opens the tables under `paths`, creating directories and headers that
    /// do not exist yet.
    pub fn open(paths: &DataPaths) -> Result<Db, StoreError> {
        let db = Db {
            patients: PatientTable::new(&paths.patients_csv),
            detections: DetectionTable::new(&paths.detections_csv),
            sequences: SequenceStore::new(&paths.fasta_dir),
        };

        db.patients.ensure_header()?;
        db.detections.ensure_header()?;
        db.sequences.ensure_dir().map_err(|source| StoreError::Io {
            path: paths.fasta_dir.display().to_string(),
            source,
        })?;

        Ok(db)
    }
}

/// One CSV file with a fixed column header.
#[derive(Debug)]
pub(crate) struct CsvFile {
    path: PathBuf,
    header: &'static [&'static str],
}

impl CsvFile {
    pub(crate) fn new(path: impl Into<PathBuf>, header: &'static [&'static str]) -> CsvFile {
        CsvFile {
            path: path.into(),
            header,
        }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }

    fn csv_err(&self, source: csv::Error) -> StoreError {
        StoreError::Csv {
            path: self.path.display().to_string(),
            source,
        }
    }

    pub(crate) fn ensure_header(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
        }

        let empty = match fs::metadata(&self.path) {
            Ok(meta) => meta.len() == 0,
            Err(_) => true,
        };

        if empty {
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .map_err(|e| self.io_err(e))?;
            file.write_all(&self.header_line()?)
                .map_err(|e| self.io_err(e))?;

            tracing::info!(path = %self.path.display(), "created table with header");
        }

        Ok(())
    }

    fn header_line(&self) -> Result<Vec<u8>, StoreError> {
        let mut wtr = line_writer(Vec::new());
        wtr.write_record(self.header).map_err(|e| self.csv_err(e))?;
        wtr.into_inner().map_err(|e| self.io_err(e.into_error()))
    }

    /// Appends one row as a single write on an append-mode handle.
    pub(crate) fn append<T: Serialize>(&self, row: &T) -> Result<(), StoreError> {
        self.ensure_header()?;

        let mut wtr = line_writer(Vec::new());
        wtr.serialize(row).map_err(|e| self.csv_err(e))?;
        let line = wtr.into_inner().map_err(|e| self.io_err(e.into_error()))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io_err(e))?;

        file.write_all(&line).map_err(|e| self.io_err(e))
    }

    /// Every well-formed row. Unreadable files read as empty tables and
    /// malformed rows are skipped.
    pub(crate) fn rows<T: DeserializeOwned>(&self) -> Vec<T> {
        let mut reader = match csv::ReaderBuilder::new().has_headers(true).from_path(&self.path) {
            Ok(reader) => reader,
            Err(err) => {
                tracing::warn!(
                    path = %self.path.display(),
                    %err,
                    "table unreadable, treating as empty"
                );
                return Vec::new();
            }
        };

        reader
            .deserialize()
            .filter_map(|row| match row {
                Ok(row) => Some(row),
                Err(err) => {
                    tracing::debug!(path = %self.path.display(), %err, "skipping malformed row");
                    None
                }
            })
            .collect()
    }

    /// Replaces the file with the header plus `rows`. The new content is
    /// written beside the table and renamed over it.
    pub(crate) fn rewrite<T: Serialize>(&self, rows: &[T]) -> Result<(), StoreError> {
        let mut wtr = line_writer(Vec::new());
        wtr.write_record(self.header).map_err(|e| self.csv_err(e))?;
        for row in rows {
            wtr.serialize(row).map_err(|e| self.csv_err(e))?;
        }
        let content = wtr.into_inner().map_err(|e| self.io_err(e.into_error()))?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, &content).map_err(|e| self.io_err(e))?;
        fs::rename(&tmp, &self.path).map_err(|e| self.io_err(e))
    }
}

fn line_writer<W: Write>(inner: W) -> csv::Writer<W> {
    csv::WriterBuilder::new()
        .has_headers(false)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(inner)
}

/// Time-derived ids (`<prefix><epoch millis>`), bumped so that two ids
/// handed out within the same millisecond never collide.
#[derive(Debug)]
pub struct IdGenerator {
    prefix: &'static str,
    last: AtomicI64,
}

impl IdGenerator {
    pub const fn new(prefix: &'static str) -> IdGenerator {
        IdGenerator {
            prefix,
            last: AtomicI64::new(0),
        }
    }

    pub fn next_id(&self) -> String {
        let now = chrono::Utc::now().timestamp_millis();

        let prev = self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(if now > last { now } else { last + 1 })
            })
            .unwrap_or(now);

        let id = if now > prev { now } else { prev + 1 };

        format!("{}{}", self.prefix, id)
    }
}

pub static PATIENT_IDS: IdGenerator = IdGenerator::new("P-");
pub static DETECTION_IDS: IdGenerator = IdGenerator::new("D-");

/// Local ISO-8601 timestamp with millisecond precision.
pub fn now_iso() -> String {
    chrono::Local::now()
        .format("%Y-%m-%dT%H:%M:%S%.3f")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn ids_stay_unique_within_a_millisecond() {
        let ids = IdGenerator::new("X-");

        let generated: HashSet<String> = (0..1000).map(|_| ids.next_id()).collect();

        assert_eq!(generated.len(), 1000);
        assert!(generated.iter().all(|id| id.starts_with("X-")));
    }

    #[test]
    fn ids_are_unique_across_threads() {
        let ids = std::sync::Arc::new(IdGenerator::new("P-"));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let ids = ids.clone();
                std::thread::spawn(move || (0..250).map(|_| ids.next_id()).collect::<Vec<_>>())
            })
            .collect();

        let all: HashSet<String> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();

        assert_eq!(all.len(), 1000);
    }

    #[test]
    fn timestamp_is_iso_local() {
        let ts = now_iso();

        assert_eq!(ts.len(), "2024-01-01T00:00:00.000".len());
        assert_eq!(&ts[10..11], "T");
    }
}
