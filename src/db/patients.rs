use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Deserializer, Serialize};

use super::{CsvFile, StoreError};

pub const PATIENTS_HEADER: &[&str] = &[
    "patient_id",
    "full_name",
    "document_id",
    "F",
    "contact_email",
    "registration_date",
    "age",
    "sex",
    "clinical_notes",
    "checksum_fasta",
    "file_size_bytes",
    "fasta_path",
    "active",
];

/// One row of the patient table. Field order is the column order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientRecord {
    pub patient_id: String,
    pub full_name: String,
    pub document_id: String,
    #[serde(rename = "F")]
    pub disease_id: String,
    pub contact_email: String,
    pub registration_date: String,
    pub age: String,
    pub sex: String,
    pub clinical_notes: String,
    pub checksum_fasta: String,
    pub file_size_bytes: String,
    pub fasta_path: String,
    #[serde(deserialize_with = "active_flag")]
    pub active: bool,
}

/// Anything but a case-insensitive `false` counts as active.
fn active_flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    let raw = String::deserialize(deserializer)?;

    Ok(!raw.trim().eq_ignore_ascii_case("false"))
}

impl PatientRecord {
    pub fn new(patient_id: impl Into<String>) -> PatientRecord {
        PatientRecord {
            patient_id: patient_id.into(),
            full_name: String::new(),
            document_id: String::new(),
            disease_id: String::new(),
            contact_email: String::new(),
            registration_date: String::new(),
            age: String::new(),
            sex: String::new(),
            clinical_notes: String::new(),
            checksum_fasta: String::new(),
            file_size_bytes: String::new(),
            fasta_path: String::new(),
            active: true,
        }
    }
}

/// The patient table. Scans take the read side of the lock; appends and
/// full rewrites take the write side, so a reader never sees a half
/// rewritten file and two writers never interleave.
#[derive(Debug, Clone)]
pub struct PatientTable {
    file: Arc<CsvFile>,
    lock: Arc<RwLock<()>>,
}

impl PatientTable {
    pub fn new(path: &Path) -> PatientTable {
        PatientTable {
            file: Arc::new(CsvFile::new(path, PATIENTS_HEADER)),
            lock: Arc::new(RwLock::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn ensure_header(&self) -> Result<(), StoreError> {
        let _guard = self.lock.write().unwrap_or_else(PoisonError::into_inner);
        self.file.ensure_header()
    }

    /// Linear scan for `patient_id`. Read failures look like a missing row.
    pub fn find(&self, patient_id: &str) -> Option<PatientRecord> {
        let _guard = self.lock.read().unwrap_or_else(PoisonError::into_inner);

        self.file
            .rows::<PatientRecord>()
            .into_iter()
            .find(|row| row.patient_id == patient_id)
    }

    pub fn all(&self) -> Vec<PatientRecord> {
        let _guard = self.lock.read().unwrap_or_else(PoisonError::into_inner);
        self.file.rows()
    }

    /// Appends `record` unless a row with the same id already exists.
    pub fn insert(&self, record: &PatientRecord) -> Result<(), StoreError> {
        self.insert_with(&mut record.clone(), |_| Ok::<_, StoreError>(()))
    }

    /// Checks that the id is free, lets `prepare` finish the record and
    /// appends it, all under the write lock. Side effects keyed by the
    /// patient id belong in `prepare`, so a losing duplicate never gets to
    /// run them. `prepare` must not touch this table.
    ///
    /// An error from `prepare` leaves the table untouched.
    pub fn insert_with<F, E>(&self, record: &mut PatientRecord, prepare: F) -> Result<(), E>
    where
        F: FnOnce(&mut PatientRecord) -> Result<(), E>,
        E: From<StoreError>,
    {
        let _guard = self.lock.write().unwrap_or_else(PoisonError::into_inner);

        let exists = self
            .file
            .rows::<PatientRecord>()
            .iter()
            .any(|row| row.patient_id == record.patient_id);

        if exists {
            return Err(StoreError::Duplicate(record.patient_id.clone()).into());
        }

        prepare(record)?;

        self.file.append(&*record)?;

        Ok(())
    }

    /// Reads the whole table, lets `mutate` change the matching row and
    /// rewrites the file, all under the write lock.
    ///
    /// Returns `Ok(false)` when no row matches. An error from `mutate`
    /// aborts the update and leaves the file untouched.
    pub fn update<F, E>(&self, patient_id: &str, mutate: F) -> Result<bool, E>
    where
        F: FnOnce(&mut PatientRecord) -> Result<(), E>,
        E: From<StoreError>,
    {
        let _guard = self.lock.write().unwrap_or_else(PoisonError::into_inner);

        let mut rows: Vec<PatientRecord> = self.file.rows();

        let Some(row) = rows.iter_mut().find(|row| row.patient_id == patient_id) else {
            return Ok(false);
        };

        mutate(row)?;

        self.file.rewrite(&rows)?;

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn table() -> (tempfile::TempDir, PatientTable) {
        let dir = tempfile::tempdir().unwrap();
        let table = PatientTable::new(&dir.path().join("nested").join("patients.csv"));
        table.ensure_header().unwrap();
        (dir, table)
    }

    fn patient(id: &str, name: &str) -> PatientRecord {
        let mut record = PatientRecord::new(id);
        record.full_name = name.to_string();
        record.document_id = format!("DOC-{id}");
        record
    }

    #[test]
    fn header_is_written_once() {
        let (_dir, table) = table();
        table.ensure_header().unwrap();

        let content = fs::read_to_string(table.path()).unwrap();
        assert_eq!(content, format!("{}\n", PATIENTS_HEADER.join(",")));
    }

    #[test]
    fn quoted_fields_survive_a_round_trip() {
        let (_dir, table) = table();
        let mut record = patient("P-1", "Doe, \"Jane\"");
        record.clinical_notes = "line one, line two".to_string();

        table.insert(&record).unwrap();

        let raw = fs::read_to_string(table.path()).unwrap();
        assert!(raw.contains("\"Doe, \"\"Jane\"\"\""));
        assert_eq!(table.find("P-1"), Some(record));
    }

    #[test]
    fn find_misses_unknown_ids() {
        let (_dir, table) = table();
        table.insert(&patient("P-1", "Ana")).unwrap();

        assert!(table.find("P-2").is_none());
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let table = PatientTable::new(&dir.path().join("absent.csv"));

        assert!(table.find("P-1").is_none());
        assert!(table.all().is_empty());
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let (_dir, table) = table();
        table.insert(&patient("P-1", "Ana")).unwrap();

        let err = table.insert(&patient("P-1", "Other")).unwrap_err();

        assert!(matches!(err, StoreError::Duplicate(id) if id == "P-1"));
        assert_eq!(table.all().len(), 1);
    }

    #[test]
    fn duplicate_insert_skips_prepare() {
        let (_dir, table) = table();
        table.insert(&patient("P-1", "Ana")).unwrap();

        let mut ran = false;
        let err = table
            .insert_with(&mut patient("P-1", "Other"), |_| {
                ran = true;
                Ok::<_, StoreError>(())
            })
            .unwrap_err();

        assert!(matches!(err, StoreError::Duplicate(_)));
        assert!(!ran);
    }

    #[test]
    fn prepare_fills_the_row_before_append() {
        let (_dir, table) = table();

        table
            .insert_with(&mut patient("P-1", "Ana"), |row| {
                row.checksum_fasta = "abc".to_string();
                Ok::<_, StoreError>(())
            })
            .unwrap();

        assert_eq!(table.find("P-1").unwrap().checksum_fasta, "abc");
    }

    #[test]
    fn failed_prepare_appends_nothing() {
        let (_dir, table) = table();

        let result = table.insert_with(&mut patient("P-1", "Ana"), |_| {
            Err(StoreError::Duplicate("P-1".to_string()))
        });

        assert!(result.is_err());
        assert!(table.all().is_empty());
    }

    #[test]
    fn update_rewrites_only_the_target_row() {
        let (_dir, table) = table();
        table.insert(&patient("P-1", "Ana")).unwrap();
        table.insert(&patient("P-2", "Ben")).unwrap();

        let updated = table
            .update("P-2", |row| {
                row.full_name = "Benjamin".to_string();
                Ok::<_, StoreError>(())
            })
            .unwrap();

        assert!(updated);
        assert_eq!(table.find("P-1").unwrap().full_name, "Ana");
        assert_eq!(table.find("P-2").unwrap().full_name, "Benjamin");

        let content = fs::read_to_string(table.path()).unwrap();
        assert!(content.starts_with(&PATIENTS_HEADER.join(",")));
        assert_eq!(content.lines().count(), 3);
    }

    #[test]
    fn update_of_unknown_id_reports_false() {
        let (_dir, table) = table();

        let updated = table.update("P-9", |_| Ok::<_, StoreError>(())).unwrap();

        assert!(!updated);
    }

    #[test]
    fn rejected_update_leaves_row_alone() {
        let (_dir, table) = table();
        table.insert(&patient("P-1", "Ana")).unwrap();

        let result = table.update("P-1", |row| {
            row.full_name = "changed".to_string();
            Err(StoreError::Duplicate("P-1".to_string()))
        });

        assert!(result.is_err());
        assert_eq!(table.find("P-1").unwrap().full_name, "Ana");
    }

    #[test]
    fn inactive_flag_round_trips() {
        let (_dir, table) = table();
        let mut record = patient("P-1", "Ana");
        record.active = false;
        table.insert(&record).unwrap();

        assert!(!table.find("P-1").unwrap().active);
    }

    #[test]
    fn malformed_rows_are_skipped() {
        let (_dir, table) = table();
        table.insert(&patient("P-1", "Ana")).unwrap();
        fs::OpenOptions::new()
            .append(true)
            .open(table.path())
            .and_then(|mut f| std::io::Write::write_all(&mut f, b"P-2,too,few\n"))
            .unwrap();
        table.insert(&patient("P-3", "Cy")).unwrap();

        let ids: Vec<String> = table.all().into_iter().map(|r| r.patient_id).collect();
        assert_eq!(ids, vec!["P-1", "P-3"]);
    }
}
