use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{CsvFile, StoreError};

pub const DETECTIONS_HEADER: &[&str] = &[
    "detection_id",
    "patient_id",
    "disease_id",
    "disease_name",
    "pattern",
    "created_at",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub detection_id: String,
    pub patient_id: String,
    pub disease_id: String,
    pub disease_name: String,
    pub pattern: String,
    pub created_at: String,
}

/// Append-only detection log. Rows are never rewritten, so appends need no
/// table lock: each row lands with a single write on an append handle.
#[derive(Debug, Clone)]
pub struct DetectionTable {
    file: Arc<CsvFile>,
}

impl DetectionTable {
    pub fn new(path: &Path) -> DetectionTable {
        DetectionTable {
            file: Arc::new(CsvFile::new(path, DETECTIONS_HEADER)),
        }
    }

    pub fn ensure_header(&self) -> Result<(), StoreError> {
        self.file.ensure_header()
    }

    pub fn append(&self, record: &DetectionRecord) -> Result<(), StoreError> {
        self.file.append(record)
    }

    /// Detections recorded for `patient_id`, in the order they were written.
    pub fn by_patient(&self, patient_id: &str) -> Vec<DetectionRecord> {
        self.file
            .rows::<DetectionRecord>()
            .into_iter()
            .filter(|row| row.patient_id == patient_id)
            .collect()
    }
}
