//! Nucleotide sequence cleaning and per-patient FASTA persistence.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

#[cfg(windows)]
const LINE_SEPARATOR: &str = "\r\n";
#[cfg(not(windows))]
const LINE_SEPARATOR: &str = "\n";

/// Derived metadata of a stored sequence file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceArtifact {
    pub path: PathBuf,
    pub checksum: String,
    pub size_bytes: u64,
}

/// Keeps only `A`, `C`, `G`, `T` and `N` (any case) and upper-cases them.
pub fn clean(raw: &str) -> String {
    raw.chars()
        .filter(|c| matches!(c.to_ascii_uppercase(), 'A' | 'C' | 'G' | 'T' | 'N'))
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Lowercase hex SHA-256 digest.
pub fn sha256_hex(data: &[u8]) -> String {
    Sha256::digest(data)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Concatenates every non-header line of a FASTA file.
pub fn read_fasta(path: &Path) -> io::Result<String> {
    let content = fs::read_to_string(path)?;

    Ok(content
        .lines()
        .filter(|line| !line.starts_with('>'))
        .map(str::trim)
        .collect())
}

/// Directory holding one `patient_<id>.fasta` per patient.
#[derive(Debug, Clone)]
pub struct SequenceStore {
    dir: PathBuf,
}

impl SequenceStore {
    pub fn new(dir: impl Into<PathBuf>) -> SequenceStore {
        SequenceStore { dir: dir.into() }
    }

    pub fn ensure_dir(&self) -> io::Result<()> {
        fs::create_dir_all(&self.dir)
    }

    pub fn path_for(&self, patient_id: &str) -> PathBuf {
        self.dir.join(format!("patient_{}.fasta", patient_id))
    }

    /// Writes `>id` and the sequence, truncating any previous file for the
    /// same patient. An empty sequence writes nothing and returns `None`.
    pub fn persist(&self, patient_id: &str, cleaned: &str) -> io::Result<Option<SequenceArtifact>> {
        if cleaned.is_empty() {
            return Ok(None);
        }

        self.ensure_dir()?;

        let path = self.path_for(patient_id);
        let content = format!(">{patient_id}{LINE_SEPARATOR}{cleaned}{LINE_SEPARATOR}");

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        file.write_all(content.as_bytes())?;
        file.flush()?;

        let written = fs::read(&path)?;

        tracing::debug!(path = %path.display(), bytes = written.len(), "sequence stored");

        Ok(Some(SequenceArtifact {
            path,
            checksum: sha256_hex(&written),
            size_bytes: written.len() as u64,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_filters_and_uppercases() {
        assert_eq!(clean("acgt nxX\n>ATG-CC"), "ACGTNATGCC");
        assert_eq!(clean("hello world"), "");
        assert_eq!(clean(""), "");
    }

    #[test]
    fn clean_is_idempotent() {
        for raw in ["aCgTn", ">header\nACGT\r\nggcc", "123 ñ ATCG", "NNNN"] {
            let once = clean(raw);
            assert_eq!(clean(&once), once);
        }
    }

    #[test]
    fn sha256_matches_known_digest() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn persist_writes_two_line_file_and_reports_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let store = SequenceStore::new(dir.path().join("fasta"));

        let artifact = store.persist("P-1", "ATCGGGTT").unwrap().unwrap();

        let bytes = fs::read(&artifact.path).unwrap();
        let expected = format!(">P-1{LINE_SEPARATOR}ATCGGGTT{LINE_SEPARATOR}");
        assert_eq!(bytes, expected.as_bytes());
        assert_eq!(artifact.size_bytes, bytes.len() as u64);
        assert_eq!(artifact.checksum, sha256_hex(&bytes));
        assert!(artifact.path.ends_with("patient_P-1.fasta"));
        assert_eq!(read_fasta(&artifact.path).unwrap(), "ATCGGGTT");
    }

    #[test]
    fn persist_overwrites_previous_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let store = SequenceStore::new(dir.path());

        store.persist("P-1", "AAAAAAAAAAAAAAAA").unwrap();
        let artifact = store.persist("P-1", "CC").unwrap().unwrap();

        assert_eq!(read_fasta(&artifact.path).unwrap(), "CC");
    }

    #[test]
    fn empty_sequence_writes_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = SequenceStore::new(dir.path());

        assert!(store.persist("P-1", "").unwrap().is_none());
        assert!(!store.path_for("P-1").exists());
    }
}
