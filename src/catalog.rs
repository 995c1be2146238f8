//! Read-only disease catalog and signature table, loaded once at startup.
//!
//! `catalog.csv` columns: `disease_id,name,severity[,fasta_file]`.
//! `signatures.csv` columns: `pattern,disease_id`.
//! Both files carry a header row. Reference FASTA files named in the catalog
//! are resolved relative to the catalog's own directory.

use std::collections::HashMap;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord, Trim};

use crate::sequence;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("cannot read {path}: {source}")]
    Csv {
        path: String,
        #[source]
        source: csv::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiseaseEntry {
    pub id: String,
    pub name: String,
    pub severity: i32,
    /// Informational only, never consulted by matching.
    pub reference: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DiseaseCatalog {
    entries: HashMap<String, DiseaseEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub pattern: String,
    pub disease_id: String,
}

/// Signatures in load order. A repeated pattern keeps its first position and
/// takes the disease id of the last row that named it.
#[derive(Debug, Clone, Default)]
pub struct SignatureTable {
    entries: Vec<Signature>,
    positions: HashMap<String, usize>,
}

/// Everything the dispatcher needs from the static disease database.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub diseases: DiseaseCatalog,
    pub signatures: SignatureTable,
}

impl DiseaseCatalog {
    pub fn insert(&mut self, entry: DiseaseEntry) {
        self.entries.insert(entry.id.clone(), entry);
    }

    pub fn get(&self, id: &str) -> Option<&DiseaseEntry> {
        self.entries.get(id)
    }

    /// Registered name, or the raw id when no non-blank name is known.
    pub fn name_of<'a>(&'a self, id: &'a str) -> &'a str {
        match self.entries.get(id) {
            Some(entry) if !entry.name.trim().is_empty() => &entry.name,
            _ => id,
        }
    }

    /// Unknown diseases rank as severity 0.
    pub fn severity_of(&self, id: &str) -> i32 {
        self.entries.get(id).map_or(0, |entry| entry.severity)
    }

    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn load(path: &Path) -> Result<DiseaseCatalog, CatalogError> {
        let mut catalog = DiseaseCatalog::default();

        if !path.exists() {
            tracing::warn!(
                path = %path.display(),
                "disease catalog not found, starting with an empty catalog"
            );
            return Ok(catalog);
        }

        let base = path.parent().unwrap_or_else(|| Path::new("."));

        for record in read_records(path)? {
            if record.len() < 3 {
                continue;
            }

            let id = record[0].to_uppercase();
            if id.is_empty() {
                continue;
            }

            let name = record[1].to_string();
            let severity = record[2].parse::<i32>().unwrap_or(0);
            let reference = record
                .get(3)
                .filter(|file| !file.is_empty())
                .and_then(|file| load_reference(&id, &base.join(file)));

            tracing::debug!(disease_id = %id, %name, severity, "disease loaded");

            catalog.insert(DiseaseEntry {
                id,
                name,
                severity,
                reference,
            });
        }

        tracing::info!(diseases = catalog.len(), "disease catalog loaded");

        Ok(catalog)
    }
}

fn load_reference(id: &str, path: &Path) -> Option<String> {
    match sequence::read_fasta(path) {
        Ok(seq) => Some(seq),
        Err(err) => {
            tracing::info!(
                disease_id = %id,
                path = %path.display(),
                %err,
                "reference sequence unavailable"
            );
            None
        }
    }
}

impl SignatureTable {
    pub fn insert(&mut self, pattern: impl Into<String>, disease_id: impl Into<String>) {
        let pattern = pattern.into();
        let disease_id = disease_id.into();

        match self.positions.get(&pattern) {
            Some(&pos) => self.entries[pos].disease_id = disease_id,
            None => {
                self.positions.insert(pattern.clone(), self.entries.len());
                self.entries.push(Signature {
                    pattern,
                    disease_id,
                });
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Signature> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn load(path: &Path) -> Result<SignatureTable, CatalogError> {
        let mut table = SignatureTable::default();

        if !path.exists() {
            tracing::warn!(
                path = %path.display(),
                "no signatures file, signature screening disabled"
            );
            return Ok(table);
        }

        for record in read_records(path)? {
            if record.len() < 2 {
                continue;
            }

            let pattern = record[0].to_uppercase();
            let disease_id = record[1].to_uppercase();

            if !pattern.is_empty() && !disease_id.is_empty() {
                tracing::debug!(%pattern, %disease_id, "signature loaded");
                table.insert(pattern, disease_id);
            }
        }

        tracing::info!(signatures = table.len(), "signature table loaded");

        Ok(table)
    }
}

impl Catalog {
    pub fn load(catalog_csv: &Path, signatures_csv: &Path) -> Result<Catalog, CatalogError> {
        Ok(Catalog {
            diseases: DiseaseCatalog::load(catalog_csv)?,
            signatures: SignatureTable::load(signatures_csv)?,
        })
    }
}

fn read_records(path: &Path) -> Result<Vec<StringRecord>, CatalogError> {
    let to_err = |source| CatalogError::Csv {
        path: path.display().to_string(),
        source,
    };

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_path(path)
        .map_err(to_err)?;

    let mut records = Vec::new();
    for result in reader.records() {
        match result {
            Ok(record) => records.push(record),
            Err(err) => tracing::warn!(path = %path.display(), %err, "skipping unreadable row"),
        }
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn loads_catalog_with_reference_sequences() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("d1.fasta"), ">ref\nATCG\nGG\n").unwrap();
        fs::write(
            dir.path().join("catalog.csv"),
            "disease_id,name,severity,fasta_file\n\
             d1,Alpha syndrome,5,d1.fasta\n\
             D2,Beta disorder,nine\n\
             \n\
             D3,Gamma,7,missing.fasta\n\
             broken,row\n",
        )
        .unwrap();

        let catalog = DiseaseCatalog::load(&dir.path().join("catalog.csv")).unwrap();

        assert_eq!(catalog.len(), 3);
        let d1 = catalog.get("D1").unwrap();
        assert_eq!(d1.name, "Alpha syndrome");
        assert_eq!(d1.severity, 5);
        assert_eq!(d1.reference.as_deref(), Some("ATCGGG"));
        assert_eq!(catalog.severity_of("D2"), 0);
        assert!(catalog.get("D3").unwrap().reference.is_none());
        assert_eq!(catalog.severity_of("UNKNOWN"), 0);
        assert_eq!(catalog.name_of("UNKNOWN"), "UNKNOWN");
    }

    #[test]
    fn missing_files_give_empty_tables() {
        let dir = tempfile::tempdir().unwrap();

        let catalog = Catalog::load(
            &dir.path().join("catalog.csv"),
            &dir.path().join("signatures.csv"),
        )
        .unwrap();

        assert!(catalog.diseases.is_empty());
        assert!(catalog.signatures.is_empty());
    }

    #[test]
    fn duplicate_pattern_keeps_position_and_last_disease() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signatures.csv");
        fs::write(&path, "pattern,disease_id\natcg,d1\nGGTT,D2\nATCG,D3\n,D4\n").unwrap();

        let table = SignatureTable::load(&path).unwrap();
        let loaded: Vec<_> = table
            .iter()
            .map(|s| (s.pattern.as_str(), s.disease_id.as_str()))
            .collect();

        assert_eq!(loaded, vec![("ATCG", "D3"), ("GGTT", "D2")]);
    }
}
