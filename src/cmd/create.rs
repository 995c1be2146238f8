use super::parse::{encode, Parse};
use super::{diagnosis_block, normalize_patient_id, valid_age, valid_sex};
use super::{Dispatcher, Rejection, Session};
use crate::db::{DetectionRecord, PatientRecord, DETECTION_IDS, PATIENT_IDS};
use crate::diagnosis::{self, Detection};
use crate::sequence;

/// Registers a new patient, stores its sequence and screens it against the
/// signature table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreatePatient {
    pub patient_id: Option<String>,
    pub full_name: String,
    pub document_id: String,
    pub disease_id: String,
    pub contact_email: String,
    pub age: String,
    pub sex: String,
    pub clinical_notes: String,
    pub fasta_content: String,
}

impl CreatePatient {
    pub fn new(full_name: impl ToString, document_id: impl ToString) -> CreatePatient {
        CreatePatient {
            full_name: full_name.to_string(),
            document_id: document_id.to_string(),
            ..CreatePatient::default()
        }
    }

    pub fn into_request(self) -> String {
        encode(
            "CREATE_PATIENT",
            &[
                ("patient_id", self.patient_id.as_deref().unwrap_or_default()),
                ("full_name", &self.full_name),
                ("document_id", &self.document_id),
                ("disease_id", &self.disease_id),
                ("contact_email", &self.contact_email),
                ("age", &self.age),
                ("sex", &self.sex),
                ("clinical_notes", &self.clinical_notes),
                ("fasta_content", &self.fasta_content),
            ],
        )
    }

    pub(crate) fn parse_fields(parse: &mut Parse) -> CreatePatient {
        let disease_id = match parse.take("disease_id") {
            Some(id) => id,
            None => parse.take_or_empty("F"),
        };

        CreatePatient {
            patient_id: parse.take("patient_id").filter(|id| !id.is_empty()),
            full_name: parse.take_or_empty("full_name"),
            document_id: parse.take_or_empty("document_id"),
            disease_id,
            contact_email: parse.take_or_empty("contact_email"),
            age: parse.take_or_empty("age"),
            sex: parse.take_or_empty("sex"),
            clinical_notes: parse.take_or_empty("clinical_notes"),
            fasta_content: parse.take_or_empty("fasta_content"),
        }
    }

    pub(crate) fn apply(self, ctx: &Dispatcher, session: &Session) -> Result<String, Rejection> {
        let remote = session.remote();
        let bad_input = "CREATE_PATIENT_BAD_INPUT";

        if self.full_name.is_empty() || self.document_id.is_empty() {
            ctx.audit.warn(remote, bad_input, &[("reason", "missing_fullname_or_document")]);
            return Err(Rejection::MissingRequiredFields);
        }
        if !self.sex.is_empty() && !valid_sex(&self.sex) {
            ctx.audit.warn(remote, bad_input, &[("reason", "invalid_sex"), ("sex", &self.sex)]);
            return Err(Rejection::InvalidSex);
        }
        if !self.age.is_empty() && !valid_age(&self.age) {
            ctx.audit.warn(remote, bad_input, &[("reason", "invalid_age"), ("age", &self.age)]);
            return Err(Rejection::InvalidAge);
        }

        let patient_id = match &self.patient_id {
            Some(id) => normalize_patient_id(id),
            None => PATIENT_IDS.next_id(),
        };

        let mut record = PatientRecord::new(&patient_id);
        record.full_name = self.full_name;
        record.document_id = self.document_id;
        record.disease_id = self.disease_id;
        record.contact_email = self.contact_email;
        record.registration_date = crate::db::now_iso();
        record.age = self.age;
        record.sex = self.sex.to_uppercase();
        record.clinical_notes = super::single_line(&self.clinical_notes);

        let cleaned = sequence::clean(&self.fasta_content);
        let sent_sequence = !self.fasta_content.trim().is_empty();

        let mut hits =
            diagnosis::detect(&cleaned, &ctx.catalog.signatures, &ctx.catalog.diseases);
        if ctx.dedupe_detections {
            hits = diagnosis::dedupe_by_disease(hits);
        }

        if let Some(top) = hits.first() {
            if record.disease_id.is_empty() {
                record.disease_id = top.disease_id.clone();
            }
        }

        let inserted = ctx.db.patients.insert_with(&mut record, |row| -> Result<(), Rejection> {
            match ctx.db.sequences.persist(&row.patient_id, &cleaned)? {
                Some(artifact) => {
                    tracing::info!(
                        patient_id = %row.patient_id,
                        path = %artifact.path.display(),
                        bytes = artifact.size_bytes,
                        "patient sequence saved"
                    );
                    row.checksum_fasta = artifact.checksum;
                    row.file_size_bytes = artifact.size_bytes.to_string();
                    row.fasta_path = artifact.path.display().to_string();
                }
                None if sent_sequence => {
                    tracing::debug!(
                        patient_id = %row.patient_id,
                        "sequence empty after cleaning, no file written"
                    );
                }
                None => {}
            }

            ctx.record_detections(&row.patient_id, &hits);

            Ok(())
        });

        match inserted {
            Ok(()) => {}
            Err(Rejection::DuplicatePatient(id)) => {
                ctx.audit.warn(
                    remote,
                    bad_input,
                    &[("reason", "duplicate_patient"), ("patient_id", &id)],
                );
                return Err(Rejection::DuplicatePatient(id));
            }
            Err(other) => return Err(other),
        }

        if let Some(top) = hits.first() {
            let count = hits.len().to_string();
            ctx.audit.info(
                remote,
                "CREATE_DIAG_DETECTIONS",
                &[
                    ("patient_id", &patient_id),
                    ("count", &count),
                    ("top_disease", &top.disease_id),
                ],
            );
        }

        let has_fasta = (!cleaned.is_empty()).to_string();
        ctx.audit.info(
            remote,
            "CREATE_PATIENT_OK",
            &[
                ("patient_id", &patient_id),
                ("document_id", &record.document_id),
                ("disease_id", &record.disease_id),
                ("has_fasta", &has_fasta),
            ],
        );

        let block = diagnosis_block(hits.iter().map(|hit| {
            (
                hit.disease_id.as_str(),
                ctx.catalog.diseases.name_of(&hit.disease_id),
                hit.pattern.as_str(),
            )
        }));

        Ok(format!("OK;patient_created;{patient_id}{block}"))
    }
}

impl Dispatcher {
    /// Appends one detection row per hit. A failed append is logged and the
    /// remaining hits are still written.
    fn record_detections(&self, patient_id: &str, hits: &[Detection]) {
        for hit in hits {
            let record = DetectionRecord {
                detection_id: DETECTION_IDS.next_id(),
                patient_id: patient_id.to_string(),
                disease_id: hit.disease_id.clone(),
                disease_name: self.catalog.diseases.name_of(&hit.disease_id).to_string(),
                pattern: hit.pattern.clone(),
                created_at: crate::db::now_iso(),
            };

            if let Err(err) = self.db.detections.append(&record) {
                tracing::warn!(
                    patient_id,
                    disease_id = %hit.disease_id,
                    %err,
                    "detection not recorded"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_fields_and_falls_back_to_column_name() {
        let mut parse =
            Parse::new("CREATE_PATIENT|full_name=Ana|document_id=1|F=D7|patient_id=").unwrap();
        let cmd = CreatePatient::parse_fields(&mut parse);

        assert_eq!(cmd.full_name, "Ana");
        assert_eq!(cmd.disease_id, "D7");
        assert_eq!(cmd.patient_id, None);
    }

    #[test]
    fn request_omits_blank_fields() {
        let mut cmd = CreatePatient::new("Ana Ruiz", "CC-1");
        cmd.sex = "F".to_string();

        assert_eq!(
            cmd.into_request(),
            "CREATE_PATIENT|full_name=Ana Ruiz|document_id=CC-1|sex=F"
        );
    }
}
