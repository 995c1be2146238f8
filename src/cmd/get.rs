use super::parse::{encode, Parse};
use super::{diagnosis_block, normalize_patient_id, Dispatcher, Rejection, Session};
use crate::db::PatientRecord;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetPatient {
    pub patient_id: String,
}

impl GetPatient {
    pub fn new(patient_id: impl ToString) -> GetPatient {
        GetPatient {
            patient_id: patient_id.to_string(),
        }
    }

    pub fn into_request(self) -> String {
        encode("GET_PATIENT", &[("patient_id", &self.patient_id)])
    }

    pub(crate) fn parse_fields(parse: &mut Parse) -> GetPatient {
        GetPatient {
            patient_id: parse.take_or_empty("patient_id"),
        }
    }

    pub(crate) fn apply(self, ctx: &Dispatcher, session: &Session) -> Result<String, Rejection> {
        let remote = session.remote();

        if self.patient_id.is_empty() {
            ctx.audit
                .warn(remote, "GET_PATIENT_BAD_INPUT", &[("reason", "missing_patient_id")]);
            return Err(Rejection::MissingPatientId);
        }

        let patient_id = normalize_patient_id(&self.patient_id);

        let Some(record) = ctx.db.patients.find(&patient_id) else {
            ctx.audit
                .warn(remote, "GET_PATIENT_NOT_FOUND", &[("patient_id", &patient_id)]);
            return Err(Rejection::NotFound(patient_id));
        };

        let disease_name = ctx.catalog.diseases.name_of(&record.disease_id);
        let payload = payload(&record, disease_name);

        let detections = ctx.db.detections.by_patient(&patient_id);
        let block = diagnosis_block(detections.iter().map(|det| {
            let name = if det.disease_name.trim().is_empty() {
                ctx.catalog.diseases.name_of(&det.disease_id)
            } else {
                det.disease_name.as_str()
            };
            (det.disease_id.as_str(), name, det.pattern.as_str())
        }));

        let count = detections.len().to_string();
        ctx.audit.info(
            remote,
            "GET_PATIENT_OK",
            &[("patient_id", &patient_id), ("diagnosis_count", &count)],
        );

        Ok(format!("OK;patient;{payload}{block}"))
    }
}

fn payload(record: &PatientRecord, disease_name: &str) -> String {
    let active = record.active.to_string();
    let fields: [(&str, &str); 14] = [
        ("patient_id", record.patient_id.as_str()),
        ("full_name", &record.full_name),
        ("document_id", &record.document_id),
        ("disease_id", &record.disease_id),
        ("disease_name", disease_name),
        ("contact_email", &record.contact_email),
        ("registration_date", &record.registration_date),
        ("age", &record.age),
        ("sex", &record.sex),
        ("clinical_notes", &record.clinical_notes),
        ("checksum_fasta", &record.checksum_fasta),
        ("file_size_bytes", &record.file_size_bytes),
        ("fasta_path", &record.fasta_path),
        ("active", &active),
    ];

    fields
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("|")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_lists_every_column_in_order() {
        let mut record = PatientRecord::new("P-1");
        record.full_name = "Ana".to_string();
        record.disease_id = "D2".to_string();

        let text = payload(&record, "Beta");
        let keys: Vec<&str> = text.split('|').map(|kv| kv.split('=').next().unwrap()).collect();

        assert_eq!(
            keys,
            [
                "patient_id",
                "full_name",
                "document_id",
                "disease_id",
                "disease_name",
                "contact_email",
                "registration_date",
                "age",
                "sex",
                "clinical_notes",
                "checksum_fasta",
                "file_size_bytes",
                "fasta_path",
                "active"
            ]
        );
        assert!(text.starts_with(
            "patient_id=P-1|full_name=Ana|document_id=|disease_id=D2|disease_name=Beta|"
        ));
        assert!(text.ends_with("|active=true"));
    }

    #[test]
    fn request_text() {
        assert_eq!(GetPatient::new("P-9").into_request(), "GET_PATIENT|patient_id=P-9");
    }
}
