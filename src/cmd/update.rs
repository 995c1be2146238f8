use super::parse::{encode, Parse};
use super::{normalize_patient_id, parse_active, single_line, valid_age, valid_sex};
use super::{Dispatcher, Rejection, Session};
use crate::db::PatientRecord;
use crate::sequence::{self, SequenceArtifact};

/// Columns a client may change. `registration_date`, the FASTA columns
/// and the id itself are never taken from the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    FullName,
    DocumentId,
    DiseaseId,
    ContactEmail,
    Age,
    Sex,
    ClinicalNotes,
    Active,
}

impl Field {
    /// `disease_id` matches in any case and also under its column name `F`.
    pub fn from_key(key: &str) -> Option<Field> {
        use Field::*;

        if key.eq_ignore_ascii_case("disease_id") || key == "F" {
            return Some(DiseaseId);
        }

        match key {
            "full_name" => Some(FullName),
            "document_id" => Some(DocumentId),
            "contact_email" => Some(ContactEmail),
            "age" => Some(Age),
            "sex" => Some(Sex),
            "clinical_notes" => Some(ClinicalNotes),
            "active" => Some(Active),
            _ => None,
        }
    }

    pub fn key(self) -> &'static str {
        use Field::*;

        match self {
            FullName => "full_name",
            DocumentId => "document_id",
            DiseaseId => "disease_id",
            ContactEmail => "contact_email",
            Age => "age",
            Sex => "sex",
            ClinicalNotes => "clinical_notes",
            Active => "active",
        }
    }

    /// Checks `value` before any change is made.
    fn validate(self, value: &str) -> Result<(), Rejection> {
        match self {
            Field::Sex if !valid_sex(value) => Err(Rejection::InvalidSex),
            Field::Age if !valid_age(value) => Err(Rejection::InvalidAge),
            Field::Active if parse_active(value).is_none() => Err(Rejection::InvalidActive),
            _ => Ok(()),
        }
    }

    fn assign(self, record: &mut PatientRecord, value: &str) {
        use Field::*;

        match self {
            FullName => record.full_name = value.to_string(),
            DocumentId => record.document_id = value.to_string(),
            DiseaseId => record.disease_id = value.to_string(),
            ContactEmail => record.contact_email = value.to_string(),
            Age => record.age = value.to_string(),
            Sex => record.sex = value.to_uppercase(),
            ClinicalNotes => record.clinical_notes = single_line(value),
            Active => record.active = parse_active(value).unwrap_or(record.active),
        }
    }
}

/// Merges the non-blank whitelisted fields into an active patient and
/// optionally replaces its stored sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdatePatient {
    pub patient_id: String,
    pub changes: Vec<(Field, String)>,
    pub fasta_content: String,
}

impl UpdatePatient {
    pub fn new(patient_id: impl ToString) -> UpdatePatient {
        UpdatePatient {
            patient_id: patient_id.to_string(),
            ..UpdatePatient::default()
        }
    }

    /// Sets `field` to `value`, replacing an earlier value for the same field.
    pub fn set(mut self, field: Field, value: impl ToString) -> UpdatePatient {
        let value = value.to_string();

        if value.trim().is_empty() {
            return self;
        }

        match self.changes.iter_mut().find(|(f, _)| *f == field) {
            Some(slot) => slot.1 = value,
            None => self.changes.push((field, value)),
        }

        self
    }

    pub fn fasta(mut self, content: impl ToString) -> UpdatePatient {
        self.fasta_content = content.to_string();
        self
    }

    pub fn into_request(self) -> String {
        let mut fields = vec![("patient_id", self.patient_id.as_str())];
        fields.extend(self.changes.iter().map(|(field, value)| (field.key(), value.as_str())));
        fields.push(("fasta_content", self.fasta_content.as_str()));

        encode("UPDATE_PATIENT", &fields)
    }

    /// Unknown keys and blank values are dropped here.
    pub(crate) fn parse_fields(mut parse: Parse) -> UpdatePatient {
        let patient_id = parse.take_or_empty("patient_id");
        let fasta_content = parse.take_or_empty("fasta_content");

        let mut cmd = UpdatePatient {
            patient_id,
            fasta_content,
            ..UpdatePatient::default()
        };

        for (key, value) in parse.into_fields() {
            match Field::from_key(&key) {
                Some(field) => cmd = cmd.set(field, value),
                None => tracing::debug!(%key, "ignoring field that cannot be updated"),
            }
        }

        cmd
    }

    pub(crate) fn apply(self, ctx: &Dispatcher, session: &Session) -> Result<String, Rejection> {
        let remote = session.remote();

        if self.patient_id.is_empty() {
            ctx.audit
                .warn(remote, "UPDATE_PATIENT_BAD_INPUT", &[("reason", "missing_patient_id")]);
            return Err(Rejection::MissingPatientId);
        }

        let patient_id = normalize_patient_id(&self.patient_id);

        let Some(current) = ctx.db.patients.find(&patient_id) else {
            ctx.audit
                .warn(remote, "UPDATE_PATIENT_NOT_FOUND", &[("patient_id", &patient_id)]);
            return Err(Rejection::NotFound(patient_id));
        };

        if !current.active {
            ctx.audit
                .warn(remote, "UPDATE_BLOCKED_INACTIVE", &[("patient_id", &patient_id)]);
            return Err(Rejection::InactivePatient(patient_id));
        }

        for field in [Field::Sex, Field::Age, Field::Active] {
            let Some((_, value)) = self.changes.iter().find(|(f, _)| *f == field) else {
                continue;
            };

            if let Err(rejection) = field.validate(value) {
                let reason = format!("invalid_{}", field.key());
                ctx.audit.warn(
                    remote,
                    "UPDATE_PATIENT_BAD_INPUT",
                    &[("reason", &reason), (field.key(), value)],
                );
                return Err(rejection);
            }
        }

        let mut artifact = None;

        let updated = ctx.db.patients.update(&patient_id, |row| {
            if !row.active {
                return Err(Rejection::InactivePatient(row.patient_id.clone()));
            }

            artifact = self.store_sequence(ctx, &row.patient_id)?;

            for (field, value) in &self.changes {
                field.assign(row, value);
            }

            if let Some(artifact) = &artifact {
                row.checksum_fasta = artifact.checksum.clone();
                row.file_size_bytes = artifact.size_bytes.to_string();
                row.fasta_path = artifact.path.display().to_string();
            }

            Ok(())
        });

        match updated {
            Ok(true) => {}
            Ok(false) => {
                ctx.audit
                    .warn(remote, "UPDATE_PATIENT_NOT_FOUND", &[("patient_id", &patient_id)]);
                return Err(Rejection::NotFound(patient_id));
            }
            Err(Rejection::InactivePatient(id)) => {
                ctx.audit.warn(remote, "UPDATE_BLOCKED_INACTIVE", &[("patient_id", &id)]);
                return Err(Rejection::InactivePatient(id));
            }
            Err(other) => return Err(other),
        }

        let fields = self
            .changes
            .iter()
            .map(|(field, _)| field.key())
            .collect::<Vec<_>>()
            .join(",");
        let fasta_updated = artifact.is_some().to_string();
        ctx.audit.info(
            remote,
            "UPDATE_PATIENT_OK",
            &[
                ("patient_id", &patient_id),
                ("fields", &fields),
                ("fasta_updated", &fasta_updated),
            ],
        );

        Ok(format!("OK;patient_updated;{patient_id}"))
    }

    /// Rewrites the patient's FASTA file when the request carries a
    /// sequence that is still non-empty after cleaning. Runs under the
    /// patient table's write lock, once the row is known to be active.
    fn store_sequence(
        &self,
        ctx: &Dispatcher,
        patient_id: &str,
    ) -> Result<Option<SequenceArtifact>, Rejection> {
        if self.fasta_content.trim().is_empty() {
            return Ok(None);
        }

        let cleaned = sequence::clean(&self.fasta_content);
        let artifact = ctx.db.sequences.persist(patient_id, &cleaned)?;

        match &artifact {
            Some(artifact) => {
                tracing::info!(patient_id, path = %artifact.path.display(), "sequence replaced")
            }
            None => tracing::debug!(patient_id, "sequence empty after cleaning, file kept"),
        }

        Ok(artifact)
    }
}
