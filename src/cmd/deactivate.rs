use super::parse::{encode, Parse};
use super::{normalize_patient_id, Dispatcher, Rejection, Session};

/// Soft delete: the row stays, with `active=false`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeactivatePatient {
    pub patient_id: String,
}

impl DeactivatePatient {
    pub fn new(patient_id: impl ToString) -> DeactivatePatient {
        DeactivatePatient {
            patient_id: patient_id.to_string(),
        }
    }

    pub fn into_request(self) -> String {
        encode("DEACTIVATE_PATIENT", &[("patient_id", &self.patient_id)])
    }

    pub(crate) fn parse_fields(parse: &mut Parse) -> DeactivatePatient {
        DeactivatePatient {
            patient_id: parse.take_or_empty("patient_id"),
        }
    }

    pub(crate) fn apply(self, ctx: &Dispatcher, session: &Session) -> Result<String, Rejection> {
        let remote = session.remote();

        if self.patient_id.is_empty() {
            ctx.audit
                .warn(remote, "DEACTIVATE_BAD_INPUT", &[("reason", "missing_patient_id")]);
            return Err(Rejection::MissingPatientId);
        }

        let patient_id = normalize_patient_id(&self.patient_id);

        let result = ctx.db.patients.update(&patient_id, |row| {
            if !row.active {
                return Err(Rejection::AlreadyInactive(row.patient_id.clone()));
            }
            row.active = false;
            Ok(())
        });

        match result {
            Ok(true) => {
                ctx.audit
                    .info(remote, "DEACTIVATE_PATIENT_OK", &[("patient_id", &patient_id)]);
                Ok(format!("OK;patient_deactivated;{patient_id}"))
            }
            Ok(false) => {
                ctx.audit
                    .warn(remote, "DEACTIVATE_NOT_FOUND", &[("patient_id", &patient_id)]);
                Err(Rejection::NotFound(patient_id))
            }
            Err(Rejection::AlreadyInactive(id)) => {
                ctx.audit
                    .warn(remote, "DEACTIVATE_ALREADY_INACTIVE", &[("patient_id", &id)]);
                Err(Rejection::AlreadyInactive(id))
            }
            Err(other) => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_text() {
        assert_eq!(
            DeactivatePatient::new("P-3").into_request(),
            "DEACTIVATE_PATIENT|patient_id=P-3"
        );
    }
}
