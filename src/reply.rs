//! Client-side view of a server reply.
//!
//! `OK;patient_created;P-1;diagnosis_count=1;diagnosis_1_id=D1|...`
//! becomes status `OK`, detail `patient_created`, argument `P-1` and one
//! diagnosis.

use std::collections::BTreeMap;

use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Diagnosis {
    pub id: String,
    pub name: String,
    pub pattern: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Reply {
    pub status: String,
    pub detail: String,
    /// Segments without `=`, such as the patient id or an error message.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diagnoses: Vec<Diagnosis>,
}

impl Reply {
    pub fn parse(text: &str) -> Reply {
        let mut segments = text.split(';');

        let mut reply = Reply {
            status: segments.next().unwrap_or_default().trim().to_string(),
            detail: segments.next().unwrap_or_default().trim().to_string(),
            ..Reply::default()
        };

        for segment in segments {
            if segment.starts_with("diagnosis_count=") {
                continue;
            }

            if segment.starts_with("diagnosis_") {
                reply.diagnoses.push(parse_diagnosis(segment));
            } else if segment.contains('=') {
                for pair in segment.split('|') {
                    if let Some((key, value)) = pair.split_once('=') {
                        reply.fields.insert(key.to_string(), value.to_string());
                    }
                }
            } else {
                reply.args.push(segment.to_string());
            }
        }

        reply
    }

    pub fn is_ok(&self) -> bool {
        self.status == "OK"
    }

    pub fn is_error(&self) -> bool {
        self.status == "ERROR"
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// First argument, e.g. the patient id of `OK;patient_created;<id>`.
    pub fn arg(&self) -> Option<&str> {
        self.args.first().map(String::as_str)
    }
}

fn parse_diagnosis(segment: &str) -> Diagnosis {
    let mut diagnosis = Diagnosis::default();

    for pair in segment.split('|') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };

        match key.rsplit_once('_').map(|(_, suffix)| suffix) {
            Some("id") => diagnosis.id = value.to_string(),
            Some("name") => diagnosis.name = value.to_string(),
            Some("pattern") => diagnosis.pattern = value.to_string(),
            _ => {}
        }
    }

    diagnosis
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn created_with_diagnoses() {
        let reply = Reply::parse(
            "OK;patient_created;P-17;diagnosis_count=2\
             ;diagnosis_1_id=D2|diagnosis_1_name=Beta syndrome|diagnosis_1_pattern=GGTT\
             ;diagnosis_2_id=D1|diagnosis_2_name=Alpha|diagnosis_2_pattern=ATCG",
        );

        assert!(reply.is_ok());
        assert_eq!(reply.detail, "patient_created");
        assert_eq!(reply.arg(), Some("P-17"));
        assert_eq!(reply.diagnoses.len(), 2);
        assert_eq!(
            reply.diagnoses[0],
            Diagnosis {
                id: "D2".to_string(),
                name: "Beta syndrome".to_string(),
                pattern: "GGTT".to_string(),
            }
        );
    }

    #[test]
    fn patient_payload_becomes_fields() {
        let reply = Reply::parse("OK;patient;patient_id=P-1|full_name=Ana|age=|active=true");

        assert_eq!(reply.field("full_name"), Some("Ana"));
        assert_eq!(reply.field("age"), Some(""));
        assert_eq!(reply.field("active"), Some("true"));
        assert!(reply.diagnoses.is_empty());
    }

    #[test]
    fn errors_keep_their_message() {
        let reply = Reply::parse("ERROR;invalid_sex;expected M or F");

        assert!(reply.is_error());
        assert_eq!(reply.detail, "invalid_sex");
        assert_eq!(reply.arg(), Some("expected M or F"));
    }

    #[test]
    fn bare_status() {
        let reply = Reply::parse("BYE");

        assert_eq!(reply.status, "BYE");
        assert_eq!(reply.detail, "");
    }

    #[test]
    fn serializes_without_empty_sections() {
        let json = serde_json::to_value(Reply::parse("ERROR;not_found;P-999")).unwrap();

        assert_eq!(
            json,
            serde_json::json!({
                "status": "ERROR",
                "detail": "not_found",
                "args": ["P-999"],
            })
        );
    }
}
