use std::sync::Arc;

mod create;
mod deactivate;
mod get;
pub mod parse;
mod update;

pub use create::CreatePatient;
pub use deactivate::DeactivatePatient;
pub use get::GetPatient;
pub use update::{Field, UpdatePatient};

use crate::audit::AuditLog;
use crate::catalog::Catalog;
use crate::db::{Db, StoreError};
use parse::{Parse, ParseError};

#[derive(Debug)]
pub enum Command {
    CreatePatient(CreatePatient),
    GetPatient(GetPatient),
    UpdatePatient(UpdatePatient),
    DeactivatePatient(DeactivatePatient),
    Exit,
    Unknown(Unknown),
}

/// Any command token the server does not implement. Answered with an
/// informational echo rather than an error.
#[derive(Debug)]
pub struct Unknown {
    pub command: String,
    pub raw: String,
}

/// Per-connection context handed to every command.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub remote: Option<String>,
}

impl Session {
    pub fn new(remote: impl Into<String>) -> Session {
        Session {
            remote: Some(remote.into()),
        }
    }

    pub fn remote(&self) -> Option<&str> {
        self.remote.as_deref()
    }
}

/// What the connection should do after a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub reply: String,
    pub close: bool,
}

impl Outcome {
    fn reply(reply: impl Into<String>) -> Outcome {
        Outcome {
            reply: reply.into(),
            close: false,
        }
    }
}

/// Requests the server answers with `ERROR;<reason>[;<detail>]`. The
/// `Display` form is the exact wire reply.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("ERROR;empty_request")]
    EmptyRequest,
    #[error("ERROR;malformed_message;missing command")]
    MalformedMessage,
    #[error("ERROR;missing_required_fields;need full_name and document_id")]
    MissingRequiredFields,
    #[error("ERROR;invalid_sex;expected M or F")]
    InvalidSex,
    #[error("ERROR;invalid_age;expected integer")]
    InvalidAge,
    #[error("ERROR;invalid_active;expected true or false")]
    InvalidActive,
    #[error("ERROR;missing_patient_id")]
    MissingPatientId,
    #[error("ERROR;not_found;{0}")]
    NotFound(String),
    #[error("ERROR;inactive_patient;{0}")]
    InactivePatient(String),
    #[error("ERROR;already_inactive;{0}")]
    AlreadyInactive(String),
    #[error("ERROR;duplicate_patient;{0}")]
    DuplicatePatient(String),
    #[error("ERROR;storage_failure;{0}")]
    StorageFailure(String),
    #[error("ERROR;exception;{kind};{message}")]
    Exception { kind: String, message: String },
}

impl From<StoreError> for Rejection {
    fn from(err: StoreError) -> Rejection {
        match err {
            StoreError::Duplicate(id) => Rejection::DuplicatePatient(id),
            other => Rejection::StorageFailure(single_line(&other.to_string())),
        }
    }
}

impl From<std::io::Error> for Rejection {
    fn from(err: std::io::Error) -> Rejection {
        Rejection::StorageFailure(single_line(&err.to_string()))
    }
}

impl From<ParseError> for Rejection {
    fn from(err: ParseError) -> Rejection {
        match err {
            ParseError::EmptyRequest => Rejection::EmptyRequest,
            ParseError::MalformedMessage => Rejection::MalformedMessage,
        }
    }
}

/// Shared state every connection dispatches against: the tables, the
/// read-only disease catalog and the audit trail.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    db: Db,
    catalog: Arc<Catalog>,
    audit: AuditLog,
    dedupe_detections: bool,
}

impl Dispatcher {
    pub fn new(db: Db, catalog: Arc<Catalog>, audit: AuditLog) -> Dispatcher {
        Dispatcher {
            db,
            catalog,
            audit,
            dedupe_detections: false,
        }
    }

    pub fn dedupe_detections(mut self, enabled: bool) -> Dispatcher {
        self.dedupe_detections = enabled;
        self
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Handles one request end to end and returns the reply text.
    pub fn dispatch(&self, session: &Session, request: &str) -> Outcome {
        self.audit
            .info(session.remote(), "PROCESS_REQUEST", &[("msg", request)]);

        match Command::parse(request) {
            Ok(cmd) => cmd.apply(self, session),
            Err(err) => {
                let action = match err {
                    ParseError::EmptyRequest => "EMPTY_REQUEST",
                    ParseError::MalformedMessage => "MALFORMED_REQUEST",
                };
                self.audit.warn(session.remote(), action, &[]);

                Outcome::reply(Rejection::from(err).to_string())
            }
        }
    }
}

impl Command {
    pub fn parse(text: &str) -> Result<Command, ParseError> {
        let mut parse = Parse::new(text)?;

        let command_name = parse.command().to_string();

        let command = match command_name.as_str() {
            "CREATE_PATIENT" => Command::CreatePatient(CreatePatient::parse_fields(&mut parse)),
            "GET_PATIENT" => Command::GetPatient(GetPatient::parse_fields(&mut parse)),
            "UPDATE_PATIENT" => Command::UpdatePatient(UpdatePatient::parse_fields(parse)),
            "DEACTIVATE_PATIENT" => {
                Command::DeactivatePatient(DeactivatePatient::parse_fields(&mut parse))
            }
            "EXIT" | "QUIT" => Command::Exit,
            other => Command::Unknown(Unknown {
                command: other.to_string(),
                raw: text.to_string(),
            }),
        };

        Ok(command)
    }

    pub fn is_exit(&self) -> bool {
        matches!(self, Command::Exit)
    }

    pub fn apply(self, ctx: &Dispatcher, session: &Session) -> Outcome {
        use Command::*;

        let result = match self {
            CreatePatient(cmd) => cmd.apply(ctx, session),
            GetPatient(cmd) => cmd.apply(ctx, session),
            UpdatePatient(cmd) => cmd.apply(ctx, session),
            DeactivatePatient(cmd) => cmd.apply(ctx, session),
            Exit => {
                return Outcome {
                    reply: "BYE".to_string(),
                    close: true,
                }
            }
            Unknown(cmd) => Ok(cmd.apply(ctx, session)),
        };

        Outcome::reply(result.unwrap_or_else(|rejection| {
            if let Rejection::StorageFailure(msg) = &rejection {
                ctx.audit.error(
                    session.remote(),
                    "SERVER_EXCEPTION",
                    &[("type", "storage_failure"), ("msg", msg)],
                );
            }
            rejection.to_string()
        }))
    }
}

impl Unknown {
    fn apply(self, ctx: &Dispatcher, session: &Session) -> String {
        ctx.audit
            .info(session.remote(), "UNKNOWN_COMMAND", &[("cmd", &self.command)]);

        format!(
            "INFO;received;{};diseases_loaded={}",
            self.raw,
            ctx.catalog.diseases.ids().join(",")
        )
    }
}

/// Adds the `P-` prefix to bare patient ids.
pub fn normalize_patient_id(raw: &str) -> String {
    let raw = raw.trim();

    if raw.starts_with("P-") {
        raw.to_string()
    } else {
        format!("P-{raw}")
    }
}

fn valid_sex(sex: &str) -> bool {
    sex.eq_ignore_ascii_case("M") || sex.eq_ignore_ascii_case("F")
}

fn valid_age(age: &str) -> bool {
    !age.is_empty() && age.chars().all(|c| c.is_ascii_digit())
}

fn parse_active(raw: &str) -> Option<bool> {
    if raw.eq_ignore_ascii_case("true") {
        Some(true)
    } else if raw.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

fn single_line(text: &str) -> String {
    text.replace(['\r', '\n'], " ")
}

/// `;diagnosis_count=N;diagnosis_1_id=..|diagnosis_1_name=..|diagnosis_1_pattern=..`
/// for each `(disease_id, disease_name, pattern)`; empty when there are none.
fn diagnosis_block<'a, I>(entries: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str, &'a str)>,
{
    let entries: Vec<_> = entries.into_iter().collect();

    if entries.is_empty() {
        return String::new();
    }

    let mut out = format!(";diagnosis_count={}", entries.len());

    for (i, (id, name, pattern)) in entries.into_iter().enumerate() {
        let n = i + 1;
        out.push_str(&format!(
            ";diagnosis_{n}_id={id}|diagnosis_{n}_name={name}|diagnosis_{n}_pattern={pattern}"
        ));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_bare_ids() {
        assert_eq!(normalize_patient_id("123"), "P-123");
        assert_eq!(normalize_patient_id(" P-123 "), "P-123");
    }

    #[test]
    fn validates_sex_and_age() {
        assert!(valid_sex("m"));
        assert!(valid_sex("F"));
        assert!(!valid_sex("X"));
        assert!(!valid_sex("MF"));
        assert!(valid_age("42"));
        assert!(!valid_age("12a"));
        assert!(!valid_age("-1"));
        assert!(!valid_age(""));
    }

    #[test]
    fn diagnosis_block_numbers_entries_from_one() {
        let block = diagnosis_block([("D2", "Beta", "GGTT"), ("D1", "Alpha", "ATCG")]);

        assert_eq!(
            block,
            ";diagnosis_count=2\
             ;diagnosis_1_id=D2|diagnosis_1_name=Beta|diagnosis_1_pattern=GGTT\
             ;diagnosis_2_id=D1|diagnosis_2_name=Alpha|diagnosis_2_pattern=ATCG"
        );
        assert_eq!(diagnosis_block(Vec::new()), "");
    }

    #[test]
    fn parses_command_tokens() {
        assert!(Command::parse("quit").unwrap().is_exit());
        assert!(Command::parse("EXIT").unwrap().is_exit());
        assert!(matches!(
            Command::parse("PING|x=1").unwrap(),
            Command::Unknown(Unknown { ref command, .. }) if command == "PING"
        ));
        assert!(matches!(
            Command::parse("get_patient|patient_id=1").unwrap(),
            Command::GetPatient(_)
        ));
    }

    #[test]
    fn rejections_render_wire_text() {
        assert_eq!(Rejection::NotFound("P-999".into()).to_string(), "ERROR;not_found;P-999");
        assert_eq!(
            Rejection::Exception {
                kind: "panic".into(),
                message: "boom".into()
            }
            .to_string(),
            "ERROR;exception;panic;boom"
        );
    }
}
