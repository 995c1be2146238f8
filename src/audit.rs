//! Line-oriented audit trail.
//!
//! Every event becomes one line:
//! `2024-05-01T10:00:00.000 INFO CREATE_PATIENT_OK remote=10.0.0.5:51234 patient_id=P-1`.
//! Events are mirrored to `tracing`. A failing audit write is logged and
//! otherwise ignored; it never fails the request that produced it.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warn,
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Info => write!(f, "INFO"),
            Level::Warn => write!(f, "WARN"),
            Level::Error => write!(f, "ERROR"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuditLog {
    path: Option<Arc<PathBuf>>,
    lock: Arc<Mutex<()>>,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> AuditLog {
        AuditLog {
            path: Some(Arc::new(path.into())),
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// An audit log that only mirrors to `tracing`.
    pub fn disabled() -> AuditLog {
        AuditLog {
            path: None,
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn info(&self, remote: Option<&str>, action: &str, fields: &[(&str, &str)]) {
        self.write(Level::Info, remote, action, fields)
    }

    pub fn warn(&self, remote: Option<&str>, action: &str, fields: &[(&str, &str)]) {
        self.write(Level::Warn, remote, action, fields)
    }

    pub fn error(&self, remote: Option<&str>, action: &str, fields: &[(&str, &str)]) {
        self.write(Level::Error, remote, action, fields)
    }

    pub fn write(&self, level: Level, remote: Option<&str>, action: &str, fields: &[(&str, &str)]) {
        let remote = remote.unwrap_or("-");
        let line = format_line(&crate::db::now_iso(), level, action, remote, fields);

        match level {
            Level::Info => tracing::info!(target: "audit", "{}", line),
            Level::Warn => tracing::warn!(target: "audit", "{}", line),
            Level::Error => tracing::error!(target: "audit", "{}", line),
        }

        let Some(path) = &self.path else {
            return;
        };

        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);

        let result = path
            .parent()
            .map_or(Ok(()), fs::create_dir_all)
            .and_then(|_| OpenOptions::new().create(true).append(true).open(path.as_path()))
            .and_then(|mut file| file.write_all(line.as_bytes()));

        if let Err(err) = result {
            tracing::warn!(path = %path.display(), %err, "audit write failed");
        }
    }
}

fn format_line(
    ts: &str,
    level: Level,
    action: &str,
    remote: &str,
    fields: &[(&str, &str)],
) -> String {
    let mut line = format!("{ts} {level} {action} remote={}", sanitize(remote));

    for (key, value) in fields {
        line.push(' ');
        line.push_str(key);
        line.push('=');
        line.push_str(&sanitize(value));
    }

    line.push('\n');
    line
}

fn sanitize(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_fields_in_order_without_newlines() {
        let line = format_line(
            "2024-05-01T10:00:00.000",
            Level::Warn,
            "CREATE_PATIENT_BAD_INPUT",
            "127.0.0.1:4000",
            &[("reason", "invalid_sex"), ("sex", "X\r\ny")],
        );

        assert_eq!(
            line,
            concat!(
                "2024-05-01T10:00:00.000 WARN CREATE_PATIENT_BAD_INPUT ",
                "remote=127.0.0.1:4000 reason=invalid_sex sex=X  y\n"
            )
        );
    }

    #[test]
    fn appends_lines_and_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("server.log");
        let audit = AuditLog::new(&path);

        audit.info(None, "CLIENT_CONNECTED", &[("port", "2020")]);
        audit.error(Some("10.0.0.1:9"), "SERVER_EXCEPTION", &[]);

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("INFO CLIENT_CONNECTED remote=- port=2020"));
        assert!(lines[1].ends_with("ERROR SERVER_EXCEPTION remote=10.0.0.1:9"));
    }

    #[test]
    fn disabled_log_writes_nothing() {
        AuditLog::disabled().info(None, "PROCESS_REQUEST", &[("msg", "EXIT")]);
    }
}
