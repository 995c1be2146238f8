use std::path::{Path, PathBuf};

use clap::Parser;

pub const DEFAULT_LOG_FILTER: &str = "genomic_intake=info,run_server=info";

/// Server settings. Every option can also come from the environment.
#[derive(Debug, Clone, Parser)]
#[command(name = "run_server", version, about = "Genomic intake TLS server")]
pub struct Config {
    #[arg(long, env = "SERVER_HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "SERVER_PORT", default_value_t = crate::DEFAULT_PORT)]
    pub port: u16,

    /// Directory holding the patient and detection tables, FASTA files and
    /// the audit log.
    #[arg(long, env = "DATA_DIR", default_value = "data")]
    pub data_dir: PathBuf,

    #[arg(long, env = "CATALOG_CSV", default_value = "disease_db/catalog.csv")]
    pub catalog: PathBuf,

    #[arg(long, env = "SIGNATURES_CSV", default_value = "disease_db/signatures.csv")]
    pub signatures: PathBuf,

    /// PEM certificate chain presented to clients.
    #[arg(long, env = "TLS_CERT")]
    pub cert: PathBuf,

    /// PEM private key matching `--cert`.
    #[arg(long, env = "TLS_KEY")]
    pub key: PathBuf,

    /// Record only the highest ranked match per disease.
    #[arg(long, env = "DEDUPE_DETECTIONS", default_value_t = false)]
    pub dedupe_detections: bool,

    #[arg(long, env = "LOG_FILTER", default_value = DEFAULT_LOG_FILTER)]
    pub log_filter: String,
}

impl Config {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn data_paths(&self) -> DataPaths {
        DataPaths::under(&self.data_dir)
    }
}

/// On-disk layout below the data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPaths {
    pub patients_csv: PathBuf,
    pub detections_csv: PathBuf,
    pub fasta_dir: PathBuf,
    pub audit_log: PathBuf,
}

impl DataPaths {
    pub fn under(dir: &Path) -> DataPaths {
        DataPaths {
            patients_csv: dir.join("patients.csv"),
            detections_csv: dir.join("detections.csv"),
            fasta_dir: dir.join("fasta"),
            audit_log: dir.join("server.log"),
        }
    }
}

/// Client settings for the one-shot command line client.
#[derive(Debug, Clone, Parser)]
#[command(name = "run_client", version, about = "Send one message to the genomic intake server")]
pub struct ClientConfig {
    #[arg(long, env = "SERVER_HOST", default_value = "localhost")]
    pub host: String,

    #[arg(long, env = "SERVER_PORT", default_value_t = crate::DEFAULT_PORT)]
    pub port: u16,

    /// PEM file with the certificate(s) to trust.
    #[arg(long, env = "TLS_CA")]
    pub ca: PathBuf,

    /// Name to verify the server certificate against; defaults to `--host`.
    #[arg(long)]
    pub server_name: Option<String>,

    /// Print the reply as JSON instead of raw text.
    #[arg(long)]
    pub json: bool,

    /// Raw request, e.g. `GET_PATIENT|patient_id=P-1`.
    pub message: String,
}

impl ClientConfig {
    pub fn server_name(&self) -> &str {
        self.server_name.as_deref().unwrap_or(&self.host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_paths_live_under_data_dir() {
        let paths = DataPaths::under(Path::new("/srv/intake"));

        assert_eq!(paths.patients_csv, Path::new("/srv/intake/patients.csv"));
        assert_eq!(paths.detections_csv, Path::new("/srv/intake/detections.csv"));
        assert_eq!(paths.fasta_dir, Path::new("/srv/intake/fasta"));
        assert_eq!(paths.audit_log, Path::new("/srv/intake/server.log"));
    }

    #[test]
    fn parses_flags_with_defaults() {
        let config = Config::try_parse_from([
            "run_server",
            "--cert",
            "cert.pem",
            "--key",
            "key.pem",
            "--port",
            "9443",
        ])
        .unwrap();

        assert_eq!(config.port, 9443);
        assert_eq!(config.bind_addr(), format!("{}:9443", config.host));
        assert_eq!(config.cert, PathBuf::from("cert.pem"));
        assert!(!config.dedupe_detections);
    }

    #[test]
    fn client_server_name_falls_back_to_host() {
        let config = ClientConfig::try_parse_from([
            "run_client",
            "--host",
            "intake.local",
            "--ca",
            "ca.pem",
            "EXIT",
        ])
        .unwrap();

        assert_eq!(config.server_name(), "intake.local");
        assert_eq!(config.message, "EXIT");
    }
}
