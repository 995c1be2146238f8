use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_rustls::TlsAcceptor;
use tracing_subscriber::EnvFilter;

use genomic_intake::audit::AuditLog;
use genomic_intake::catalog::Catalog;
use genomic_intake::cmd::Dispatcher;
use genomic_intake::config::Config;
use genomic_intake::db::Db;
use genomic_intake::{server, tls, Error};

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = Config::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_filter)),
        )
        .init();

    let paths = config.data_paths();

    let catalog = Catalog::load(&config.catalog, &config.signatures)?;
    tracing::info!(
        diseases = catalog.diseases.len(),
        signatures = catalog.signatures.len(),
        "disease catalog loaded"
    );

    let db = Db::open(&paths)?;
    let audit = AuditLog::new(&paths.audit_log);

    let dispatcher = Dispatcher::new(db, Arc::new(catalog), audit)
        .dedupe_detections(config.dedupe_detections);

    let acceptor = TlsAcceptor::from(tls::load_server_config(&config.cert, &config.key)?);

    let listener = TcpListener::bind(config.bind_addr()).await?;
    tracing::info!(
        addr = %listener.local_addr()?,
        data_dir = %config.data_dir.display(),
        "TLS server listening"
    );

    server::run(listener, acceptor, dispatcher, signal::ctrl_c()).await;

    Ok(())
}
