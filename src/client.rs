use std::sync::Arc;

use rustls_pki_types::ServerName;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::ClientConfig;
use tokio_rustls::TlsConnector;

use crate::cmd::{CreatePatient, DeactivatePatient, GetPatient, UpdatePatient};
use crate::connection::Connection;
use crate::frame::Frame;
use crate::reply::Reply;

/// A TLS session with the intake server. Requests are answered in order,
/// one reply per request.
pub struct Client {
    connection: Connection<TlsStream<TcpStream>>,
}

impl Client {
    /// `server_name` is checked against the certificate the server presents.
    pub async fn connect<T: ToSocketAddrs>(
        addr: T,
        server_name: &str,
        config: Arc<ClientConfig>,
    ) -> Result<Client, crate::Error> {
        let name = ServerName::try_from(server_name.to_string())?;

        let socket = TcpStream::connect(addr).await?;
        let stream = TlsConnector::from(config).connect(name, socket).await?;

        Ok(Client {
            connection: Connection::new(stream),
        })
    }

    /// Sends a raw request and returns the raw reply.
    pub async fn send(&mut self, request: &str) -> Result<String, crate::Error> {
        let frame = Frame::new(request)?;
        self.connection.write_frame(&frame).await?;

        self.read_response().await
    }

    pub async fn create_patient(&mut self, cmd: CreatePatient) -> Result<Reply, crate::Error> {
        self.request(cmd.into_request()).await
    }

    pub async fn get_patient(&mut self, patient_id: &str) -> Result<Reply, crate::Error> {
        self.request(GetPatient::new(patient_id).into_request()).await
    }

    pub async fn update_patient(&mut self, cmd: UpdatePatient) -> Result<Reply, crate::Error> {
        self.request(cmd.into_request()).await
    }

    pub async fn deactivate_patient(&mut self, patient_id: &str) -> Result<Reply, crate::Error> {
        self.request(DeactivatePatient::new(patient_id).into_request()).await
    }

    /// Says goodbye and waits for the server's `BYE`.
    pub async fn exit(mut self) -> Result<String, crate::Error> {
        self.send("EXIT").await
    }

    async fn request(&mut self, text: String) -> Result<Reply, crate::Error> {
        let raw = self.send(&text).await?;

        Ok(Reply::parse(&raw))
    }

    async fn read_response(&mut self) -> Result<String, crate::Error> {
        match self.connection.read_frame().await? {
            Some(frame) => Ok(frame.into_string()),
            None => Err("connection closed by server".into()),
        }
    }
}
