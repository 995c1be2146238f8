use std::future::Future;
use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;

use crate::audit::{AuditLog, Level};
use crate::cmd::{Dispatcher, Outcome, Rejection, Session};
use crate::connection::Connection;
use crate::frame::Frame;

struct Listener {
    listener: TcpListener,
    acceptor: TlsAcceptor,
    dispatcher: Dispatcher,
}

/// Serves one client: reads a request frame, dispatches it and writes the
/// reply, until the client disconnects or says `EXIT`.
#[derive(Debug)]
pub struct Handler<S> {
    connection: Connection<S>,
    dispatcher: Dispatcher,
    session: Session,
}

/// Accepts TLS clients on `listener` until `shutdown` completes. Each client
/// gets its own task; requests on one connection are handled in order.
pub async fn run(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    dispatcher: Dispatcher,
    shutdown: impl Future,
) {
    let audit = dispatcher.audit().clone();
    let mut server = Listener {
        listener,
        acceptor,
        dispatcher,
    };

    tokio::select! {
        res = server.run() => {
            if let Err(err) = res {
                tracing::error!(%err, "failed to accept");
                let fields = vec![("msg", err.to_string())];
                audit_event(&audit, Level::Error, None, "SERVER_ERROR", fields).await;
            }
        }
        _ = shutdown => {
            tracing::info!("shutting down");
        }
    }
}

impl Listener {
    async fn run(&mut self) -> Result<(), crate::Error> {
        loop {
            let (socket, addr) = self.accept().await?;

            let remote = addr.to_string();
            tracing::info!(%remote, "client connected");
            let audit = self.dispatcher.audit();
            audit_event(audit, Level::Info, Some(&remote), "CLIENT_CONNECTED", vec![]).await;

            let acceptor = self.acceptor.clone();
            let dispatcher = self.dispatcher.clone();

            tokio::spawn(async move {
                let session = Session::new(remote);
                let audit = dispatcher.audit().clone();

                let result = match acceptor.accept(socket).await {
                    Ok(stream) => {
                        let mut handler = Handler::new(stream, dispatcher, session.clone());
                        handler.run().await
                    }
                    Err(err) => Err(err.into()),
                };

                let remote = session.remote();
                match result {
                    Ok(()) => {
                        audit_event(&audit, Level::Info, remote, "CLIENT_FINISHED", vec![]).await
                    }
                    Err(err) => {
                        tracing::warn!(remote, %err, "client error");
                        let fields = vec![("msg", err.to_string())];
                        audit_event(&audit, Level::Error, remote, "CLIENT_ERROR", fields).await;
                    }
                }

                tracing::info!(remote, "client disconnected");
                audit_event(&audit, Level::Info, remote, "CLIENT_DISCONNECTED", vec![]).await;
            });
        }
    }

    async fn accept(&mut self) -> Result<(TcpStream, SocketAddr), crate::Error> {
        Ok(self.listener.accept().await?)
    }
}

impl<S> Handler<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, dispatcher: Dispatcher, session: Session) -> Handler<S> {
        Handler {
            connection: Connection::new(stream),
            dispatcher,
            session,
        }
    }

    /// Returns once the peer has gone away or asked to leave. A read or write
    /// failure ends the loop with an error.
    pub async fn run(&mut self) -> Result<(), crate::Error> {
        loop {
            let frame = match self.connection.read_frame().await? {
                Some(frame) => frame,
                None => return Ok(()),
            };

            let outcome = self.dispatch(frame.into_string()).await;

            let reply = Frame::new(outcome.reply).or_else(|err| {
                let remote = self.session.remote();
                tracing::warn!(remote, %err, "reply does not fit in a frame");
                Frame::new("ERROR;response_too_large")
            })?;

            self.connection.write_frame(&reply).await?;

            if outcome.close {
                self.connection.shutdown().await?;
                return Ok(());
            }
        }
    }

    /// Runs the blocking dispatcher off the async workers. A panic while
    /// handling the request is answered like any other failed request.
    async fn dispatch(&self, request: String) -> Outcome {
        let dispatcher = self.dispatcher.clone();
        let session = self.session.clone();

        let joined =
            tokio::task::spawn_blocking(move || dispatcher.dispatch(&session, &request)).await;

        match joined {
            Ok(outcome) => outcome,
            Err(err) => {
                let message = panic_message(err);
                let remote = self.session.remote();
                tracing::error!(remote, %message, "request handler failed");
                let audit = self.dispatcher.audit();
                let fields = vec![("type", "panic".to_string()), ("msg", message.clone())];
                audit_event(audit, Level::Error, remote, "SERVER_EXCEPTION", fields).await;

                Outcome {
                    reply: Rejection::Exception {
                        kind: "panic".to_string(),
                        message: message.replace(['\r', '\n', ';'], " "),
                    }
                    .to_string(),
                    close: false,
                }
            }
        }
    }
}

/// Writes one audit line from the blocking pool so the file append never
/// stalls an async worker. Awaited, so events keep their order.
async fn audit_event(
    audit: &AuditLog,
    level: Level,
    remote: Option<&str>,
    action: &'static str,
    fields: Vec<(&'static str, String)>,
) {
    let audit = audit.clone();
    let remote = remote.map(str::to_string);

    let written = tokio::task::spawn_blocking(move || {
        let fields: Vec<(&str, &str)> = fields.iter().map(|(k, v)| (*k, v.as_str())).collect();
        audit.write(level, remote.as_deref(), action, &fields);
    })
    .await;

    if let Err(err) = written {
        tracing::warn!(action, %err, "audit write task failed");
    }
}

fn panic_message(err: tokio::task::JoinError) -> String {
    match err.try_into_panic() {
        Ok(payload) => match payload.downcast::<String>() {
            Ok(msg) => *msg,
            Err(payload) => match payload.downcast::<&'static str>() {
                Ok(msg) => msg.to_string(),
                Err(_) => "unknown panic".to_string(),
            },
        },
        Err(err) => err.to_string(),
    }
}
