//! # Connection Servers
//!
//! Four independent listeners share one accept loop:
//!
//! | Service         | Default port | Bind    | Protocol                      |
//! |-----------------|--------------|---------|-------------------------------|
//! | control         | 19999        | local   | [`control`] command lines     |
//! | query           | 19998        | local   | [`query`] lines, tagged JSON  |
//! | remote query    | 29999        | remote  | same as query                 |
//! | remote sketch   | 29998        | remote  | [`sketch`] summary exchange   |
//!
//! Each accepted connection gets its own task. A failing handshake, read
//! timeout or broken pipe ends that connection only. The loop exits when
//! the shutdown channel flips to `true`.

pub mod control;
pub mod query;
pub mod sketch;

use crate::error::ServerError;
use provkernel_core::Kernel;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;

/// A plain or TLS byte stream.
pub trait Connection: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Connection for T {}

pub type BoxedConnection = Box<dyn Connection>;

/// Which protocol a listener speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    Control,
    Query,
    RemoteQuery,
    RemoteSketch,
}

impl Service {
    pub fn name(self) -> &'static str {
        match self {
            Self::Control => "control",
            Self::Query => "query",
            Self::RemoteQuery => "remote-query",
            Self::RemoteSketch => "remote-sketch",
        }
    }
}

/// State shared by every connection handler.
#[derive(Debug, Clone)]
pub struct ServerContext {
    pub kernel: Arc<Kernel>,
    /// Read timeout on control connections; the shutdown flag is checked
    /// each time it elapses.
    pub control_read_timeout: Duration,
}

/// A bound listener not yet accepting.
pub struct Listener {
    service: Service,
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("service", &self.service)
            .field("local_addr", &self.listener.local_addr().ok())
            .field("tls", &self.tls.is_some())
            .finish()
    }
}

impl Listener {
    /// Bind `addr`. `tls = None` serves plain TCP.
    pub async fn bind(
        service: Service,
        addr: &str,
        tls: Option<TlsAcceptor>,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            service,
            listener,
            tls,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept until `shutdown` becomes `true`.
    pub async fn serve(self, context: ServerContext, mut shutdown: watch::Receiver<bool>) {
        let service = self.service;
        match self.local_addr() {
            Ok(addr) => tracing::info!(service = service.name(), %addr, tls = self.tls.is_some(), "listening"),
            Err(e) => tracing::warn!(service = service.name(), error = %e, "listening on unknown address"),
        }

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((socket, peer)) => {
                        tracing::debug!(service = service.name(), %peer, "connection accepted");
                        let tls = self.tls.clone();
                        let context = context.clone();
                        tokio::spawn(async move {
                            let connection: BoxedConnection = match tls {
                                Some(acceptor) => match acceptor.accept(socket).await {
                                    Ok(stream) => Box::new(stream),
                                    Err(e) => {
                                        tracing::warn!(service = service.name(), %peer, error = %e, "TLS handshake failed");
                                        return;
                                    }
                                },
                                None => Box::new(socket),
                            };
                            if let Err(e) = handle(service, connection, context).await {
                                tracing::warn!(service = service.name(), %peer, error = %e, "connection closed with error");
                            }
                            tracing::debug!(service = service.name(), %peer, "connection closed");
                        });
                    }
                    Err(e) => {
                        tracing::warn!(service = service.name(), error = %e, "accept failed");
                    }
                }
            }
        }
        tracing::info!(service = service.name(), "listener stopped");
    }

    /// Spawn [`serve`](Self::serve) on the runtime.
    pub fn spawn(self, context: ServerContext, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.serve(context, shutdown))
    }
}

async fn handle(
    service: Service,
    connection: BoxedConnection,
    context: ServerContext,
) -> Result<(), ServerError> {
    match service {
        Service::Control => control::handle(connection, context).await,
        Service::Query | Service::RemoteQuery => query::handle(connection, context).await,
        Service::RemoteSketch => sketch::handle(connection, context).await,
    }
}
