//! # Line Clients
//!
//! Speaks the control and query protocols from the other side. Used by the
//! `control` and `query` subcommands and by the integration tests.

use crate::error::ServerError;
use crate::server::BoxedConnection;
use crate::server::query::{GRAPH_TAG, HELP_TAG};
use provkernel_core::{Graph, QueryReply};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

/// A connected client. Requests are answered in order.
pub struct Client {
    reader: BufReader<ReadHalf<BoxedConnection>>,
    writer: WriteHalf<BoxedConnection>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").finish_non_exhaustive()
    }
}

impl Client {
    /// Connect to `host:port`, over TLS when a connector is given.
    pub async fn connect(
        host: &str,
        port: u16,
        tls: Option<&TlsConnector>,
    ) -> Result<Self, ServerError> {
        let socket = TcpStream::connect((host, port)).await?;
        let connection: BoxedConnection = match tls {
            Some(connector) => {
                let name = crate::tls::server_name(host)?;
                Box::new(connector.connect(name, socket).await?)
            }
            None => Box::new(socket),
        };
        let (reader, writer) = tokio::io::split(connection);
        Ok(Self {
            reader: BufReader::new(reader),
            writer,
        })
    }

    async fn send_line(&mut self, line: &str) -> Result<(), ServerError> {
        self.writer.write_all(line.trim_end().as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn read_line(&mut self) -> Result<String, ServerError> {
        let mut line = String::new();
        if self.reader.read_line(&mut line).await? == 0 {
            return Err(ServerError::Protocol("connection closed".to_string()));
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    /// Run one control command and return its output.
    pub async fn control(&mut self, command: &str) -> Result<String, ServerError> {
        self.send_line(command).await?;
        let mut output = Vec::new();
        loop {
            let line = self.read_line().await?;
            if line.is_empty() {
                break;
            }
            output.push(line);
        }
        Ok(output.join("\n"))
    }

    /// Run one query and decode the tagged reply.
    pub async fn query(&mut self, query: &str) -> Result<QueryReply, ServerError> {
        self.send_line(query).await?;
        let tag = self.read_line().await?;
        let body = self.read_line().await?;
        let decode = |e: serde_json::Error| ServerError::Protocol(e.to_string());
        match tag.as_str() {
            GRAPH_TAG => Ok(QueryReply::Graph(
                serde_json::from_str::<Option<Graph>>(&body).map_err(decode)?,
            )),
            HELP_TAG => Ok(QueryReply::Help(
                serde_json::from_str::<String>(&body).map_err(decode)?,
            )),
            other => Err(ServerError::Protocol(format!("unexpected reply tag '{}'", other))),
        }
    }

    /// Send a raw line and read one reply line. Used for sketch exchange.
    pub async fn request(&mut self, line: &str) -> Result<String, ServerError> {
        self.send_line(line).await?;
        self.read_line().await
    }

    /// Say `exit` and close the stream.
    pub async fn close(mut self) -> Result<(), ServerError> {
        self.send_line(crate::server::control::EXIT).await?;
        let _ = self.writer.shutdown().await;
        Ok(())
    }
}
