//! # Query Connections
//!
//! One query per line. Each reply is two lines: a tag, then JSON.
//!
//! ```text
//! graph
//! {"vertices":[...],"edges":[...]}      (or null when a transformer discarded it)
//! help
//! "Available queries:\n..."
//! ```

use super::{BoxedConnection, ServerContext};
use crate::error::ServerError;
use provkernel_core::QueryReply;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

pub const GRAPH_TAG: &str = "graph";
pub const HELP_TAG: &str = "help";

/// Render a reply as its two wire lines, newline terminated.
pub fn encode_reply(reply: &QueryReply) -> Result<String, ServerError> {
    let (tag, body) = match reply {
        QueryReply::Graph(graph) => (GRAPH_TAG, serde_json::to_string(graph)),
        QueryReply::Help(text) => (HELP_TAG, serde_json::to_string(text)),
    };
    let body = body.map_err(|e| ServerError::Protocol(e.to_string()))?;
    Ok(format!("{}\n{}\n", tag, body))
}

pub(crate) async fn handle(
    connection: BoxedConnection,
    context: ServerContext,
) -> Result<(), ServerError> {
    let (reader, mut writer) = tokio::io::split(connection);
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        let query = line.trim().to_string();
        if query.eq_ignore_ascii_case(super::control::EXIT) {
            break;
        }
        if query.is_empty() {
            continue;
        }

        tracing::debug!(query = %query, "query received");
        let kernel = Arc::clone(&context.kernel);
        let reply = tokio::task::spawn_blocking(move || kernel.query(&query))
            .await
            .map_err(|e| ServerError::Protocol(format!("query task failed: {}", e)))?;

        writer.write_all(encode_reply(&reply)?.as_bytes()).await?;
        writer.flush().await?;
    }

    let _ = writer.shutdown().await;
    Ok(())
}
