//! # Control Connections
//!
//! Newline-delimited commands in, command output out. Every response ends
//! with an empty line so the client knows the output is complete. `exit`
//! or end of stream closes the connection.

use super::{BoxedConnection, ServerContext};
use crate::error::ServerError;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

pub const EXIT: &str = "exit";

pub(crate) async fn handle(
    connection: BoxedConnection,
    context: ServerContext,
) -> Result<(), ServerError> {
    let (reader, mut writer) = tokio::io::split(connection);
    let mut lines = BufReader::new(reader).lines();

    loop {
        let line = match tokio::time::timeout(context.control_read_timeout, lines.next_line()).await {
            Err(_elapsed) => {
                if context.kernel.is_shutdown() {
                    break;
                }
                continue;
            }
            Ok(Ok(Some(line))) => line,
            Ok(Ok(None)) => break,
            Ok(Err(e)) => return Err(e.into()),
        };
        let command = line.trim().to_string();
        if command.eq_ignore_ascii_case(EXIT) {
            break;
        }

        tracing::info!(command = %command, "control command");
        let kernel = Arc::clone(&context.kernel);
        let output = tokio::task::spawn_blocking(move || kernel.execute(&command))
            .await
            .map_err(|e| ServerError::Protocol(format!("command task failed: {}", e)))?;

        writer.write_all(output.as_bytes()).await?;
        writer.write_all(b"\n\n").await?;
        writer.flush().await?;
    }

    let _ = writer.shutdown().await;
    Ok(())
}
