//! # Remote Sketch Exchange
//!
//! Kernels trade sketch summaries over a line protocol. Each command gets
//! exactly one reply line.
//!
//! | Request              | Reply                                        |
//! |----------------------|----------------------------------------------|
//! | `get`                | JSON object of local summaries by sketch name |
//! | `put <host> <json>`  | `ok`, after caching the summary for `host`   |
//! | `list`               | JSON array of cached hosts                   |
//! | `exit`               | connection closed                            |

use super::{BoxedConnection, ServerContext};
use crate::error::ServerError;
use provkernel_core::Kernel;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

/// Execute one sketch exchange command. `None` means close the connection.
pub fn respond(kernel: &Kernel, line: &str) -> Option<String> {
    let line = line.trim();
    let (verb, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));

    let reply = match verb {
        "exit" => return None,
        "get" => serde_json::to_string(&kernel.sketch_summaries())
            .unwrap_or_else(|e| format!("error: {}", e)),
        "list" => serde_json::to_string(&kernel.remote_sketch_hosts())
            .unwrap_or_else(|e| format!("error: {}", e)),
        "put" => {
            let rest = rest.trim_start();
            let (host, body) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
            if host.is_empty() {
                "error: usage: put <host> <json>".to_string()
            } else {
                match serde_json::from_str::<serde_json::Value>(body.trim()) {
                    Ok(summary) => {
                        kernel.put_remote_sketch(host, summary);
                        tracing::info!(host, "remote sketch cached");
                        "ok".to_string()
                    }
                    Err(e) => format!("error: {}", e),
                }
            }
        }
        other => format!("error: unknown command '{}'", other),
    };
    Some(reply)
}

pub(crate) async fn handle(
    connection: BoxedConnection,
    context: ServerContext,
) -> Result<(), ServerError> {
    let (reader, mut writer) = tokio::io::split(connection);
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        // Summaries are taken under the sketches lock; keep that off the reactor.
        let kernel = Arc::clone(&context.kernel);
        let reply = tokio::task::spawn_blocking(move || respond(&kernel, &line))
            .await
            .map_err(|e| ServerError::Protocol(format!("sketch task failed: {}", e)))?;
        let Some(reply) = reply else {
            break;
        };
        writer.write_all(reply.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }

    let _ = writer.shutdown().await;
    Ok(())
}
