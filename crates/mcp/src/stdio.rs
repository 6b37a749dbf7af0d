//! Subprocess transport — MCP over a child process's stdin/stdout.
//!
//! One writer task serializes outgoing frames onto stdin; one reader
//! task parses newline-delimited JSON off stdout into the peer's
//! inbound queue. Non-JSON output (logging, ANSI noise) is skipped
//! rather than treated as fatal. stderr is inherited.

use crate::peer::McpPeer;
use agentd_core::error::McpError;
use serde_json::Value;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, warn};

/// Handle to a spawned subprocess transport, used for shutdown.
pub struct SubprocessHandle {
    child: Mutex<Option<Child>>,
    close_tx: watch::Sender<bool>,
    server_name: String,
}

/// Spawn an MCP server subprocess and return the peer speaking to it.
pub async fn spawn_subprocess(
    server_name: &str,
    command: &str,
    args: &[String],
    env: &HashMap<String, String>,
) -> Result<(Arc<McpPeer>, Arc<SubprocessHandle>), McpError> {
    let mut cmd = Command::new(command);
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);
    if !args.is_empty() {
        cmd.args(args);
    }
    for (key, value) in env {
        cmd.env(key, value);
    }

    let mut child = cmd.spawn().map_err(|source| McpError::Spawn {
        server: server_name.to_string(),
        source,
    })?;

    let stdin = child.stdin.take().ok_or_else(|| McpError::Transport {
        server: server_name.to_string(),
        message: "failed to capture server stdin".into(),
    })?;
    let stdout = child.stdout.take().ok_or_else(|| McpError::Transport {
        server: server_name.to_string(),
        message: "failed to capture server stdout".into(),
    })?;

    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Value>(64);
    let (inbound_tx, inbound_rx) = mpsc::channel::<Value>(64);
    let (close_tx, mut close_rx) = watch::channel(false);

    // Writer task: the single writer for this connection. Exits (and
    // thereby sends EOF on the child's stdin) when the close signal
    // fires or the frame queue is dropped.
    let writer_name = server_name.to_string();
    tokio::spawn(async move {
        let mut writer = BufWriter::new(stdin);
        loop {
            let frame = tokio::select! {
                frame = outbound_rx.recv() => match frame {
                    Some(frame) => frame,
                    None => break,
                },
                _ = close_rx.changed() => break,
            };
            let line = match serde_json::to_string(&frame) {
                Ok(line) => line,
                Err(e) => {
                    warn!(server = %writer_name, error = %e, "unserializable outbound frame");
                    continue;
                }
            };
            if writer.write_all(line.as_bytes()).await.is_err()
                || writer.write_all(b"\n").await.is_err()
                || writer.flush().await.is_err()
            {
                debug!(server = %writer_name, "stdin closed, writer task exiting");
                break;
            }
        }
        // Dropping the writer closes the child's stdin (EOF).
    });

    // Reader task: newline-delimited JSON off stdout.
    let reader_name = server_name.to_string();
    tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(raw)) => {
                    let trimmed = raw.trim();
                    if trimmed.is_empty() || trimmed.starts_with('\u{1b}') {
                        continue;
                    }
                    match serde_json::from_str::<Value>(trimmed) {
                        Ok(frame) => {
                            if inbound_tx.send(frame).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!(
                                server = %reader_name,
                                line = trimmed,
                                error = %e,
                                "skipping invalid JSON from server"
                            );
                        }
                    }
                }
                Ok(None) | Err(_) => break,
            }
        }
        // Dropping inbound_tx signals the peer that the connection died.
    });

    let peer = McpPeer::spawn(server_name, outbound_tx, inbound_rx);
    let handle = Arc::new(SubprocessHandle {
        child: Mutex::new(Some(child)),
        close_tx,
        server_name: server_name.to_string(),
    });

    Ok((peer, handle))
}

impl SubprocessHandle {
    /// Graceful shutdown: close the child's stdin (EOF), wait up to
    /// `grace` for it to exit, then kill stragglers.
    pub async fn shutdown(&self, grace: Duration) {
        let _ = self.close_tx.send(true);

        let mut slot = self.child.lock().await;
        let Some(mut child) = slot.take() else {
            return;
        };

        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => {
                debug!(server = %self.server_name, %status, "server exited");
            }
            _ => {
                warn!(server = %self.server_name, "server did not exit in grace period, killing");
                let _ = child.kill().await;
                let _ = child.wait().await;
            }
        }
    }

    /// Force-kill the child immediately.
    pub async fn kill(&self) {
        let mut slot = self.child.lock().await;
        if let Some(mut child) = slot.take() {
            let _ = child.kill().await;
            let _ = child.wait().await;
        }
    }
}
