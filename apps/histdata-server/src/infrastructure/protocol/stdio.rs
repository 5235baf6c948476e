//! Stdio Transport
//!
//! Single-peer transport framing one JSON-RPC message per line: requests
//! arrive on stdin, responses leave on stdout, one line each. All
//! diagnostics go to stderr so stdout stays a clean protocol channel.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::application::registry::HandlerRegistry;
use crate::infrastructure::protocol::server::{Transport, TransportError};
use crate::infrastructure::protocol::{JsonRpcRequest, JsonRpcResponse, dispatch};

/// Line-framed transport over the process's standard streams.
pub struct StdioTransport {
    registry: Arc<HandlerRegistry>,
    cancel: CancellationToken,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl StdioTransport {
    /// Build an unstarted stdio transport.
    #[must_use]
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self {
            registry,
            cancel: CancellationToken::new(),
            reader: Mutex::new(None),
        }
    }

    async fn read_loop(registry: Arc<HandlerRegistry>, cancel: CancellationToken) {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdout = tokio::io::stdout();

        loop {
            let line = tokio::select! {
                () = cancel.cancelled() => break,
                line = lines.next_line() => line,
            };

            let line = match line {
                Ok(Some(line)) => line,
                // EOF: the peer closed its end of the session.
                Ok(None) => {
                    tracing::info!("stdin closed, stdio session over");
                    break;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to read from stdin");
                    break;
                }
            };

            if line.trim().is_empty() {
                continue;
            }

            let response = match serde_json::from_str::<JsonRpcRequest>(&line) {
                Ok(request) => dispatch(&registry, request).await,
                Err(e) => Some(JsonRpcResponse::parse_error(e.to_string())),
            };

            let Some(response) = response else { continue };

            match serde_json::to_vec(&response) {
                Ok(mut frame) => {
                    frame.push(b'\n');
                    if let Err(e) = stdout.write_all(&frame).await {
                        tracing::error!(error = %e, "Failed to write to stdout");
                        break;
                    }
                    if let Err(e) = stdout.flush().await {
                        tracing::error!(error = %e, "Failed to flush stdout");
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize response");
                }
            }
        }
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn start(&self) -> Result<(), TransportError> {
        let registry = Arc::clone(&self.registry);
        let cancel = self.cancel.clone();

        let handle = tokio::spawn(Self::read_loop(registry, cancel));
        *self.reader.lock().await = Some(handle);

        tracing::info!("Stdio transport listening");
        Ok(())
    }

    async fn stop(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.reader.lock().await.take() {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Stdio reader task ended abnormally");
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
