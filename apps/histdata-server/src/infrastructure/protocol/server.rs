//! Protocol Server Lifecycle
//!
//! `McpServer` owns registry population and exactly one transport, selected
//! at startup and fixed for the process lifetime. The lifecycle is the
//! state machine `Unstarted -> Registering -> Running -> Stopping ->
//! Stopped`; `stop` is idempotent and safe before `start`.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::application::build_registry;
use crate::application::registry::{HandlerRegistry, RegistryError};
use crate::infrastructure::config::TransportMode;
use crate::infrastructure::protocol::http::HttpTransport;
use crate::infrastructure::protocol::stdio::StdioTransport;
use crate::infrastructure::storage::StorageGateway;

// =============================================================================
// Transport Capability
// =============================================================================

/// The capability every transport kind implements exactly once.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Bind and begin serving. Returns once the transport is accepting
    /// frames; serving continues in background tasks.
    async fn start(&self) -> Result<(), TransportError>;

    /// Stop serving, waiting for in-flight connections to close.
    async fn stop(&self);
}

/// Transport lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind the network listener.
    #[error("failed to bind port {port}: {message}")]
    Bind {
        /// Requested port.
        port: u16,
        /// Underlying error text.
        message: String,
    },

    /// The connection dropped mid-exchange.
    #[error("transport i/o error: {0}")]
    Io(String),
}

// =============================================================================
// Server
// =============================================================================

/// Lifecycle states. Mode switches require a fresh process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Built, nothing bound.
    Unstarted,
    /// Populating the handler registry.
    Registering,
    /// Serving on the chosen transport.
    Running,
    /// Teardown in progress.
    Stopping,
    /// Fully stopped; storage released.
    Stopped,
}

struct Inner {
    state: ServerState,
    registry: Option<Arc<HandlerRegistry>>,
    transport: Option<Arc<dyn Transport>>,
}

/// The protocol server.
pub struct McpServer {
    gateway: Arc<StorageGateway>,
    port: u16,
    inner: Mutex<Inner>,
}

/// Server lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Handler registration failed (wiring bug).
    #[error("registration failed: {0}")]
    Registration(#[from] RegistryError),

    /// The transport failed to start.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// `start` called after the server already stopped.
    #[error("server already stopped; mode changes require a fresh process")]
    AlreadyStopped,
}

impl McpServer {
    /// Create an unstarted server over the shared storage gateway.
    #[must_use]
    pub fn new(gateway: Arc<StorageGateway>, port: u16) -> Self {
        Self {
            gateway,
            port,
            inner: Mutex::new(Inner {
                state: ServerState::Unstarted,
                registry: None,
                transport: None,
            }),
        }
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> ServerState {
        self.inner.lock().await.state
    }

    /// The populated registry, if `start` has run.
    pub async fn registry(&self) -> Option<Arc<HandlerRegistry>> {
        self.inner.lock().await.registry.clone()
    }

    /// Populate the registry (once) and bind the chosen transport.
    ///
    /// Calling `start` again while running is a no-op; existing
    /// registrations are reused.
    ///
    /// # Errors
    ///
    /// Fails when registration or the transport bind fails, or when the
    /// server has already been stopped.
    pub async fn start(&self, mode: TransportMode) -> Result<(), ServerError> {
        let mut inner = self.inner.lock().await;

        match inner.state {
            ServerState::Running | ServerState::Registering => return Ok(()),
            ServerState::Stopping | ServerState::Stopped => {
                return Err(ServerError::AlreadyStopped);
            }
            ServerState::Unstarted => {}
        }

        inner.state = ServerState::Registering;

        let registry = if let Some(registry) = &inner.registry {
            Arc::clone(registry)
        } else {
            match build_registry(&self.gateway) {
                Ok(registry) => {
                    let registry = Arc::new(registry);
                    tracing::info!(
                        tools = registry.tool_descriptors().len(),
                        resources = registry.resource_descriptors().len(),
                        "Handler registry populated"
                    );
                    inner.registry = Some(Arc::clone(&registry));
                    registry
                }
                Err(e) => {
                    inner.state = ServerState::Unstarted;
                    return Err(ServerError::Registration(e));
                }
            }
        };

        let transport: Arc<dyn Transport> = match mode {
            TransportMode::Stdio => Arc::new(StdioTransport::new(registry)),
            TransportMode::Http => Arc::new(HttpTransport::new(registry, self.port)),
        };

        match transport.start().await {
            Ok(()) => {
                inner.transport = Some(transport);
                inner.state = ServerState::Running;
                tracing::info!(mode = mode.as_str(), "Protocol server running");
                Ok(())
            }
            Err(e) => {
                inner.state = ServerState::Unstarted;
                Err(ServerError::Transport(e))
            }
        }
    }

    /// Stop the transport and release storage.
    ///
    /// Safe to call multiple times or before `start`.
    pub async fn stop(&self) {
        let transport = {
            let mut inner = self.inner.lock().await;
            match inner.state {
                ServerState::Stopped => return,
                ServerState::Stopping => return,
                _ => {}
            }
            inner.state = ServerState::Stopping;
            inner.transport.take()
        };

        if let Some(transport) = transport {
            transport.stop().await;
        }

        self.gateway.close().await;

        self.inner.lock().await.state = ServerState::Stopped;
        tracing::info!("Protocol server stopped");
    }
}

// =============================================================================
// Tests
// =============================================================================
