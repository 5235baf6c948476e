//! Shutdown Coordination
//!
//! Maps every way the process can end onto one idempotent teardown path:
//! stop the protocol server, release storage, exit with the right code.
//! Signals exit cleanly; uncaught faults exit non-zero.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, mpsc};

use crate::infrastructure::protocol::server::McpServer;
use crate::infrastructure::storage::StorageGateway;

/// What ended the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationTrigger {
    /// SIGINT (Ctrl+C).
    Interrupt,
    /// SIGTERM.
    Terminate,
    /// SIGHUP.
    Hangup,
    /// SIGQUIT.
    Quit,
    /// An uncaught fault escaped every request boundary.
    Fault(String),
}

impl TerminationTrigger {
    /// Process exit code for this trigger.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Fault(_) => 1,
            _ => 0,
        }
    }

    /// Trigger name for logging.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Interrupt => "SIGINT",
            Self::Terminate => "SIGTERM",
            Self::Hangup => "SIGHUP",
            Self::Quit => "SIGQUIT",
            Self::Fault(_) => "fault",
        }
    }
}

/// Reports process-fatal faults into the shutdown path.
///
/// Cloneable; a clone is installed in the panic hook so panics that escape
/// every task boundary still run the teardown path.
#[derive(Clone)]
pub struct FaultReporter {
    tx: mpsc::Sender<String>,
}

impl FaultReporter {
    /// Report a fatal fault. Later reports after the first are dropped.
    pub fn report(&self, description: String) {
        let _ = self.tx.try_send(description);
    }

    /// Route uncaught panics from any thread into the fault channel.
    ///
    /// Panics raised inside the tool dispatch boundary are caught there and
    /// shaped into structured errors; the hook skips those and reports only
    /// panics no boundary contains. The previous hook still runs, so panic
    /// messages keep appearing on stderr.
    pub fn install_panic_hook(&self) {
        let reporter = self.clone();
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if !crate::application::registry::panic_is_contained() {
                reporter.report(info.to_string());
            }
            previous(info);
        }));
    }
}

/// Coordinates the one-and-only teardown of the process.
pub struct ShutdownCoordinator {
    server: Arc<McpServer>,
    gateway: Arc<StorageGateway>,
    fired: AtomicBool,
    fault_rx: Mutex<mpsc::Receiver<String>>,
}

impl ShutdownCoordinator {
    /// Build a coordinator and the fault reporter feeding it.
    #[must_use]
    pub fn new(server: Arc<McpServer>, gateway: Arc<StorageGateway>) -> (Self, FaultReporter) {
        let (tx, rx) = mpsc::channel(1);
        let coordinator = Self {
            server,
            gateway,
            fired: AtomicBool::new(false),
            fault_rx: Mutex::new(rx),
        };
        (coordinator, FaultReporter { tx })
    }

    /// Block until a termination signal arrives or a fault is reported.
    ///
    /// # Panics
    ///
    /// Panics if signal handlers cannot be installed. Handlers are critical
    /// for graceful shutdown, so failing fast at startup beats running a
    /// process that cannot respond to termination signals.
    #[allow(clippy::expect_used)]
    #[cfg(unix)]
    pub async fn wait_for_trigger(&self) -> TerminationTrigger {
        use tokio::signal::unix::{SignalKind, signal};

        let mut interrupt = signal(SignalKind::interrupt())
            .expect("SIGINT handler installation is critical for graceful shutdown");
        let mut terminate = signal(SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown");
        let mut hangup = signal(SignalKind::hangup())
            .expect("SIGHUP handler installation is critical for graceful shutdown");
        let mut quit = signal(SignalKind::quit())
            .expect("SIGQUIT handler installation is critical for graceful shutdown");

        let mut fault_rx = self.fault_rx.lock().await;

        tokio::select! {
            _ = interrupt.recv() => TerminationTrigger::Interrupt,
            _ = terminate.recv() => TerminationTrigger::Terminate,
            _ = hangup.recv() => TerminationTrigger::Hangup,
            _ = quit.recv() => TerminationTrigger::Quit,
            fault = fault_rx.recv() => TerminationTrigger::Fault(
                fault.unwrap_or_else(|| "fault channel closed".to_string()),
            ),
        }
    }

    /// Block until Ctrl+C or a fault is reported.
    ///
    /// # Panics
    ///
    /// Panics if the Ctrl+C handler cannot be installed.
    #[allow(clippy::expect_used)]
    #[cfg(not(unix))]
    pub async fn wait_for_trigger(&self) -> TerminationTrigger {
        let mut fault_rx = self.fault_rx.lock().await;

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.expect("signal handler installation is critical for graceful shutdown");
                TerminationTrigger::Interrupt
            }
            fault = fault_rx.recv() => TerminationTrigger::Fault(
                fault.unwrap_or_else(|| "fault channel closed".to_string()),
            ),
        }
    }

    /// Run the teardown exactly once. Repeat calls return immediately.
    pub async fn run_teardown(&self, trigger: &TerminationTrigger) {
        if self.fired.swap(true, Ordering::SeqCst) {
            return;
        }

        match trigger {
            TerminationTrigger::Fault(description) => {
                tracing::error!(fault = %description, "Shutting down after uncaught fault");
            }
            signal => {
                tracing::info!(signal = signal.as_str(), "Received termination signal, shutting down");
            }
        }

        self.server.stop().await;
        // stop() releases storage; close again in case the server never
        // started.
        self.gateway.close().await;

        tracing::info!("Teardown complete");
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::storage::writer;

    #[test]
    fn exit_codes_distinguish_faults_from_signals() {
        assert_eq!(TerminationTrigger::Interrupt.exit_code(), 0);
        assert_eq!(TerminationTrigger::Terminate.exit_code(), 0);
        assert_eq!(TerminationTrigger::Hangup.exit_code(), 0);
        assert_eq!(TerminationTrigger::Quit.exit_code(), 0);
        assert_eq!(TerminationTrigger::Fault("boom".to_string()).exit_code(), 1);
    }

    #[tokio::test]
    async fn teardown_runs_once_and_releases_storage() {
        let dir = tempfile::tempdir().unwrap();
        writer::write_manifest(dir.path()).unwrap();

        let gateway = Arc::new(StorageGateway::new(dir.path()));
        gateway.acquire_connection().await.unwrap();

        let server = Arc::new(McpServer::new(Arc::clone(&gateway), 0));
        let (coordinator, _reporter) =
            ShutdownCoordinator::new(Arc::clone(&server), Arc::clone(&gateway));

        coordinator
            .run_teardown(&TerminationTrigger::Terminate)
            .await;
        assert!(!gateway.is_open().await);

        // Second call is a no-op.
        coordinator
            .run_teardown(&TerminationTrigger::Interrupt)
            .await;
    }

    #[tokio::test]
    async fn contained_tool_panics_do_not_trigger_teardown() {
        use crate::application::registry::{
            HandlerRegistry, ToolDefinition, ToolDescriptor,
        };
        use serde_json::{Value, json};
        use std::time::Duration;

        let gateway = Arc::new(StorageGateway::new("/unused"));
        let server = Arc::new(McpServer::new(Arc::clone(&gateway), 0));
        let (coordinator, reporter) = ShutdownCoordinator::new(server, gateway);
        reporter.install_panic_hook();

        let mut registry = HandlerRegistry::new();
        registry
            .register_tool(ToolDefinition {
                descriptor: ToolDescriptor {
                    name: "bad".to_string(),
                    title: "Bad".to_string(),
                    description: "always panics".to_string(),
                    input_schema: json!({"type": "object"}),
                },
                handler: Arc::new(|_| Box::pin(async { panic!("handler bug") })),
            })
            .unwrap();

        // The dispatch boundary catches the panic and shapes it.
        let outcome = registry.call_tool("bad", Value::Null).await.unwrap();
        assert!(outcome.is_error);

        // No fault reaches the coordinator; the server keeps running.
        let wait = tokio::time::timeout(
            Duration::from_millis(200),
            coordinator.wait_for_trigger(),
        )
        .await;
        assert!(wait.is_err(), "contained panic must not end the process");
    }

    #[tokio::test]
    async fn reported_fault_wakes_the_waiter() {
        let gateway = Arc::new(StorageGateway::new("/unused"));
        let server = Arc::new(McpServer::new(Arc::clone(&gateway), 0));
        let (coordinator, reporter) = ShutdownCoordinator::new(server, gateway);

        reporter.report("worker died".to_string());

        let trigger = coordinator.wait_for_trigger().await;
        assert_eq!(
            trigger,
            TerminationTrigger::Fault("worker died".to_string())
        );
        assert_eq!(trigger.exit_code(), 1);
    }
}
