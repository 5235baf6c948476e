//! Historical Market Data Server - Binary Entrypoint
//!
//! Wires configuration, storage, the protocol server, and shutdown
//! coordination together.
//!
//! # Environment Variables
//!
//! - `HISTDATA_ROOT` - Root directory of the on-disk store (required)
//! - `MCP_TRANSPORT` - `stdio` (default) or `http`
//! - `MCP_PORT` - HTTP transport port (default 3000)
//! - `RUST_LOG` - Tracing filter directives

use std::sync::Arc;

use histdata_server::infrastructure::protocol::server::McpServer;
use histdata_server::infrastructure::shutdown::ShutdownCoordinator;
use histdata_server::infrastructure::storage::StorageGateway;
use histdata_server::infrastructure::{config, telemetry};

#[tokio::main]
async fn main() {
    config::load_dotenv();
    telemetry::init();

    let config = match config::ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            std::process::exit(1);
        }
    };

    tracing::info!(
        transport = config.transport.as_str(),
        root = %config.storage.root.display(),
        "Starting historical market data server"
    );

    let gateway = Arc::new(StorageGateway::new(config.storage.root.clone()));
    let server = Arc::new(McpServer::new(Arc::clone(&gateway), config.server.port));

    let (coordinator, fault_reporter) =
        ShutdownCoordinator::new(Arc::clone(&server), Arc::clone(&gateway));
    fault_reporter.install_panic_hook();

    if let Err(e) = server.start(config.transport).await {
        tracing::error!(error = %e, "Failed to start server");
        std::process::exit(1);
    }

    let trigger = coordinator.wait_for_trigger().await;
    coordinator.run_teardown(&trigger).await;

    std::process::exit(trigger.exit_code());
}
