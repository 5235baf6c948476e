#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::default_trait_access
    )
)]

//! Historical Market Data Server
//!
//! A JSON-RPC server exposing immutable OHLCV market history from a
//! column-oriented on-disk store, plus indicator tools computed over it.
//! One process serves one transport: line-framed stdio for a single
//! embedded peer, or HTTP with server-sent event responses for many.
//!
//! # Layers (inside -> outside)
//!
//! - **Domain**: Bar types, request parsing, indicator math
//!   - `candle`: OHLCV bars and time-range request validation
//!   - `indicators`: EMA computation
//!
//! - **Application**: Handler registry and the handlers it serves
//!   - `registry`: Dispatch tables for resources and tools
//!   - `histdata`: The templated historical-data resource
//!   - `tools`: Named tool handlers (`calculate_ema`)
//!
//! - **Infrastructure**: Storage, protocol, and process plumbing
//!   - `storage`: Manifest-validated store, chunked dataset scans
//!   - `protocol`: JSON-RPC envelopes, dispatch, stdio and HTTP transports
//!   - `config`: Environment-driven configuration
//!   - `shutdown`: Signal handling and idempotent teardown
//!
//! # Data Flow
//!
//! ```text
//! stdin / POST /mcp ──► dispatch ──► registry ──► handler ──► CandleStream
//!                                                                  │
//! stdout / SSE event ◄── JSON-RPC response ◄── NDJSON bars ◄───────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Bar types and indicator math with no I/O.
pub mod domain;

/// Application layer - Handler registry and handlers.
pub mod application;

/// Infrastructure layer - Storage, protocol, and process plumbing.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::candle::{Candle, RequestParseError, StreamRequest};
pub use domain::indicators::{IndicatorError, ema};

// Application surface
pub use application::build_registry;
pub use application::registry::{HandlerError, HandlerRegistry, RegistryError, ToolOutcome};

// Storage
pub use infrastructure::storage::{StorageError, StorageGateway};

// Configuration
pub use infrastructure::config::{ConfigError, ServerConfig, TransportMode, load_dotenv};

// Server lifecycle
pub use infrastructure::protocol::server::{McpServer, ServerError, ServerState};
pub use infrastructure::shutdown::{FaultReporter, ShutdownCoordinator, TerminationTrigger};

// Telemetry
pub use infrastructure::telemetry::init as init_telemetry;
