//! Infrastructure Layer - Storage, protocol, and process-level adapters.
//!
//! This layer contains the concrete implementations behind the application
//! layer's handlers: the column-oriented store, the JSON-RPC transports,
//! and the process lifecycle plumbing.

/// Column-oriented on-disk store access.
pub mod storage;

/// JSON-RPC framing, dispatch, and transports.
pub mod protocol;

/// Configuration loaded from the environment.
pub mod config;

/// Health status reporting.
pub mod health;

/// Structured logging initialization.
pub mod telemetry;

/// Signal handling and teardown coordination.
pub mod shutdown;
