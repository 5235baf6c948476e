//! Domain Layer - Core market data types and pure computations.
//!
//! This layer contains the canonical bar representation, request parsing,
//! and indicator math. All types here are pure Rust with serialization
//! support and no I/O.

/// OHLCV bar types and stream request parsing.
pub mod candle;

/// Pure technical indicator computations.
pub mod indicators;
