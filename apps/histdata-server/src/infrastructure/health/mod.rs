//! Health Status Reporting
//!
//! JSON status payload served at `GET /` by the HTTP transport. Used by
//! container orchestrators and load balancers to probe liveness.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Health status payload.
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    /// Always "ok" while the process serves requests.
    pub status: &'static str,
    /// Human-readable banner.
    pub message: String,
    /// Server version.
    pub version: &'static str,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
}

/// Tracks the process start time for uptime reporting.
#[derive(Debug, Clone, Copy)]
pub struct HealthState {
    started_at: Instant,
}

impl HealthState {
    /// Capture the start instant.
    #[must_use]
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
        }
    }

    /// Build the current status payload.
    #[must_use]
    pub fn status(&self) -> StatusResponse {
        StatusResponse {
            status: "ok",
            message: "Historical market data server is running".to_string(),
            version: env!("CARGO_PKG_VERSION"),
            uptime_secs: self.started_at.elapsed().as_secs(),
            current_time: Utc::now(),
        }
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_expected_fields() {
        let payload = serde_json::to_value(HealthState::new().status()).unwrap();
        assert_eq!(payload["status"], "ok");
        assert_eq!(payload["version"], env!("CARGO_PKG_VERSION"));
        assert!(payload["uptime_secs"].is_u64());
        assert!(payload["current_time"].is_string());
    }
}
