//! Server Configuration
//!
//! Configuration loaded from environment variables, optionally seeded from
//! a `.env` file found in the working directory or any ancestor.

use std::path::PathBuf;

/// Transport selection. Fixed for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportMode {
    /// Single-peer line-framed stdio.
    #[default]
    Stdio,
    /// Multi-peer HTTP with server-sent event responses.
    Http,
}

impl TransportMode {
    /// Parse transport mode from string. Unknown values fall back to stdio
    /// with a warning.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "http" => Self::Http,
            "stdio" => Self::Stdio,
            other => {
                tracing::warn!(value = other, "Unknown transport mode, defaulting to stdio");
                Self::Stdio
            }
        }
    }

    /// Get the transport mode name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Stdio => "stdio",
            Self::Http => "http",
        }
    }
}

/// Storage settings.
#[derive(Debug, Clone)]
pub struct StorageSettings {
    /// Root directory of the column-oriented store.
    pub root: PathBuf,
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// HTTP transport port.
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { port: 3000 }
    }
}

/// Complete server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Transport selection.
    pub transport: TransportMode,
    /// Storage settings.
    pub storage: StorageSettings,
    /// Server port settings.
    pub server: ServerSettings,
}

impl ServerConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `HISTDATA_ROOT` is missing or empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        let root = std::env::var("HISTDATA_ROOT")
            .map_err(|_| ConfigError::MissingEnvVar("HISTDATA_ROOT".to_string()))?;

        if root.is_empty() {
            return Err(ConfigError::EmptyValue("HISTDATA_ROOT".to_string()));
        }

        let transport = std::env::var("MCP_TRANSPORT")
            .map(|s| TransportMode::from_str_case_insensitive(&s))
            .unwrap_or_default();

        let server = ServerSettings {
            port: parse_env_u16("MCP_PORT", ServerSettings::default().port),
        };

        Ok(Self {
            transport,
            storage: StorageSettings {
                root: PathBuf::from(root),
            },
            server,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
}

fn parse_env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Load a `.env` file from the current directory or the nearest ancestor
/// that has one. Missing files are fine; existing process environment
/// always wins over file values.
pub fn load_dotenv() {
    let Ok(cwd) = std::env::current_dir() else {
        return;
    };

    for dir in cwd.ancestors() {
        let candidate = dir.join(".env");
        if candidate.is_file() {
            match dotenvy::from_path(&candidate) {
                Ok(()) => tracing::debug!(path = %candidate.display(), "Loaded .env"),
                Err(e) => tracing::warn!(error = %e, "Failed to load .env"),
            }
            return;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
