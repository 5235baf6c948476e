//! Columnar Store Gateway
//!
//! Owns the lifecycle of the single on-disk store handle and hands out the
//! one reusable connection shared by every session. The store is a directory
//! of per-dataset Parquet files plus a `store.json` manifest; opening the
//! store means validating the root and parsing that manifest, done exactly
//! once behind an explicit guard.
//!
//! A missing root or manifest is a configuration error. There is no
//! in-memory fallback: masking a missing production dataset would be a
//! correctness bug, not a convenience.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// Lazy chunked candle scans.
pub mod stream;

/// Store seeding support (used by the histdata-seed binary and tests).
pub mod writer;

/// File name of the store manifest inside the storage root.
pub const STORE_MANIFEST: &str = "store.json";

/// The store format version this server reads.
pub const SUPPORTED_FORMAT_VERSION: u32 = 1;

// =============================================================================
// Manifest
// =============================================================================

/// Store-level metadata, parsed once when the store is opened.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreManifest {
    /// On-disk format version.
    pub format_version: u32,
    /// Optional human-readable store description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

// =============================================================================
// Dataset Resolution
// =============================================================================

/// A resolved reference to one (symbol, timeframe) dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetLocator {
    /// Sanitized symbol component.
    pub symbol: String,
    /// Sanitized timeframe component.
    pub timeframe: String,
    /// Backing Parquet file.
    pub path: PathBuf,
}

/// Derive the backing file path for a (symbol, timeframe) pair.
///
/// Resolution is pure: it depends only on the storage root and the
/// sanitized inputs, never on what is on disk.
#[must_use]
pub fn dataset_path(root: &Path, symbol: &str, timeframe: &str) -> DatasetLocator {
    let symbol: String = symbol
        .to_lowercase()
        .chars()
        .filter(char::is_ascii_lowercase)
        .collect();
    let timeframe: String = timeframe
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        .collect();

    let path = root.join(format!("{symbol}_{timeframe}.parquet"));
    DatasetLocator {
        symbol,
        timeframe,
        path,
    }
}

// =============================================================================
// Storage Handle and Connection
// =============================================================================

/// The process-wide opened store: validated root plus parsed manifest.
///
/// At most one handle is alive at any time; it is created lazily on first
/// use and released exactly once at teardown.
#[derive(Debug)]
pub struct StorageHandle {
    root: PathBuf,
    manifest: StoreManifest,
}

impl StorageHandle {
    /// Storage root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Parsed store manifest.
    #[must_use]
    pub const fn manifest(&self) -> &StoreManifest {
        &self.manifest
    }
}

/// The shared read connection over the opened store.
///
/// Cheap to clone; every clone refers to the same underlying handle.
#[derive(Debug, Clone)]
pub struct StoreConnection {
    handle: Arc<StorageHandle>,
}

impl StoreConnection {
    /// The underlying store handle.
    #[must_use]
    pub fn handle(&self) -> &Arc<StorageHandle> {
        &self.handle
    }

    /// Resolve a (symbol, timeframe) pair to its dataset.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::DatasetNotFound` when the backing Parquet
    /// file does not exist, and `StorageError::Io` when existence cannot
    /// be determined at all.
    pub async fn resolve_dataset(
        &self,
        symbol: &str,
        timeframe: &str,
    ) -> Result<DatasetLocator, StorageError> {
        let locator = dataset_path(&self.handle.root, symbol, timeframe);

        let exists = tokio::fs::try_exists(&locator.path).await?;
        if !exists {
            return Err(StorageError::DatasetNotFound {
                symbol: symbol.to_string(),
                timeframe: timeframe.to_string(),
            });
        }

        Ok(locator)
    }
}

// =============================================================================
// Storage Gateway
// =============================================================================

/// Owner of the store lifecycle.
///
/// Constructed once at process start and passed by handle to every component
/// that needs data access. The lazily-opened handle sits behind a mutex so
/// concurrent first callers cannot each open their own store instance.
#[derive(Debug)]
pub struct StorageGateway {
    root: PathBuf,
    state: Mutex<Option<Arc<StorageHandle>>>,
}

impl StorageGateway {
    /// Create a gateway for the given storage root. Nothing is opened yet.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            state: Mutex::new(None),
        }
    }

    /// Configured storage root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the shared connection, opening the store on first call.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Configuration` when the storage root or the
    /// store manifest is missing or unreadable.
    pub async fn acquire_connection(&self) -> Result<StoreConnection, StorageError> {
        let mut state = self.state.lock().await;

        if state.is_none() {
            let handle = Arc::new(open_store(&self.root).await?);
            tracing::info!(
                root = %self.root.display(),
                format_version = handle.manifest.format_version,
                "Storage opened"
            );
            *state = Some(handle);
        }

        // Invariant above: the slot is always populated here.
        state.as_ref().map_or_else(
            || Err(StorageError::Configuration("store handle vanished".to_string())),
            |handle| {
                Ok(StoreConnection {
                    handle: Arc::clone(handle),
                })
            },
        )
    }

    /// Release the store handle and connection.
    ///
    /// Idempotent: safe to call when never opened or already closed. A later
    /// `acquire_connection` reopens the store.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        if state.take().is_some() {
            tracing::info!(root = %self.root.display(), "Storage released");
        }
    }

    /// Whether the store is currently open.
    pub async fn is_open(&self) -> bool {
        self.state.lock().await.is_some()
    }
}

/// One-time open: validate the root directory and parse the manifest.
async fn open_store(root: &Path) -> Result<StorageHandle, StorageError> {
    let meta = tokio::fs::metadata(root).await.map_err(|_| {
        StorageError::Configuration(format!("storage root does not exist: {}", root.display()))
    })?;
    if !meta.is_dir() {
        return Err(StorageError::Configuration(format!(
            "storage root is not a directory: {}",
            root.display()
        )));
    }

    let manifest_path = root.join(STORE_MANIFEST);
    let raw = tokio::fs::read_to_string(&manifest_path).await.map_err(|_| {
        StorageError::Configuration(format!(
            "store manifest missing: {}",
            manifest_path.display()
        ))
    })?;

    let manifest: StoreManifest = serde_json::from_str(&raw).map_err(|e| {
        StorageError::Configuration(format!(
            "store manifest unreadable: {}: {e}",
            manifest_path.display()
        ))
    })?;

    if manifest.format_version != SUPPORTED_FORMAT_VERSION {
        return Err(StorageError::Configuration(format!(
            "unsupported store format version {} (expected {})",
            manifest.format_version, SUPPORTED_FORMAT_VERSION
        )));
    }

    Ok(StorageHandle {
        root: root.to_path_buf(),
        manifest,
    })
}

// =============================================================================
// Errors
// =============================================================================

/// Storage-layer errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Storage root or manifest missing/misconfigured.
    #[error("storage configuration error: {0}")]
    Configuration(String),

    /// No backing dataset for the requested symbol/timeframe.
    #[error("no dataset found for {symbol} {timeframe}")]
    DatasetNotFound {
        /// Requested symbol.
        symbol: String,
        /// Requested timeframe.
        timeframe: String,
    },

    /// Dataset timestamps regress across row groups.
    #[error("dataset not in ascending timestamp order: {path}")]
    OutOfOrder {
        /// Backing Parquet file.
        path: PathBuf,
    },

    /// Parquet read/decode failure.
    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// Arrow compute failure during the range filter.
    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// I/O failure while reading the store.
    #[error("storage i/o error: {0}")]
    Io(#[from] std::io::Error),
}

// =============================================================================
// Tests
// =============================================================================
