//! Historical Data Resource
//!
//! Serves time-ranged OHLCV bars as newline-delimited JSON through the
//! templated `forex://histdata/...` address. Each read resolves the four
//! placeholders, opens a chunked scan, and serializes one bar per line in
//! ascending timestamp order.

use std::collections::HashMap;
use std::sync::Arc;

use crate::application::registry::{
    HandlerError, HandlerRegistry, RegistryError, ResourceContents, ResourceDefinition,
    ResourceDescriptor, ResourceListing,
};
use crate::domain::candle::StreamRequest;
use crate::infrastructure::storage::stream::CandleStream;
use crate::infrastructure::storage::{StorageError, StorageGateway};

/// The histdata address template. All four placeholders are required.
pub const HISTDATA_TEMPLATE: &str = "forex://histdata/{symbol}/{timeframe}/{start}/{end}";

/// Content type of histdata reads.
pub const HISTDATA_MIME: &str = "application/x-ndjson";

/// Example concrete address returned by discovery.
pub const HISTDATA_EXAMPLE_URI: &str = "forex://histdata/EURUSD/m1/2024-01-01/2024-01-02";

impl From<StorageError> for HandlerError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::Configuration(msg) => Self::Configuration(msg),
            StorageError::DatasetNotFound { .. } => Self::NotFound(error.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

/// Register the histdata resource.
///
/// # Errors
///
/// Propagates registry registration errors.
pub fn register(
    registry: &mut HandlerRegistry,
    gateway: Arc<StorageGateway>,
) -> Result<(), RegistryError> {
    registry.register_resource(ResourceDefinition {
        descriptor: ResourceDescriptor {
            name: "histdata".to_string(),
            title: "Forex Historical Data".to_string(),
            description: "Immutable OHLCV historical FX spot market data".to_string(),
            uri_template: HISTDATA_TEMPLATE.to_string(),
            mime_type: HISTDATA_MIME.to_string(),
        },
        listings: vec![ResourceListing {
            uri: HISTDATA_EXAMPLE_URI.to_string(),
            name: "Example Forex Data".to_string(),
            description: "One day of EURUSD minute bars".to_string(),
            mime_type: HISTDATA_MIME.to_string(),
        }],
        handler: Arc::new(move |uri, params| {
            let gateway = Arc::clone(&gateway);
            Box::pin(async move { read_histdata(&gateway, uri, &params).await })
        }),
    })
}

async fn read_histdata(
    gateway: &StorageGateway,
    uri: String,
    params: &HashMap<String, String>,
) -> Result<ResourceContents, HandlerError> {
    let field = |name: &str| {
        params.get(name).cloned().ok_or_else(|| {
            HandlerError::InvalidRequest(format!(
                "missing required placeholder {name} in {uri}"
            ))
        })
    };

    let request = StreamRequest::parse(
        &field("symbol")?,
        &field("timeframe")?,
        &field("start")?,
        &field("end")?,
    )
    .map_err(|e| HandlerError::InvalidRequest(e.to_string()))?;

    tracing::info!(
        symbol = %request.symbol,
        timeframe = %request.timeframe,
        start = %request.start,
        end = %request.end,
        "Reading histdata resource"
    );

    let conn = gateway.acquire_connection().await?;
    let mut stream = CandleStream::open(&conn, &request).await?;

    // TODO: stream the NDJSON body to the transport as it is produced
    // instead of buffering the whole payload here.
    let mut text = String::new();
    while let Some(candle) = stream.try_next().await? {
        let line = serde_json::to_string(&candle)
            .map_err(|e| HandlerError::Internal(e.to_string()))?;
        text.push_str(&line);
        text.push('\n');
    }

    Ok(ResourceContents {
        uri,
        mime_type: HISTDATA_MIME.to_string(),
        text,
    })
}

// =============================================================================
// Tests
// =============================================================================
