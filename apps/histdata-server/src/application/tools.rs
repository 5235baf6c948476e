//! Tool Handlers
//!
//! Named, schema-validated operations. Currently one tool: `calculate_ema`.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};

use crate::application::registry::{
    HandlerError, HandlerRegistry, RegistryError, ToolDefinition, ToolDescriptor,
};
use crate::domain::indicators;

/// Stable name of the EMA tool.
pub const EMA_TOOL: &str = "calculate_ema";

#[derive(Debug, Deserialize)]
struct EmaInput {
    closes: Vec<f64>,
    period: i64,
}

/// Register every tool this server exposes.
///
/// # Errors
///
/// Propagates registry registration errors.
pub fn register(registry: &mut HandlerRegistry) -> Result<(), RegistryError> {
    registry.register_tool(ToolDefinition {
        descriptor: ToolDescriptor {
            name: EMA_TOOL.to_string(),
            title: "Calculate EMA".to_string(),
            description: "Calculate the Exponential Moving Average (EMA) on OHLCV data"
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "closes": {
                        "type": "array",
                        "items": { "type": "number" },
                        "description": "List of closing prices (oldest to newest)"
                    },
                    "period": {
                        "type": "integer",
                        "description": "The EMA period (e.g., 14, 20, 50)"
                    }
                },
                "required": ["closes", "period"]
            }),
        },
        handler: Arc::new(|arguments| Box::pin(async move { calculate_ema(&arguments) })),
    })
}

fn calculate_ema(arguments: &Value) -> Result<Value, HandlerError> {
    let input: EmaInput = serde_json::from_value(arguments.clone())
        .map_err(|e| HandlerError::InvalidRequest(format!("invalid tool input: {e}")))?;

    let period = usize::try_from(input.period)
        .map_err(|_| HandlerError::InvalidRequest(indicators::IndicatorError::InvalidPeriod.to_string()))?;

    let results = indicators::ema(period, &input.closes)
        .map_err(|e| HandlerError::InvalidRequest(e.to_string()))?;

    // ema() guarantees at least one value on success.
    let latest = results.last().copied().unwrap_or_default();
    let history = &results[..results.len() - 1];

    Ok(json!({
        "period": period,
        "latestValue": latest,
        "history": history,
    }))
}

// =============================================================================
// Tests
// =============================================================================
