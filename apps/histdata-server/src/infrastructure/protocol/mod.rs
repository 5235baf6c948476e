//! Protocol Layer - JSON-RPC framing and method dispatch.
//!
//! Both transports carry the same JSON-RPC 2.0 methods; the envelopes and
//! the method router live here so the transports only move frames.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::application::registry::{HandlerError, HandlerRegistry, RegistryError};

/// Server lifecycle state machine and transports.
pub mod server;

/// Single-peer stdio transport.
pub mod stdio;

/// Multi-peer HTTP transport with SSE responses.
pub mod http;

/// JSON-RPC protocol version.
pub const JSONRPC_VERSION: &str = "2.0";

/// Protocol revision reported by `initialize`.
pub const PROTOCOL_VERSION: &str = "2025-06-18";

// =============================================================================
// Envelopes
// =============================================================================

/// An incoming JSON-RPC request or notification.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol version marker.
    #[serde(default)]
    pub jsonrpc: String,
    /// Request id; absent for notifications.
    #[serde(default)]
    pub id: Option<Value>,
    /// Method name.
    pub method: String,
    /// Method parameters.
    #[serde(default)]
    pub params: Value,
}

/// An outgoing JSON-RPC response.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    /// Protocol version marker.
    pub jsonrpc: &'static str,
    /// Mirrors the request id (null for parse failures).
    pub id: Value,
    /// Success payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

/// JSON-RPC error object.
#[derive(Debug, Clone, Serialize)]
pub struct RpcError {
    /// Error code (see the `codes` module).
    pub code: i64,
    /// Human-readable message.
    pub message: String,
}

/// JSON-RPC error codes used by this server.
pub mod codes {
    /// The frame was not valid JSON.
    pub const PARSE_ERROR: i64 = -32700;
    /// The frame was not a valid request object.
    pub const INVALID_REQUEST: i64 = -32600;
    /// Unknown method.
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Missing or malformed parameters.
    pub const INVALID_PARAMS: i64 = -32602;
    /// Internal server failure.
    pub const INTERNAL_ERROR: i64 = -32603;
    /// The addressed resource does not exist.
    pub const RESOURCE_NOT_FOUND: i64 = -32002;
}

impl JsonRpcResponse {
    /// Successful response for `id`.
    #[must_use]
    pub const fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Error response for `id`.
    #[must_use]
    pub const fn error(id: Value, code: i64, message: String) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: None,
            error: Some(RpcError { code, message }),
        }
    }

    /// Response for a frame that failed to parse.
    #[must_use]
    pub fn parse_error(message: String) -> Self {
        Self::error(Value::Null, codes::PARSE_ERROR, message)
    }
}

// =============================================================================
// Dispatch
// =============================================================================

/// Route one request to the registry and shape the response.
///
/// Notifications (requests without an id) get no response. Faults inside
/// handlers surface as request-level failures on the current session only.
pub async fn dispatch(
    registry: &Arc<HandlerRegistry>,
    request: JsonRpcRequest,
) -> Option<JsonRpcResponse> {
    let id = request.id?;

    let response = match request.method.as_str() {
        "initialize" => JsonRpcResponse::success(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "serverInfo": {
                    "name": env!("CARGO_PKG_NAME"),
                    "title": "Historical Market Data Server",
                    "version": env!("CARGO_PKG_VERSION"),
                },
                "capabilities": {
                    "resources": {},
                    "tools": {},
                },
            }),
        ),

        "ping" => JsonRpcResponse::success(id, json!({})),

        "resources/list" => JsonRpcResponse::success(
            id,
            json!({ "resources": registry.resource_listings() }),
        ),

        "resources/templates/list" => JsonRpcResponse::success(
            id,
            json!({ "resourceTemplates": registry.resource_descriptors() }),
        ),

        "resources/read" => read_resource(registry, id, &request.params).await,

        "tools/list" => JsonRpcResponse::success(
            id,
            json!({ "tools": registry.tool_descriptors() }),
        ),

        "tools/call" => call_tool(registry, id, request.params).await,

        other => JsonRpcResponse::error(
            id,
            codes::METHOD_NOT_FOUND,
            format!("method not found: {other}"),
        ),
    };

    Some(response)
}

async fn read_resource(
    registry: &Arc<HandlerRegistry>,
    id: Value,
    params: &Value,
) -> JsonRpcResponse {
    let Some(uri) = params.get("uri").and_then(Value::as_str) else {
        return JsonRpcResponse::error(
            id,
            codes::INVALID_PARAMS,
            "resources/read requires a uri parameter".to_string(),
        );
    };

    match registry.read_resource(uri).await {
        Ok(contents) => JsonRpcResponse::success(id, json!({ "contents": [contents] })),
        Err(error) => {
            let code = match &error {
                HandlerError::InvalidRequest(_) => codes::INVALID_PARAMS,
                HandlerError::NotFound(_) => codes::RESOURCE_NOT_FOUND,
                HandlerError::Configuration(_) | HandlerError::Internal(_) => {
                    codes::INTERNAL_ERROR
                }
            };
            JsonRpcResponse::error(id, code, error.to_string())
        }
    }
}

async fn call_tool(registry: &Arc<HandlerRegistry>, id: Value, params: Value) -> JsonRpcResponse {
    let Some(name) = params.get("name").and_then(Value::as_str) else {
        return JsonRpcResponse::error(
            id,
            codes::INVALID_PARAMS,
            "tools/call requires a name parameter".to_string(),
        );
    };

    let arguments = params.get("arguments").cloned().unwrap_or(json!({}));

    match registry.call_tool(name, arguments).await {
        Ok(outcome) => match serde_json::to_value(&outcome) {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(e) => JsonRpcResponse::error(id, codes::INTERNAL_ERROR, e.to_string()),
        },
        Err(RegistryError::UnknownTool(name)) => JsonRpcResponse::error(
            id,
            codes::INVALID_PARAMS,
            format!("unknown tool: {name}"),
        ),
        Err(other) => JsonRpcResponse::error(id, codes::INTERNAL_ERROR, other.to_string()),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::build_registry;
    use crate::infrastructure::storage::StorageGateway;

    fn test_registry() -> Arc<HandlerRegistry> {
        let gateway = Arc::new(StorageGateway::new("/unused"));
        Arc::new(build_registry(&gateway).unwrap())
    }

    fn request(id: Value, method: &str, params: Value) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            method: method.to_string(),
            params,
        }
    }

    #[tokio::test]
    async fn initialize_reports_capabilities() {
        let registry = test_registry();
        let response = dispatch(&registry, request(json!(1), "initialize", Value::Null))
            .await
            .unwrap();

        let result = response.result.unwrap();
        assert_eq!(result["protocolVersion"], PROTOCOL_VERSION);
        assert!(result["capabilities"].get("tools").is_some());
        assert!(result["capabilities"].get("resources").is_some());
    }

    #[tokio::test]
    async fn notifications_get_no_response() {
        let registry = test_registry();
        let notification = JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: "notifications/initialized".to_string(),
            params: Value::Null,
        };
        assert!(dispatch(&registry, notification).await.is_none());
    }

    #[tokio::test]
    async fn unknown_method_is_method_not_found() {
        let registry = test_registry();
        let response = dispatch(&registry, request(json!(2), "nope/nope", Value::Null))
            .await
            .unwrap();
        assert_eq!(response.error.unwrap().code, codes::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn listings_cover_tools_and_resources() {
        let registry = test_registry();

        let response = dispatch(&registry, request(json!(3), "tools/list", Value::Null))
            .await
            .unwrap();
        let tools = response.result.unwrap();
        assert_eq!(tools["tools"][0]["name"], "calculate_ema");

        let response = dispatch(
            &registry,
            request(json!(4), "resources/templates/list", Value::Null),
        )
        .await
        .unwrap();
        let templates = response.result.unwrap();
        assert_eq!(
            templates["resourceTemplates"][0]["uriTemplate"],
            crate::application::histdata::HISTDATA_TEMPLATE
        );

        let response = dispatch(&registry, request(json!(5), "resources/list", Value::Null))
            .await
            .unwrap();
        assert!(
            !response.result.unwrap()["resources"]
                .as_array()
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn read_without_uri_is_invalid_params() {
        let registry = test_registry();
        let response = dispatch(&registry, request(json!(6), "resources/read", json!({})))
            .await
            .unwrap();
        assert_eq!(response.error.unwrap().code, codes::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn unknown_tool_maps_to_invalid_params() {
        let registry = test_registry();
        let response = dispatch(
            &registry,
            request(json!(7), "tools/call", json!({"name": "nope"})),
        )
        .await
        .unwrap();
        assert_eq!(response.error.unwrap().code, codes::INVALID_PARAMS);
    }
}
