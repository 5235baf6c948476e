//! HTTP Transport
//!
//! Multi-peer transport serving JSON-RPC over `POST /mcp`, with each
//! response delivered as a single server-sent event. Every exchange is
//! tagged with a fresh `Mcp-Session-Id` header. The router also exposes a
//! health status document at `GET /` and a machine-readable surface
//! description at `GET /openapi.json`.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::application::registry::HandlerRegistry;
use crate::infrastructure::health::HealthState;
use crate::infrastructure::protocol::server::{Transport, TransportError};
use crate::infrastructure::protocol::{JsonRpcRequest, JsonRpcResponse, dispatch};

/// Session correlation header attached to every protocol exchange.
pub const SESSION_HEADER: &str = "mcp-session-id";

#[derive(Clone)]
struct AppState {
    registry: Arc<HandlerRegistry>,
    health: HealthState,
}

/// HTTP transport bound to a local port.
pub struct HttpTransport {
    registry: Arc<HandlerRegistry>,
    port: u16,
    cancel: CancellationToken,
    serving: Mutex<Option<JoinHandle<()>>>,
}

impl HttpTransport {
    /// Build an unstarted HTTP transport.
    #[must_use]
    pub fn new(registry: Arc<HandlerRegistry>, port: u16) -> Self {
        Self {
            registry,
            port,
            cancel: CancellationToken::new(),
            serving: Mutex::new(None),
        }
    }
}

/// Build the protocol router over a shared registry.
#[must_use]
pub fn router(registry: Arc<HandlerRegistry>) -> Router {
    let state = AppState {
        registry,
        health: HealthState::new(),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(status_handler))
        .route("/openapi.json", get(openapi_handler))
        .route("/mcp", post(mcp_handler))
        .layer(cors)
        .with_state(state)
}

#[async_trait]
impl Transport for HttpTransport {
    async fn start(&self) -> Result<(), TransportError> {
        let app = router(Arc::clone(&self.registry));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            TransportError::Bind {
                port: self.port,
                message: e.to_string(),
            }
        })?;

        let local = listener.local_addr().map_err(|e| TransportError::Io(e.to_string()))?;
        tracing::info!(addr = %local, "HTTP transport listening");

        let cancel = self.cancel.clone();
        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(cancel.cancelled_owned())
                .await;
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP transport failed");
            }
        });

        *self.serving.lock().await = Some(handle);
        Ok(())
    }

    async fn stop(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.serving.lock().await.take() {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "HTTP serve task ended abnormally");
            }
        }
    }
}

// =============================================================================
// Handlers
// =============================================================================

async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.health.status())
}

async fn openapi_handler(State(state): State<AppState>) -> impl IntoResponse {
    let mut paths = serde_json::Map::new();

    paths.insert(
        "/mcp".to_string(),
        json!({
            "post": {
                "summary": "JSON-RPC 2.0 endpoint (responses as server-sent events)",
                "responses": { "200": { "description": "JSON-RPC response as an SSE event" } },
            }
        }),
    );

    for tool in state.registry.tool_descriptors() {
        paths.insert(
            format!("/tools/{}", tool.name),
            json!({
                "post": {
                    "summary": tool.description,
                    "operationId": tool.name,
                    "requestBody": {
                        "content": {
                            "application/json": { "schema": tool.input_schema }
                        }
                    },
                    "responses": { "200": { "description": "Tool result" } },
                }
            }),
        );
    }

    let resources: Vec<_> = state
        .registry
        .resource_descriptors()
        .iter()
        .map(|res| {
            json!({
                "name": res.name,
                "description": res.description,
                "uriTemplate": res.uri_template,
                "mimeType": res.mime_type,
            })
        })
        .collect();

    Json(json!({
        "openapi": "3.0.3",
        "info": {
            "title": "Historical Market Data Server",
            "version": env!("CARGO_PKG_VERSION"),
        },
        "paths": paths,
        "x-resources": resources,
    }))
}

async fn mcp_handler(State(state): State<AppState>, body: Bytes) -> Response {
    let request = match serde_json::from_slice::<JsonRpcRequest>(&body) {
        Ok(request) => request,
        Err(e) => {
            return sse_response(JsonRpcResponse::parse_error(e.to_string()));
        }
    };

    match dispatch(&state.registry, request).await {
        Some(response) => sse_response(response),
        // Notifications carry no response body.
        None => StatusCode::ACCEPTED.into_response(),
    }
}

fn sse_response(response: JsonRpcResponse) -> Response {
    let payload = match serde_json::to_string(&response) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize response");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let stream = futures::stream::once(async move {
        Ok::<_, Infallible>(Event::default().event("message").data(payload))
    });

    let mut response = Sse::new(stream).into_response();

    let session_id = uuid::Uuid::new_v4().to_string();
    if let Ok(value) = HeaderValue::from_str(&session_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(SESSION_HEADER), value);
    }

    response
}

// =============================================================================
// Tests
// =============================================================================
