//! Handler Registry
//!
//! Dispatch tables mapping templated resource URIs and named tools to
//! handler functions. One registry serves every session; handlers are
//! stateless with respect to session identity.
//!
//! The tool dispatch path is a catch-all boundary: a handler error or panic
//! is converted to the structured `isError` payload and never escapes as an
//! unhandled fault. Duplicate registrations are rejected deterministically.

use std::collections::HashMap;

use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

// =============================================================================
// Envelopes
// =============================================================================

/// One block of human-readable response content.
#[derive(Debug, Clone, Serialize)]
pub struct ContentBlock {
    /// Content discriminator; always "text" here.
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// The content itself.
    pub text: String,
}

impl ContentBlock {
    /// Build a text content block.
    #[must_use]
    pub const fn text(text: String) -> Self {
        Self { kind: "text", text }
    }
}

/// Structured result of one tool invocation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolOutcome {
    /// Human-readable content blocks.
    pub content: Vec<ContentBlock>,
    /// Machine-readable payload on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
    /// Marks a structured error payload.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl ToolOutcome {
    /// Successful outcome carrying `payload` both as text and structured.
    #[must_use]
    pub fn success(payload: Value) -> Self {
        Self {
            content: vec![ContentBlock::text(payload.to_string())],
            structured_content: Some(payload),
            is_error: false,
        }
    }

    /// Structured error outcome.
    #[must_use]
    pub fn error(message: String) -> Self {
        Self {
            content: vec![ContentBlock::text(message)],
            structured_content: None,
            is_error: true,
        }
    }
}

/// Result of one resource read.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceContents {
    /// The concrete URI that was read.
    pub uri: String,
    /// Content type of `text`.
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    /// The body.
    pub text: String,
}

// =============================================================================
// Descriptors
// =============================================================================

/// Static description of a registered tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    /// Stable tool name.
    pub name: String,
    /// Display title.
    pub title: String,
    /// What the tool does.
    pub description: String,
    /// JSON-schema input contract.
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// Static description of a registered resource template.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceDescriptor {
    /// Resource name.
    pub name: String,
    /// Display title.
    pub title: String,
    /// What the resource serves.
    pub description: String,
    /// URI template with `{placeholder}` segments.
    #[serde(rename = "uriTemplate")]
    pub uri_template: String,
    /// Content type of reads.
    #[serde(rename = "mimeType")]
    pub mime_type: String,
}

/// One example concrete address, returned by discovery.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceListing {
    /// Concrete, readable URI.
    pub uri: String,
    /// Display name.
    pub name: String,
    /// What a read of this address returns.
    pub description: String,
    /// Content type of reads.
    #[serde(rename = "mimeType")]
    pub mime_type: String,
}

// =============================================================================
// Handlers
// =============================================================================

tokio::task_local! {
    /// Set for the duration of a tool handler invocation.
    static DISPATCH_SCOPE: ();
}

/// Whether the current code path (including an unwind in progress) is inside
/// the tool dispatch boundary, where panics are caught and shaped into
/// structured error payloads. The process panic hook consults this so that
/// contained panics are not treated as fatal faults.
#[must_use]
pub fn panic_is_contained() -> bool {
    DISPATCH_SCOPE.try_with(|()| ()).is_ok()
}

/// Async tool handler: validated-JSON arguments in, structured payload out.
pub type ToolHandler =
    Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, HandlerError>> + Send + Sync>;

/// Async resource handler: concrete URI plus resolved placeholders in,
/// contents out.
pub type ResourceHandler = Arc<
    dyn Fn(String, HashMap<String, String>) -> BoxFuture<'static, Result<ResourceContents, HandlerError>>
        + Send
        + Sync,
>;

/// A named tool plus its handler.
#[derive(Clone)]
pub struct ToolDefinition {
    /// Static descriptor.
    pub descriptor: ToolDescriptor,
    /// Invocation handler.
    pub handler: ToolHandler,
}

/// A templated resource plus its handler and discovery listings.
#[derive(Clone)]
pub struct ResourceDefinition {
    /// Static descriptor.
    pub descriptor: ResourceDescriptor,
    /// Example concrete addresses for discovery.
    pub listings: Vec<ResourceListing>,
    /// Read handler.
    pub handler: ResourceHandler,
}

// =============================================================================
// URI Templates
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

/// A parsed `scheme://seg/{placeholder}/...` template.
#[derive(Debug, Clone)]
pub struct UriTemplate {
    raw: String,
    scheme: String,
    segments: Vec<Segment>,
}

impl UriTemplate {
    /// Parse a template string.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::BadTemplate` when the template has no scheme
    /// or an unterminated placeholder.
    pub fn parse(raw: &str) -> Result<Self, RegistryError> {
        let Some((scheme, rest)) = raw.split_once("://") else {
            return Err(RegistryError::BadTemplate(raw.to_string()));
        };

        let mut segments = Vec::new();
        for part in rest.split('/') {
            if let Some(name) = part.strip_prefix('{') {
                let Some(name) = name.strip_suffix('}') else {
                    return Err(RegistryError::BadTemplate(raw.to_string()));
                };
                segments.push(Segment::Placeholder(name.to_string()));
            } else {
                segments.push(Segment::Literal(part.to_string()));
            }
        }

        Ok(Self {
            raw: raw.to_string(),
            scheme: scheme.to_string(),
            segments,
        })
    }

    /// The template string as registered.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Match a concrete URI against this template.
    ///
    /// Returns the placeholder bindings on a full match, `None` otherwise.
    /// Every declared placeholder must be bound to a non-empty scalar.
    #[must_use]
    pub fn match_uri(&self, uri: &str) -> Option<HashMap<String, String>> {
        let (scheme, rest) = uri.split_once("://")?;
        if scheme != self.scheme {
            return None;
        }

        let parts: Vec<&str> = rest.split('/').collect();
        if parts.len() != self.segments.len() {
            return None;
        }

        let mut bindings = HashMap::new();
        for (segment, part) in self.segments.iter().zip(&parts) {
            match segment {
                Segment::Literal(lit) => {
                    if lit != part {
                        return None;
                    }
                }
                Segment::Placeholder(name) => {
                    if part.is_empty() {
                        return None;
                    }
                    bindings.insert(name.clone(), (*part).to_string());
                }
            }
        }

        Some(bindings)
    }
}

// =============================================================================
// Registry
// =============================================================================

/// The dispatch tables shared by every transport session.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    tools: HashMap<String, ToolDefinition>,
    tool_order: Vec<String>,
    resources: Vec<(UriTemplate, ResourceDefinition)>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under its stable name.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::DuplicateTool` when the name is taken.
    pub fn register_tool(&mut self, definition: ToolDefinition) -> Result<(), RegistryError> {
        let name = definition.descriptor.name.clone();
        if self.tools.contains_key(&name) {
            return Err(RegistryError::DuplicateTool(name));
        }
        self.tool_order.push(name.clone());
        self.tools.insert(name, definition);
        Ok(())
    }

    /// Register a resource template.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::BadTemplate` for an unparsable template and
    /// `RegistryError::DuplicateResource` when the template is taken.
    pub fn register_resource(
        &mut self,
        definition: ResourceDefinition,
    ) -> Result<(), RegistryError> {
        let template = UriTemplate::parse(&definition.descriptor.uri_template)?;
        if self
            .resources
            .iter()
            .any(|(t, _)| t.as_str() == template.as_str())
        {
            return Err(RegistryError::DuplicateResource(
                template.as_str().to_string(),
            ));
        }
        self.resources.push((template, definition));
        Ok(())
    }

    /// Registered tool descriptors, in registration order.
    #[must_use]
    pub fn tool_descriptors(&self) -> Vec<&ToolDescriptor> {
        self.tool_order
            .iter()
            .filter_map(|name| self.tools.get(name).map(|d| &d.descriptor))
            .collect()
    }

    /// Registered resource template descriptors.
    #[must_use]
    pub fn resource_descriptors(&self) -> Vec<&ResourceDescriptor> {
        self.resources.iter().map(|(_, d)| &d.descriptor).collect()
    }

    /// Discovery listings: example concrete addresses across all resources.
    #[must_use]
    pub fn resource_listings(&self) -> Vec<&ResourceListing> {
        self.resources
            .iter()
            .flat_map(|(_, d)| d.listings.iter())
            .collect()
    }

    /// Invoke a named tool.
    ///
    /// An unknown name is a dispatch error; everything raised inside the
    /// handler — including a panic — comes back as a structured
    /// `is_error` outcome.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::UnknownTool` only.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolOutcome, RegistryError> {
        let Some(definition) = self.tools.get(name) else {
            return Err(RegistryError::UnknownTool(name.to_string()));
        };

        let future = DISPATCH_SCOPE.scope((), (definition.handler)(arguments));
        match tokio::spawn(future).await {
            Ok(Ok(payload)) => Ok(ToolOutcome::success(payload)),
            Ok(Err(error)) => {
                tracing::debug!(tool = name, error = %error, "Tool returned error");
                Ok(ToolOutcome::error(error.to_string()))
            }
            Err(join_error) => {
                tracing::error!(tool = name, error = %join_error, "Tool handler panicked");
                Ok(ToolOutcome::error(format!(
                    "internal error in tool {name}: {join_error}"
                )))
            }
        }
    }

    /// Read a resource by concrete URI.
    ///
    /// # Errors
    ///
    /// `HandlerError::NotFound` when no template matches; handler errors
    /// propagate unchanged.
    pub async fn read_resource(&self, uri: &str) -> Result<ResourceContents, HandlerError> {
        for (template, definition) in &self.resources {
            if let Some(bindings) = template.match_uri(uri) {
                return (definition.handler)(uri.to_string(), bindings).await;
            }
        }

        Err(HandlerError::NotFound(format!("unknown resource: {uri}")))
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Errors raised inside resource/tool handlers, shaped uniformly by the
/// protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// Missing or malformed request input.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The addressed entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Server-side misconfiguration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Anything else.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Registration and dispatch errors.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// A tool with this name is already registered.
    #[error("tool already registered: {0}")]
    DuplicateTool(String),

    /// A resource with this template is already registered.
    #[error("resource already registered: {0}")]
    DuplicateResource(String),

    /// The URI template did not parse.
    #[error("malformed uri template: {0}")]
    BadTemplate(String),

    /// No tool registered under this name.
    #[error("unknown tool: {0}")]
    UnknownTool(String),
}

// =============================================================================
// Tests
// =============================================================================
