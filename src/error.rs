//! Error types
//!
//! `CimiError` covers everything a single request can fail with. It never
//! represents a process-level failure: the schema registry stays untouched
//! whatever happens to a request. `SchemaError` is only produced while the
//! registry is being built at startup.

use reqwest::StatusCode;
use thiserror::Error;

/// Result alias used across the request pipeline
pub type Result<T, E = CimiError> = std::result::Result<T, E>;

/// Per-request failure
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CimiError {
    #[error("Unknown resource type: {0}")]
    UnknownResourceType(String),

    #[error("Operation '{operation}' is not supported for {resource_type} by the active driver")]
    UnsupportedOperation {
        resource_type: String,
        operation: String,
    },

    #[error("Malformed reference '{href}': {reason}")]
    MalformedReference { href: String, reason: String },

    #[error("{resource_type} '{id}' not found")]
    NotFound { resource_type: String, id: String },

    #[error("Failed to resolve reference '{href}': {reason}")]
    ReferenceResolution { href: String, reason: String },

    #[error("{resource_type} is missing required attribute '{attribute}'")]
    MissingRequiredAttribute {
        resource_type: String,
        attribute: String,
    },

    #[error("Bad request - {message}. Client sent: {supplied} which produced {derived}")]
    BadRequest {
        message: String,
        supplied: String,
        derived: String,
    },

    #[error("Operation {action} failed on {resource_type} '{id}': {message}")]
    ActionDispatchFailure {
        resource_type: String,
        id: String,
        action: String,
        message: String,
    },

    #[error("Backend operation '{operation}' failed: {message}")]
    Backend { operation: String, message: String },

    #[error("Backend operation '{operation}' did not complete before the request deadline")]
    Timeout { operation: String },

    #[error("Request cancelled")]
    Cancelled,
}

impl CimiError {
    /// Bad request raised while parsing a body, before any mapping happened
    pub fn unparsable(message: impl Into<String>, supplied: &str) -> Self {
        Self::BadRequest {
            message: message.into(),
            supplied: supplied.to_string(),
            derived: "nothing".to_string(),
        }
    }

    /// Flatten an adapter error into a `Backend` failure
    pub fn backend(operation: &str, error: &anyhow::Error) -> Self {
        Self::Backend {
            operation: operation.to_string(),
            message: format!("{:#}", error),
        }
    }

    pub fn not_found(resource_type: &str, id: &str) -> Self {
        Self::NotFound {
            resource_type: resource_type.to_string(),
            id: id.to_string(),
        }
    }

    pub fn unsupported(resource_type: &str, operation: &str) -> Self {
        Self::UnsupportedOperation {
            resource_type: resource_type.to_string(),
            operation: operation.to_string(),
        }
    }

    /// Status an HTTP front-end should answer with
    pub fn status(&self) -> StatusCode {
        match self {
            Self::UnknownResourceType(_) | Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::UnsupportedOperation { .. } => StatusCode::METHOD_NOT_ALLOWED,
            Self::MalformedReference { .. } | Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::ReferenceResolution { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::MissingRequiredAttribute { .. } | Self::ActionDispatchFailure { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            },
            Self::Backend { .. } => StatusCode::BAD_GATEWAY,
            Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// Invalid resource declaration (startup only)
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("Resource type '{0}' is already declared")]
    DuplicateResourceType(String),

    #[error("Collection '{collection}' is already used by {existing}")]
    DuplicateCollection { collection: String, existing: String },

    #[error("Attribute '{attribute}' is declared twice in {resource_type}")]
    DuplicateAttribute {
        resource_type: String,
        attribute: String,
    },

    #[error("{0} declares more than one identity attribute")]
    MultipleIdentity(String),

    #[error("Unknown resource type: {0}")]
    UnknownResourceType(String),

    #[error("Failed to parse embedded resource definitions: {0}")]
    Parse(#[from] serde_json::Error),
}
