//! Error types shared by gateways, sessions and services.

use thiserror::Error;

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, AdsError>;

/// Errors surfaced by the ad-platform agent.
///
/// Empty query results are never represented here: zero rows is a normal
/// outcome (`false`, an empty list, or a no-op).
#[derive(Debug, Error)]
pub enum AdsError {
    /// Session or credential acquisition failed
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Network or protocol level failure (including SOAP faults)
    #[error("Transport error: {0}")]
    Transport(String),

    /// The platform accepted the request but rejected one or more operations
    #[error("API operation failed: {message}")]
    ApiOperation { message: String, errors: Vec<String> },

    /// The platform does not offer this capability
    #[error("Unsupported on {platform}: {operation}")]
    Unsupported {
        platform: &'static str,
        operation: String,
    },

    /// Caller input is inconsistent with the requested operation
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Missing or malformed configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// The platform answered with a body we could not interpret
    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl AdsError {
    /// Build an `ApiOperation` error from a list of per-operation messages.
    pub fn api_operation(errors: Vec<String>) -> Self {
        let message = if errors.is_empty() {
            "platform reported a failure without details".to_string()
        } else {
            errors.join("; ")
        };
        AdsError::ApiOperation { message, errors }
    }

    pub fn unsupported(platform: &'static str, operation: impl Into<String>) -> Self {
        AdsError::Unsupported {
            platform,
            operation: operation.into(),
        }
    }
}

impl From<reqwest::Error> for AdsError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            AdsError::Decode(err.to_string())
        } else {
            AdsError::Transport(err.to_string())
        }
    }
}

impl From<quick_xml::Error> for AdsError {
    fn from(err: quick_xml::Error) -> Self {
        AdsError::Decode(err.to_string())
    }
}

impl From<serde_json::Error> for AdsError {
    fn from(err: serde_json::Error) -> Self {
        AdsError::Decode(err.to_string())
    }
}
