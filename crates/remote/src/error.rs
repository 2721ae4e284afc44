//! Error types for the remote backends.

use leadsync_core::errors::RemoteError;
use thiserror::Error;

/// Result type alias for remote client operations.
pub type Result<T> = std::result::Result<T, RemoteClientError>;

/// Errors raised while talking to the REST or realtime endpoints.
#[derive(Debug, Error)]
pub enum RemoteClientError {
    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error response from the REST API
    #[error("API error ({status}) [{code}]: {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    /// WebSocket transport error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Channel join refused or channel error reported by the server
    #[error("Realtime error: {0}")]
    Realtime(String),

    /// Invalid client configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl RemoteClientError {
    pub fn api(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn realtime(message: impl Into<String>) -> Self {
        Self::Realtime(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

impl From<RemoteClientError> for RemoteError {
    fn from(err: RemoteClientError) -> Self {
        match err {
            RemoteClientError::Api { code, message, .. } => RemoteError::new(code, message),
            RemoteClientError::Http(e) => {
                let code = e
                    .status()
                    .map(|s| s.as_u16().to_string())
                    .unwrap_or_else(|| "http".to_string());
                RemoteError::new(code, e.to_string())
            }
            RemoteClientError::Json(e) => RemoteError::new("json", e.to_string()),
            RemoteClientError::WebSocket(e) => RemoteError::new("websocket", e.to_string()),
            RemoteClientError::Realtime(message) => RemoteError::new("realtime", message),
            RemoteClientError::Config(message) => RemoteError::new("config", message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_keeps_backend_code() {
        let err: RemoteError =
            RemoteClientError::api(409, "23505", "duplicate key value").into();
        assert_eq!(err.code, "23505");
        assert!(err.is_unique_violation());
    }

    #[test]
    fn test_realtime_error_maps_to_realtime_code() {
        let err: RemoteError = RemoteClientError::realtime("join refused").into();
        assert_eq!(err, RemoteError::new("realtime", "join refused"));
    }
}
