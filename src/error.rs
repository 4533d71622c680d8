//! Error kinds surfaced to the user

use thiserror::Error;

/// Every failure the viewer reports. The `Display` text is the message shown
/// to the user; none of these halt the application.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ViewerError {
    #[error("Login credentials are not set.")]
    MissingCredentials,

    #[error("Target URL parameter is required.")]
    MissingTargetParameter,

    #[error("API request failed: {status} {reason}")]
    UpstreamHttp { status: u16, reason: String },

    #[error("Request failed: {0}")]
    UpstreamTransport(String),

    #[error("Authentication failed. Check credentials.")]
    AuthenticationFailed,

    #[error("Received non-JSON response from server.")]
    NonJsonResponse,

    #[error("Could not load EPG data. The provider's server may be temporarily down.")]
    EpgUnavailable,

    #[error("EPG not available for this channel.")]
    EpgChannelUnknown,
}

impl ViewerError {
    pub fn http(status: u16) -> Self {
        let reason = axum::http::StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("Unknown")
            .to_string();
        ViewerError::UpstreamHttp { status, reason }
    }

    pub fn transport(err: impl std::fmt::Display) -> Self {
        ViewerError::UpstreamTransport(err.to_string())
    }
}

pub type ViewerResult<T> = Result<T, ViewerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_error_message() {
        let err = ViewerError::http(404);
        assert_eq!(err.to_string(), "API request failed: 404 Not Found");
    }

    #[test]
    fn test_transport_message_carries_cause() {
        let err = ViewerError::transport("connection refused");
        assert_eq!(err.to_string(), "Request failed: connection refused");
    }
}
