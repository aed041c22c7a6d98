//! Error types for upstream identity provider calls.

use std::time::Duration;

use crate::error::AuthError;

/// Errors that can occur while talking to an upstream identity provider or
/// verifying a partner's assertion.
#[derive(Debug, thiserror::Error)]
pub enum FederationError {
    /// A network error occurred.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The upstream call did not finish in time.
    #[error("Upstream request timed out after {0:?}")]
    Timeout(Duration),

    /// The upstream answered with a non-success status.
    #[error("Upstream returned HTTP {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },

    /// The upstream returned an OAuth error response.
    #[error("OAuth error from upstream: {error} - {description}")]
    OAuth {
        /// HTTP status code of the error response.
        status: u16,
        /// The OAuth error code.
        error: String,
        /// Optional error description.
        description: String,
    },

    /// The upstream redirected back with an `error` parameter.
    #[error("Upstream denied the authorization: {error}")]
    Denied {
        /// The OAuth error code from the callback.
        error: String,
        /// Optional error description from the callback.
        description: Option<String>,
    },

    /// The upstream response could not be understood.
    #[error("Invalid upstream response: {0}")]
    InvalidResponse(String),

    /// The assertion issuer is not trusted.
    #[error("Untrusted issuer: {0}")]
    UntrustedIssuer(String),

    /// No key in the issuer's key set matches the token.
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// The assertion or ID token failed verification.
    #[error("Invalid assertion: {0}")]
    InvalidAssertion(String),

    /// Failed to parse a URL.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// Delegated login is not configured.
    #[error("Delegated login is not configured")]
    NotConfigured,
}

impl FederationError {
    /// Creates an `OAuth` error from an upstream error response.
    #[must_use]
    pub fn oauth_error(status: u16, error: impl Into<String>, description: impl Into<String>) -> Self {
        Self::OAuth {
            status,
            error: error.into(),
            description: description.into(),
        }
    }

    /// Returns `true` for transient failures worth retrying: timeouts,
    /// connection errors, 5xx and 429. Upstream 4xx rejections are final.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Network(e) => match e.status() {
                Some(status) => is_transient_status(status.as_u16()),
                None => e.is_timeout() || e.is_connect() || e.is_request(),
            },
            Self::Status { status, .. } | Self::OAuth { status, .. } => {
                is_transient_status(*status)
            }
            _ => false,
        }
    }
}

fn is_transient_status(status: u16) -> bool {
    status >= 500 || status == 429
}

impl From<FederationError> for AuthError {
    fn from(err: FederationError) -> Self {
        if err.is_retryable() {
            return AuthError::temporarily_unavailable(err.to_string());
        }
        match err {
            FederationError::Denied { error, description } => AuthError::access_denied(
                description.map_or_else(|| error.clone(), |d| format!("{error}: {d}")),
            ),
            FederationError::UntrustedIssuer(_)
            | FederationError::KeyNotFound(_)
            | FederationError::InvalidAssertion(_) => AuthError::invalid_grant(err.to_string()),
            FederationError::Url(_) | FederationError::NotConfigured => {
                AuthError::configuration(err.to_string())
            }
            other => AuthError::access_denied(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FederationError::oauth_error(400, "invalid_grant", "code expired");
        assert!(err.to_string().contains("invalid_grant"));
        assert!(err.to_string().contains("code expired"));

        let err = FederationError::Status {
            status: 502,
            body: "bad gateway".to_string(),
        };
        assert_eq!(err.to_string(), "Upstream returned HTTP 502: bad gateway");
    }

    #[test]
    fn test_retry_classification() {
        assert!(FederationError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(
            FederationError::Status {
                status: 503,
                body: String::new()
            }
            .is_retryable()
        );
        assert!(
            FederationError::Status {
                status: 429,
                body: String::new()
            }
            .is_retryable()
        );
        assert!(!FederationError::oauth_error(400, "invalid_grant", "").is_retryable());
        assert!(
            !FederationError::Denied {
                error: "access_denied".to_string(),
                description: None
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_conversion_into_auth_error() {
        let err: AuthError = FederationError::Timeout(Duration::from_secs(1)).into();
        assert!(matches!(err, AuthError::TemporarilyUnavailable { .. }));
        assert_eq!(err.oauth_error_code(), "temporarily_unavailable");

        let err: AuthError = FederationError::oauth_error(401, "invalid_client", "").into();
        assert!(matches!(err, AuthError::AccessDenied { .. }));

        let err: AuthError = FederationError::Denied {
            error: "access_denied".to_string(),
            description: Some("user cancelled".to_string()),
        }
        .into();
        assert_eq!(err.to_string(), "Access denied: access_denied: user cancelled");

        let err: AuthError = FederationError::UntrustedIssuer("https://x".to_string()).into();
        assert!(matches!(err, AuthError::InvalidGrant { .. }));

        let err: AuthError = FederationError::NotConfigured.into();
        assert!(matches!(err, AuthError::Configuration { .. }));
    }
}
