//! Identity provider error types.
//!
//! Every operation of the engine reports failures through [`AuthError`].
//! Variants map onto OAuth 2.0 error codes and HTTP status classes so the
//! boundary can render structured responses without inspecting messages.

use std::fmt;

/// Errors that can occur while managing clients, requests and tokens.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// An entity with the given id does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of entity ("client", "secret", "auth request", ...).
        entity: &'static str,
        /// The id that was looked up.
        id: String,
    },

    /// Client authentication failed (unknown client or secret mismatch).
    #[error("Invalid client: {message}")]
    InvalidClient {
        /// Description of why authentication failed.
        message: String,
    },

    /// An authorization request was exchanged more than once.
    #[error("Authorization request already consumed: {id}")]
    Replay {
        /// The auth request id.
        id: String,
    },

    /// An authorization request or token outlived its lifetime.
    #[error("{entity} expired")]
    Expired {
        /// Kind of entity that expired.
        entity: &'static str,
    },

    /// The operation conflicts with the current state of the entity.
    #[error("Conflict: {message}")]
    Conflict {
        /// Description of the conflict.
        message: String,
    },

    /// The requested scopes exceed what the client may obtain.
    #[error("Invalid scope: {message}")]
    InvalidScope {
        /// Description of the rejected scopes.
        message: String,
    },

    /// The token has been revoked.
    #[error("Token revoked")]
    TokenRevoked,

    /// PKCE code verifier does not match the code challenge.
    #[error("PKCE verification failed")]
    PkceVerificationFailed,

    /// The grant (code, refresh token or assertion) is invalid.
    #[error("Invalid grant: {message}")]
    InvalidGrant {
        /// Description of why the grant is invalid.
        message: String,
    },

    /// The request is malformed or misses a required field.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Description of why the request is invalid.
        message: String,
    },

    /// The bearer token could not be parsed or verified.
    #[error("Invalid token: {message}")]
    InvalidToken {
        /// Description of why the token is invalid.
        message: String,
    },

    /// The request lacks valid bearer credentials.
    #[error("Unauthorized: {message}")]
    Unauthorized {
        /// Description of why the request is unauthorized.
        message: String,
    },

    /// The grant type is not handled by this server.
    #[error("Unsupported grant type: {grant_type}")]
    UnsupportedGrantType {
        /// The unsupported grant type.
        grant_type: String,
    },

    /// The upstream identity provider is temporarily unreachable.
    #[error("Temporarily unavailable: {message}")]
    TemporarilyUnavailable {
        /// Description of the transient failure.
        message: String,
    },

    /// The upstream identity provider or the end user denied the request.
    #[error("Access denied: {message}")]
    AccessDenied {
        /// Description of why access was denied.
        message: String,
    },

    /// The backing store failed.
    #[error("Storage error: {message}")]
    Storage {
        /// Description of the storage error.
        message: String,
    },

    /// The configuration is invalid.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration error.
        message: String,
    },

    /// An unexpected internal error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl AuthError {
    /// Creates a new `NotFound` error.
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Creates a new `InvalidClient` error.
    #[must_use]
    pub fn invalid_client(message: impl Into<String>) -> Self {
        Self::InvalidClient {
            message: message.into(),
        }
    }

    /// Creates a new `Replay` error.
    #[must_use]
    pub fn replay(id: impl Into<String>) -> Self {
        Self::Replay { id: id.into() }
    }

    /// Creates a new `Expired` error.
    #[must_use]
    pub fn expired(entity: &'static str) -> Self {
        Self::Expired { entity }
    }

    /// Creates a new `Conflict` error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidScope` error.
    #[must_use]
    pub fn invalid_scope(message: impl Into<String>) -> Self {
        Self::InvalidScope {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidGrant` error.
    #[must_use]
    pub fn invalid_grant(message: impl Into<String>) -> Self {
        Self::InvalidGrant {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidRequest` error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidToken` error.
    #[must_use]
    pub fn invalid_token(message: impl Into<String>) -> Self {
        Self::InvalidToken {
            message: message.into(),
        }
    }

    /// Creates a new `Unauthorized` error.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    /// Creates a new `UnsupportedGrantType` error.
    #[must_use]
    pub fn unsupported_grant_type(grant_type: impl Into<String>) -> Self {
        Self::UnsupportedGrantType {
            grant_type: grant_type.into(),
        }
    }

    /// Creates a new `TemporarilyUnavailable` error.
    #[must_use]
    pub fn temporarily_unavailable(message: impl Into<String>) -> Self {
        Self::TemporarilyUnavailable {
            message: message.into(),
        }
    }

    /// Creates a new `AccessDenied` error.
    #[must_use]
    pub fn access_denied(message: impl Into<String>) -> Self {
        Self::AccessDenied {
            message: message.into(),
        }
    }

    /// Creates a new `Storage` error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if this is a client error (4xx category).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        !self.is_server_error()
    }

    /// Returns `true` if this is a server error (5xx category).
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            Self::TemporarilyUnavailable { .. }
                | Self::Storage { .. }
                | Self::Configuration { .. }
                | Self::Internal { .. }
        )
    }

    /// Returns `true` if retrying the same request may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TemporarilyUnavailable { .. })
    }

    /// Returns `true` for misuse of an authorization request
    /// (replay, expiry or an invalid state transition).
    #[must_use]
    pub fn is_auth_request_misuse(&self) -> bool {
        matches!(
            self,
            Self::Replay { .. } | Self::Expired { .. } | Self::Conflict { .. }
        )
    }

    /// Returns the error category for logging/monitoring purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidClient { .. } | Self::Unauthorized { .. } => {
                ErrorCategory::Authentication
            }
            Self::Replay { .. }
            | Self::Expired { .. }
            | Self::Conflict { .. }
            | Self::PkceVerificationFailed
            | Self::InvalidGrant { .. } => ErrorCategory::Grant,
            Self::InvalidScope { .. } | Self::AccessDenied { .. } => ErrorCategory::Authorization,
            Self::TokenRevoked | Self::InvalidToken { .. } => ErrorCategory::Token,
            Self::NotFound { .. }
            | Self::InvalidRequest { .. }
            | Self::UnsupportedGrantType { .. } => ErrorCategory::Validation,
            Self::TemporarilyUnavailable { .. } => ErrorCategory::Federation,
            Self::Storage { .. } => ErrorCategory::Infrastructure,
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }

    /// Returns the OAuth 2.0 error code for this error.
    ///
    /// `NotFound` is reported as `invalid_grant` because token endpoint
    /// lookups (codes, refresh tokens) are the only place it reaches a
    /// protocol response; admin surfaces use [`AuthError::http_status`].
    #[must_use]
    pub fn oauth_error_code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "invalid_grant",
            Self::InvalidClient { .. } => "invalid_client",
            Self::Replay { .. } => "invalid_grant",
            Self::Expired { .. } => "invalid_grant",
            Self::Conflict { .. } => "invalid_grant",
            Self::InvalidScope { .. } => "invalid_scope",
            Self::TokenRevoked => "invalid_token",
            Self::PkceVerificationFailed => "invalid_grant",
            Self::InvalidGrant { .. } => "invalid_grant",
            Self::InvalidRequest { .. } => "invalid_request",
            Self::InvalidToken { .. } => "invalid_token",
            Self::Unauthorized { .. } => "invalid_token",
            Self::UnsupportedGrantType { .. } => "unsupported_grant_type",
            Self::TemporarilyUnavailable { .. } => "temporarily_unavailable",
            Self::AccessDenied { .. } => "access_denied",
            Self::Storage { .. } => "server_error",
            Self::Configuration { .. } => "server_error",
            Self::Internal { .. } => "server_error",
        }
    }

    /// Returns the HTTP status code a REST surface should answer with.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::InvalidClient { .. } | Self::Unauthorized { .. } | Self::InvalidToken { .. } => {
                401
            }
            Self::TokenRevoked => 401,
            Self::AccessDenied { .. } => 403,
            Self::Conflict { .. } => 409,
            Self::TemporarilyUnavailable { .. } => 503,
            Self::Storage { .. } | Self::Configuration { .. } | Self::Internal { .. } => 500,
            _ => 400,
        }
    }
}

/// Categories of errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Client or bearer authentication failed.
    Authentication,
    /// Permission or scope checks failed.
    Authorization,
    /// Authorization grant misuse.
    Grant,
    /// Token validation failed.
    Token,
    /// Request validation errors.
    Validation,
    /// Upstream identity provider errors.
    Federation,
    /// Infrastructure/storage errors.
    Infrastructure,
    /// Configuration errors.
    Configuration,
    /// Internal server errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Authentication => write!(f, "authentication"),
            Self::Authorization => write!(f, "authorization"),
            Self::Grant => write!(f, "grant"),
            Self::Token => write!(f, "token"),
            Self::Validation => write!(f, "validation"),
            Self::Federation => write!(f, "federation"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Configuration => write!(f, "configuration"),
            Self::Internal => write!(f, "internal"),
        }
    }
}
