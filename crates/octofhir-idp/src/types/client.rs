//! OAuth 2.0 client domain types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use url::Url;

use super::secret::SecretSummary;

// =============================================================================
// Client
// =============================================================================

/// OAuth 2.0 client registration.
///
/// Secrets are only ever carried as [`SecretSummary`] values; hashes stay in
/// the secret store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    /// Unique client identifier.
    pub id: String,

    /// Human-readable display name.
    #[serde(default)]
    pub name: String,

    /// Free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Public clients cannot hold a secret and skip secret verification.
    #[serde(default)]
    pub public: bool,

    /// Trusted clients skip consent and scope restriction.
    #[serde(default)]
    pub trusted: bool,

    /// Registered redirect URIs, compared by exact match.
    #[serde(default)]
    pub redirect_uris: Vec<String>,

    /// Registered post-logout redirect URIs.
    #[serde(default)]
    pub post_logout_redirect_uris: Vec<String>,

    /// Scopes this client may obtain.
    #[serde(default)]
    pub scopes: Vec<String>,

    /// Arbitrary key/value metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,

    /// Summaries of the client's secrets, oldest first.
    #[serde(default)]
    pub secrets: Vec<SecretSummary>,

    /// When the client was registered.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Client {
    /// Builds a client record from creation options.
    #[must_use]
    pub fn from_options(id: String, options: ClientOptions) -> Self {
        Self {
            id,
            name: options.name,
            description: options.description,
            public: options.public,
            trusted: options.trusted,
            redirect_uris: options.redirect_uris,
            post_logout_redirect_uris: options.post_logout_redirect_uris,
            scopes: options.scopes,
            metadata: options.metadata,
            secrets: Vec::new(),
            created_at: crate::now_seconds(),
        }
    }

    /// Validates the client configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is empty, a scope contains whitespace, or
    /// a public client registers a redirect URI that is not absolute.
    pub fn validate(&self) -> Result<(), ClientValidationError> {
        if self.id.trim().is_empty() {
            return Err(ClientValidationError::EmptyId);
        }

        if let Some(scope) = self
            .scopes
            .iter()
            .find(|s| s.is_empty() || s.contains(char::is_whitespace))
        {
            return Err(ClientValidationError::InvalidScope(scope.clone()));
        }

        if self.public {
            for uri in self
                .redirect_uris
                .iter()
                .chain(self.post_logout_redirect_uris.iter())
            {
                validate_absolute_uri(uri)?;
            }
        }

        Ok(())
    }

    /// Returns `true` if `redirect_uri` is registered for this client.
    #[must_use]
    pub fn is_redirect_uri_allowed(&self, redirect_uri: &str) -> bool {
        self.redirect_uris.iter().any(|uri| uri == redirect_uri)
    }

    /// Returns `true` if this client may authenticate with a secret.
    #[must_use]
    pub fn accepts_secrets(&self) -> bool {
        !self.public
    }

    /// Applies a partial update, replacing only the provided fields.
    pub fn apply(&mut self, patch: ClientPatch) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(description) = patch.description {
            self.description = Some(description);
        }
        if let Some(public) = patch.public {
            self.public = public;
        }
        if let Some(trusted) = patch.trusted {
            self.trusted = trusted;
        }
        if let Some(uris) = patch.redirect_uris {
            self.redirect_uris = uris;
        }
        if let Some(uris) = patch.post_logout_redirect_uris {
            self.post_logout_redirect_uris = uris;
        }
        if let Some(scopes) = patch.scopes {
            self.scopes = scopes;
        }
        if let Some(metadata) = patch.metadata {
            self.metadata = metadata;
        }
    }
}

fn validate_absolute_uri(uri: &str) -> Result<(), ClientValidationError> {
    match Url::parse(uri) {
        Ok(url) if !url.cannot_be_a_base() => Ok(()),
        _ => Err(ClientValidationError::InvalidRedirectUri(uri.to_string())),
    }
}

// =============================================================================
// Create / Update Payloads
// =============================================================================

/// Options for registering a new client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientOptions {
    pub name: String,
    pub description: Option<String>,
    pub public: bool,
    pub trusted: bool,
    pub redirect_uris: Vec<String>,
    pub post_logout_redirect_uris: Vec<String>,
    pub scopes: Vec<String>,
    pub metadata: BTreeMap<String, String>,
}

/// Partial client update. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub public: Option<bool>,
    pub trusted: Option<bool>,
    pub redirect_uris: Option<Vec<String>>,
    pub post_logout_redirect_uris: Option<Vec<String>>,
    pub scopes: Option<Vec<String>>,
    pub metadata: Option<BTreeMap<String, String>>,
}

// =============================================================================
// Validation Errors
// =============================================================================

/// Client validation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientValidationError {
    #[error("client id cannot be empty")]
    EmptyId,

    #[error("redirect URI must be an absolute URI: {0}")]
    InvalidRedirectUri(String),

    #[error("invalid scope: {0:?}")]
    InvalidScope(String),
}

impl From<ClientValidationError> for crate::AuthError {
    fn from(err: ClientValidationError) -> Self {
        Self::invalid_request(err.to_string())
    }
}
