//! Client secret types.
//!
//! A secret exists in three shapes:
//! - [`Secret`] is the persisted record holding the salted hash.
//! - [`SecretSummary`] is what client reads expose.
//! - [`CreatedSecret`] is returned once at creation and is the only value that
//!   ever carries the plaintext.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Number of trailing plaintext characters kept for display.
pub const LAST_DIGITS_LEN: usize = 4;

/// Persisted client secret. Never serialized.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret {
    /// Secret id, unique within the client.
    pub id: String,
    /// Owning client id.
    pub client_id: String,
    /// Optional label.
    pub name: Option<String>,
    /// Argon2id PHC string (algorithm, parameters, salt and digest).
    pub hash: String,
    /// Last characters of the plaintext.
    pub last_digits: String,
    /// Arbitrary key/value metadata.
    pub metadata: BTreeMap<String, String>,
    /// Creation time.
    pub created_at: OffsetDateTime,
}

impl Secret {
    /// Returns the display-safe summary of this secret.
    #[must_use]
    pub fn summary(&self) -> SecretSummary {
        SecretSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            last_digits: self.last_digits.clone(),
            created_at: self.created_at,
        }
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secret")
            .field("id", &self.id)
            .field("client_id", &self.client_id)
            .field("name", &self.name)
            .field("hash", &"<redacted>")
            .field("last_digits", &self.last_digits)
            .finish()
    }
}

/// Secret as exposed by client reads and lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretSummary {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub last_digits: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Result of creating a secret: the only value holding the plaintext.
///
/// Neither `Clone` nor `Deserialize`: the plaintext cannot be loaded back
/// from storage or copied.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedSecret {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub last_digits: String,
    /// Plaintext secret.
    pub clear: String,
}

impl fmt::Debug for CreatedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreatedSecret")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("last_digits", &self.last_digits)
            .field("clear", &"<redacted>")
            .finish()
    }
}

/// Returns the last [`LAST_DIGITS_LEN`] characters of a plaintext secret.
#[must_use]
pub fn last_digits(plaintext: &str) -> String {
    let count = plaintext.chars().count();
    plaintext
        .chars()
        .skip(count.saturating_sub(LAST_DIGITS_LEN))
        .collect()
}
