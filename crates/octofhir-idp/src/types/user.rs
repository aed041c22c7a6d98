//! Local users established through delegated authentication.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// A user known to this server, keyed by upstream subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Local user id; used as the subject of issued tokens.
    pub id: String,
    /// Subject asserted by the upstream identity provider.
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}
