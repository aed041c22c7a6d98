//! Scope parsing and narrowing.
//!
//! Scopes are kept as ordered, de-duplicated lists. Narrowing always
//! preserves the order in which the caller requested them.

use crate::types::Client;

/// OpenID Connect scopes every client may request for user-bound grants.
pub const IDENTITY_SCOPES: &[&str] = &["openid", "profile", "email", "offline_access"];

/// Splits a space-delimited scope string, dropping duplicates.
#[must_use]
pub fn parse_scopes(scope: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for s in scope.split_whitespace() {
        if !out.iter().any(|existing| existing == s) {
            out.push(s.to_string());
        }
    }
    out
}

/// Joins scopes into the space-delimited wire form.
#[must_use]
pub fn join_scopes(scopes: &[String]) -> String {
    scopes.join(" ")
}

/// Scopes of `requested` that also appear in `allowed`, in requested order.
#[must_use]
pub fn intersect(requested: &[String], allowed: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for scope in requested {
        if allowed.contains(scope) && !out.contains(scope) {
            out.push(scope.clone());
        }
    }
    out
}

/// Scopes of `requested` that are missing from `allowed`.
#[must_use]
pub fn excess<'a>(requested: &'a [String], allowed: &[String]) -> Vec<&'a str> {
    requested
        .iter()
        .filter(|s| !allowed.contains(s))
        .map(String::as_str)
        .collect()
}

/// Scopes a client may obtain. User-bound grants may always ask for the
/// OpenID Connect identity scopes.
#[must_use]
pub fn allowed_scopes(client: &Client, user_bound: bool) -> Vec<String> {
    let mut allowed = client.scopes.clone();
    if user_bound {
        for scope in IDENTITY_SCOPES {
            if !allowed.iter().any(|s| s == scope) {
                allowed.push((*scope).to_string());
            }
        }
    }
    allowed
}

/// Narrows `requested` to what `client` may obtain. Trusted clients get the
/// requested set unchanged.
#[must_use]
pub fn narrow_for_client(client: &Client, requested: &[String], user_bound: bool) -> Vec<String> {
    if client.trusted {
        return parse_scopes(&join_scopes(requested));
    }
    intersect(requested, &allowed_scopes(client, user_bound))
}
