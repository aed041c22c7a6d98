//! Shared fixtures for integration tests.

#![allow(dead_code)]

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use jsonwebtoken::{Algorithm, Header, encode};
use octofhir_idp::config::{IdpConfig, VaultConfig};
use octofhir_idp::{IdpContext, MemoryStorage, SigningKey, StorageFacade, Stores};

pub const ISSUER: &str = "https://idp.example.com";
pub const PARTNER: &str = "https://partner.example.com";
pub const REDIRECT: &str = "https://app.example.com/callback";

/// Configuration with the fixture signing key and cheap Argon2 settings.
pub fn config() -> IdpConfig {
    let mut config = IdpConfig {
        issuer: ISSUER.to_string(),
        vault: VaultConfig {
            memory_kib: 8,
            iterations: 1,
            parallelism: 1,
            secret_bytes: 32,
        },
        ..Default::default()
    };
    config.signing.private_key = Some(include_str!("../fixtures/signing_key.pem").to_string());
    config
}

pub async fn facade_with(config: IdpConfig) -> StorageFacade {
    octofhir_idp::observability::init_tracing_with_level("warn");
    let context = IdpContext::bootstrap(config, Stores::from_backend(MemoryStorage::new()))
        .await
        .expect("context");
    StorageFacade::new(context)
}

pub async fn facade() -> StorageFacade {
    facade_with(config()).await
}

pub fn basic_auth(client_id: &str, secret: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{client_id}:{secret}")))
}

pub fn partner_key() -> SigningKey {
    SigningKey::from_pem(
        include_str!("../fixtures/partner_key.pem"),
        Some("partner-1".to_string()),
    )
    .expect("partner key")
}

/// Signs an assertion from [`PARTNER`] for `subject` with `scope`.
pub fn assertion(key: &SigningKey, subject: &str, scope: &str) -> String {
    let now = time::OffsetDateTime::now_utc().unix_timestamp();
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(key.kid.clone());
    let claims = serde_json::json!({
        "iss": PARTNER,
        "sub": subject,
        "aud": ISSUER,
        "iat": now,
        "exp": now + 120,
        "scope": scope,
    });
    encode(&header, &claims, key.encoding_key()).expect("sign assertion")
}
