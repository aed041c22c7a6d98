//! Domain types persisted by the storage layer.

pub mod auth_request;
pub mod client;
pub mod secret;
pub mod token;
pub mod user;

pub use auth_request::{AuthRequest, AuthRequestState, NewAuthRequest};
pub use client::{Client, ClientOptions, ClientPatch, ClientValidationError};
pub use secret::{CreatedSecret, Secret, SecretSummary};
pub use token::{Claims, IssuedToken, Token, TokenKind};
pub use user::User;
