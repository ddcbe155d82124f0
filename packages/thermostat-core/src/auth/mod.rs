//! Authentication module for the Nest thermostat client.
//!
//! Provides the OAuth 2.0 authorization-code / refresh-token lifecycle and the
//! on-disk files it depends on.

mod authenticator;
mod consent;
mod credentials;
mod error;
mod exchange;
mod secrets;

pub use authenticator::{AuthorizationPrompt, Authenticator, TokenState};
pub use consent::{consent_url, extract_authorization_code, open_consent_page, SDM_SCOPE};
pub use credentials::{AccessTokenRecord, CredentialStore, EXPIRY_SKEW_SECS};
pub use error::{AuthError, StoreError};
pub use exchange::{TokenClient, TokenResponse};
pub use secrets::{NestCredentials, SecretsFile};
