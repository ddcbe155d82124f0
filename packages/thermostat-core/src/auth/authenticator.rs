//! Access token lifecycle.
//!
//! The [`Authenticator`] decides, on every request for a token, whether the
//! cached access token can be reused, must be refreshed, or whether the user
//! has to go through the interactive consent flow again. Every successful
//! exchange is persisted before the new token is handed out.

use crate::auth::consent::{consent_url, extract_authorization_code};
use crate::auth::credentials::{AccessTokenRecord, CredentialStore};
use crate::auth::error::{AuthError, StoreError};
use crate::auth::exchange::{TokenClient, TokenResponse};
use crate::auth::secrets::{NestCredentials, SecretsFile};
use crate::config::DEFAULT_CONSENT_URL;
use chrono::{DateTime, Utc};

/// Supplies a one-time authorization code obtained from the consent page.
pub trait AuthorizationPrompt {
    /// Show `consent_url` to the user and return what they pasted back.
    fn authorization_code(&self, consent_url: &str) -> std::io::Result<String>;
}

/// Where the token lifecycle currently stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenState {
    /// Nothing cached and no refresh token configured.
    Unauthenticated,
    /// A refresh token is configured but no access token is cached.
    HasRefreshTokenOnly { refresh_token: String },
    HasValidAccessToken(AccessTokenRecord),
    HasExpiredAccessToken(AccessTokenRecord),
}

impl TokenState {
    /// Derive the state from what is on disk and in the configuration.
    pub fn derive(
        record: Option<AccessTokenRecord>,
        configured_refresh_token: Option<&str>,
        now: DateTime<Utc>,
    ) -> Self {
        match record {
            Some(record) if record.is_valid_at(now) => TokenState::HasValidAccessToken(record),
            Some(record) => TokenState::HasExpiredAccessToken(record),
            None => match configured_refresh_token.filter(|t| !t.is_empty()) {
                Some(rt) => TokenState::HasRefreshTokenOnly {
                    refresh_token: rt.to_string(),
                },
                None => TokenState::Unauthenticated,
            },
        }
    }

    /// Short machine-friendly name, used in status output.
    pub fn name(&self) -> &'static str {
        match self {
            TokenState::Unauthenticated => "unauthenticated",
            TokenState::HasRefreshTokenOnly { .. } => "refresh_token_only",
            TokenState::HasValidAccessToken(_) => "valid",
            TokenState::HasExpiredAccessToken(_) => "expired",
        }
    }

    /// The cached record, valid or not.
    pub fn record(&self) -> Option<&AccessTokenRecord> {
        match self {
            TokenState::HasValidAccessToken(r) | TokenState::HasExpiredAccessToken(r) => Some(r),
            _ => None,
        }
    }

    fn refresh_token(&self) -> Option<&str> {
        match self {
            TokenState::Unauthenticated => None,
            TokenState::HasRefreshTokenOnly { refresh_token } => Some(refresh_token),
            TokenState::HasValidAccessToken(r) | TokenState::HasExpiredAccessToken(r) => {
                Some(&r.refresh_token)
            }
        }
    }
}

/// Owns the token lifecycle for a single user and provider.
pub struct Authenticator<P> {
    credentials: NestCredentials,
    consent_base: String,
    store: CredentialStore,
    secrets: SecretsFile,
    exchange: TokenClient,
    prompt: P,
    state: TokenState,
}

impl<P: AuthorizationPrompt> Authenticator<P> {
    /// Inspect the credential store and configuration to find the initial state.
    pub fn new(
        credentials: NestCredentials,
        store: CredentialStore,
        secrets: SecretsFile,
        exchange: TokenClient,
        prompt: P,
    ) -> Self {
        let state = TokenState::derive(
            store.load(),
            credentials.refresh_token.as_deref(),
            Utc::now(),
        );
        tracing::debug!("Initial token state: {}", state.name());

        Self {
            credentials,
            consent_base: DEFAULT_CONSENT_URL.to_string(),
            store,
            secrets,
            exchange,
            prompt,
            state,
        }
    }

    /// Use a different consent page base (self-hosted mocks, tests).
    pub fn with_consent_url(mut self, base: impl Into<String>) -> Self {
        self.consent_base = base.into();
        self
    }

    pub fn state(&self) -> &TokenState {
        &self.state
    }

    pub fn credentials(&self) -> &NestCredentials {
        &self.credentials
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// Return an access token that is valid right now.
    ///
    /// Reuses the cached token when possible, otherwise refreshes it, and
    /// falls back to the interactive flow when no refresh token is known. At
    /// most one exchange is made per call.
    pub async fn ensure_valid_token(&mut self) -> Result<String, AuthError> {
        let now = Utc::now();

        if let TokenState::HasValidAccessToken(record) = &self.state {
            if record.is_valid_at(now) {
                tracing::debug!("Reusing cached access token");
                return Ok(record.access_token.clone());
            }
            tracing::info!("Cached access token has expired");
            self.state = TokenState::HasExpiredAccessToken(record.clone());
        }

        let known_refresh_token = self.state.refresh_token().map(str::to_string);
        match known_refresh_token {
            Some(refresh_token) => self.refresh(refresh_token).await,
            None => self.authorize(None).await,
        }
    }

    /// Run the interactive flow regardless of the current state.
    pub async fn reauthorize(&mut self) -> Result<String, AuthError> {
        let previous = self
            .state
            .refresh_token()
            .map(str::to_string)
            .or_else(|| self.credentials.refresh_token.clone());
        self.authorize(previous).await
    }

    /// Drop the cached access token and, with `forget_refresh_token`, the
    /// stored refresh token as well.
    pub fn logout(&mut self, forget_refresh_token: bool) -> Result<(), StoreError> {
        self.store.delete()?;
        if forget_refresh_token {
            self.secrets.remove_refresh_token()?;
            self.credentials.refresh_token = None;
        }
        self.state = TokenState::derive(None, self.credentials.refresh_token.as_deref(), Utc::now());
        Ok(())
    }

    async fn refresh(&mut self, refresh_token: String) -> Result<String, AuthError> {
        self.credentials.require_client()?;
        tracing::info!("Refreshing access token");

        let result = self
            .exchange
            .exchange_refresh(
                &self.credentials.client_id,
                &self.credentials.client_secret,
                &refresh_token,
            )
            .await;

        match result {
            Ok(resp) => self.commit(resp, Some(refresh_token)),
            Err(e @ AuthError::RequestFailed { .. }) => {
                // The refresh token is no good; only a new consent can recover.
                tracing::warn!("Refresh token rejected, interactive authorization required");
                self.state = TokenState::Unauthenticated;
                if self.credentials.refresh_token.as_deref() == Some(refresh_token.as_str()) {
                    self.credentials.refresh_token = None;
                }
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    async fn authorize(&mut self, previous: Option<String>) -> Result<String, AuthError> {
        self.credentials.require_authorization()?;
        let url = consent_url(&self.consent_base, &self.credentials)?;

        tracing::info!("Starting interactive authorization");
        let input = self
            .prompt
            .authorization_code(&url)
            .map_err(AuthError::Prompt)?;
        let code = extract_authorization_code(&input).ok_or(AuthError::EmptyAuthorizationCode)?;

        let resp = self
            .exchange
            .exchange_authorization_code(
                &self.credentials.client_id,
                &self.credentials.client_secret,
                &self.credentials.redirect_uri,
                &code,
            )
            .await?;
        self.commit(resp, previous)
    }

    /// Persist a successful exchange and make it the current state.
    fn commit(
        &mut self,
        resp: TokenResponse,
        previous_refresh_token: Option<String>,
    ) -> Result<String, AuthError> {
        let refresh_token = resp
            .refresh_token
            .or(previous_refresh_token)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingRefreshToken)?;

        let record = AccessTokenRecord {
            access_token: resp.access_token,
            refresh_token,
            obtained_at: Utc::now(),
            expires_in: resp.expires_in,
        };
        self.store.save(&record)?;
        self.remember_refresh_token(&record.refresh_token);

        tracing::info!("Access token obtained, valid for {}s", record.expires_in);
        let token = record.access_token.clone();
        self.state = TokenState::HasValidAccessToken(record);
        Ok(token)
    }

    /// Keep `secrets.toml` in step with the refresh token in use.
    fn remember_refresh_token(&mut self, refresh_token: &str) {
        if self.credentials.refresh_token.as_deref() == Some(refresh_token) {
            return;
        }
        match self.secrets.upsert_refresh_token(refresh_token) {
            Ok(()) => self.credentials.refresh_token = Some(refresh_token.to_string()),
            // The token record already carries it, so the client stays renewable.
            Err(e) => tracing::warn!("Failed to store refresh token in secrets file: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn record(obtained_at: DateTime<Utc>) -> AccessTokenRecord {
        AccessTokenRecord {
            access_token: "tok".to_string(),
            refresh_token: "rt".to_string(),
            obtained_at,
            expires_in: 3600,
        }
    }

    #[test]
    fn test_derive_unauthenticated() {
        assert_eq!(
            TokenState::derive(None, None, Utc::now()),
            TokenState::Unauthenticated
        );
        assert_eq!(
            TokenState::derive(None, Some(""), Utc::now()),
            TokenState::Unauthenticated
        );
    }

    #[test]
    fn test_derive_refresh_token_only() {
        assert_eq!(
            TokenState::derive(None, Some("rt"), Utc::now()),
            TokenState::HasRefreshTokenOnly {
                refresh_token: "rt".to_string()
            }
        );
    }

    #[test]
    fn test_derive_from_record_uses_skew_boundary() {
        let now = Utc::now();
        let fresh = record(now - TimeDelta::seconds(3600 - 11));
        let stale = record(now - TimeDelta::seconds(3600 - 9));

        assert_eq!(
            TokenState::derive(Some(fresh.clone()), None, now),
            TokenState::HasValidAccessToken(fresh)
        );
        assert_eq!(
            TokenState::derive(Some(stale.clone()), Some("other"), now),
            TokenState::HasExpiredAccessToken(stale)
        );
    }

    #[test]
    fn test_record_refresh_token_wins_over_configured() {
        let state = TokenState::derive(Some(record(Utc::now())), Some("configured"), Utc::now());
        assert_eq!(state.refresh_token(), Some("rt"));
        assert_eq!(state.name(), "valid");
    }
}
