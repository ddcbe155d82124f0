//! HTTP boundary to the OAuth2 token endpoint.
//!
//! Each call issues exactly one POST and classifies the answer; retrying is
//! left to the caller so single-use authorization codes are never replayed.

use crate::auth::error::AuthError;
use serde::Deserialize;
use std::time::Duration;

/// Tokens issued by a successful exchange.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenResponse {
    pub access_token: String,
    /// Absent when the provider keeps the current refresh token valid.
    pub refresh_token: Option<String>,
    pub expires_in: u64,
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Wire shape of a 200 answer; validated into [`TokenResponse`].
#[derive(Deserialize)]
struct RawTokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

#[derive(Debug, Clone, Copy)]
enum Grant {
    RefreshToken,
    AuthorizationCode,
}

impl Grant {
    fn as_str(self) -> &'static str {
        match self {
            Grant::RefreshToken => "refresh_token",
            Grant::AuthorizationCode => "authorization_code",
        }
    }
}

/// Client for the token endpoint.
#[derive(Debug, Clone)]
pub struct TokenClient {
    http: reqwest::Client,
    token_url: String,
}

impl TokenClient {
    /// Build a client with an explicit per-request timeout.
    pub fn new(token_url: impl Into<String>, timeout: Duration) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(AuthError::Transport)?;
        Ok(Self {
            http,
            token_url: token_url.into(),
        })
    }

    pub fn token_url(&self) -> &str {
        &self.token_url
    }

    /// Exchange a refresh token for a fresh access token.
    pub async fn exchange_refresh(
        &self,
        client_id: &str,
        client_secret: &str,
        refresh_token: &str,
    ) -> Result<TokenResponse, AuthError> {
        self.post_grant(
            Grant::RefreshToken,
            &[
                ("client_id", client_id),
                ("client_secret", client_secret),
                ("refresh_token", refresh_token),
            ],
        )
        .await
    }

    /// Redeem a one-time authorization code.
    pub async fn exchange_authorization_code(
        &self,
        client_id: &str,
        client_secret: &str,
        redirect_uri: &str,
        code: &str,
    ) -> Result<TokenResponse, AuthError> {
        self.post_grant(
            Grant::AuthorizationCode,
            &[
                ("client_id", client_id),
                ("client_secret", client_secret),
                ("code", code),
                ("redirect_uri", redirect_uri),
            ],
        )
        .await
    }

    async fn post_grant(
        &self,
        grant: Grant,
        params: &[(&str, &str)],
    ) -> Result<TokenResponse, AuthError> {
        let mut form: Vec<(&str, &str)> = params.to_vec();
        form.push(("grant_type", grant.as_str()));

        tracing::debug!("Requesting {} grant from {}", grant.as_str(), self.token_url);

        let resp = self
            .http
            .post(&self.token_url)
            .form(&form)
            .send()
            .await
            .map_err(AuthError::Transport)?;

        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(AuthError::Transport)?;

        let result = classify(status, &body);
        match &result {
            Ok(_) => tracing::debug!("{} grant succeeded", grant.as_str()),
            Err(e) => tracing::warn!("{} grant failed: {}", grant.as_str(), e),
        }
        result
    }
}

/// Turn a token endpoint answer into tokens or an error.
fn classify(status: u16, body: &str) -> Result<TokenResponse, AuthError> {
    if status != 200 {
        return Err(AuthError::RequestFailed {
            status,
            body: body.to_string(),
        });
    }

    let raw: RawTokenResponse = serde_json::from_str(body)
        .map_err(|e| AuthError::MalformedResponse(format!("invalid JSON body: {}", e)))?;

    let access_token = raw
        .access_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AuthError::MalformedResponse("missing access_token".to_string()))?;
    let expires_in = match raw.expires_in {
        Some(secs) => u64::try_from(secs).map_err(|_| {
            AuthError::MalformedResponse(format!("negative expires_in: {}", secs))
        })?,
        None => return Err(AuthError::MalformedResponse("missing expires_in".to_string())),
    };

    Ok(TokenResponse {
        access_token,
        refresh_token: raw.refresh_token.filter(|t| !t.is_empty()),
        expires_in,
    })
}
