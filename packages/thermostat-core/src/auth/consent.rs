//! The interactive half of the authorization-code flow.
//!
//! The user opens the partner connections consent page, approves access and is
//! redirected to `redirect_uri` with a one-time `code` query parameter, which
//! they paste back into the terminal.

use crate::auth::error::AuthError;
use crate::auth::secrets::NestCredentials;
use reqwest::Url;

/// OAuth scope for the Smart Device Management API
pub const SDM_SCOPE: &str = "https://www.googleapis.com/auth/sdm.service";

/// Build the consent page URL for the configured project and client.
pub fn consent_url(base: &str, creds: &NestCredentials) -> Result<String, AuthError> {
    let page = format!("{}/{}/auth", base.trim_end_matches('/'), creds.project_id);
    let url = Url::parse_with_params(
        &page,
        &[
            ("redirect_uri", creds.redirect_uri.as_str()),
            ("access_type", "offline"),
            ("prompt", "consent"),
            ("client_id", creds.client_id.as_str()),
            ("response_type", "code"),
            ("scope", SDM_SCOPE),
        ],
    )
    .map_err(|e| AuthError::InvalidConsentUrl {
        url: page.clone(),
        reason: e.to_string(),
    })?;
    Ok(url.into())
}

/// Pull the authorization code out of whatever the user pasted.
///
/// Accepts the bare code, a `code=...&scope=...` fragment, or the whole
/// redirected URL. Percent-encoded values are decoded.
pub fn extract_authorization_code(input: &str) -> Option<String> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    let query = if input.starts_with("http://") || input.starts_with("https://") {
        Url::parse(input).ok()?.query()?.to_string()
    } else if let Some(pos) = input.find("code=") {
        input[pos..].to_string()
    } else if input.contains('%') {
        format!("code={}", input)
    } else {
        return Some(input.to_string());
    };

    // Reuse the URL parser for form decoding of the query string.
    let parsed = Url::parse(&format!("http://localhost/?{}", query)).ok()?;
    parsed
        .query_pairs()
        .find(|(key, _)| key == "code")
        .map(|(_, value)| value.trim().to_string())
        .filter(|code| !code.is_empty())
}

/// Try to open the consent page in the default browser.
pub fn open_consent_page(url: &str) {
    #[cfg(feature = "browser")]
    {
        if let Err(e) = webbrowser::open(url) {
            tracing::warn!(
                "Failed to open browser automatically: {}. User can use the manual link.",
                e
            );
        }
    }

    #[cfg(not(feature = "browser"))]
    {
        tracing::debug!("Browser support disabled, not opening {}", url);
    }
}
