//! Token endpoint calls
//!
//! Two grants, both form-encoded POSTs to `ClientConfig::token_endpoint`:
//! 1. `authorization_code` to finish the interactive flow
//! 2. `refresh_token` when a cached access token has expired

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::{Error, Result};

/// Response from the token endpoint for both exchange and refresh.
///
/// `expires_in` is a delta in seconds; `Credential::from_token_response`
/// turns it into an absolute timestamp.
#[derive(Debug, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// Exchange an authorization code for tokens.
///
/// `verifier` is the PKCE code verifier when the authorization URL carried a
/// challenge.
pub async fn exchange_code(
    http: &reqwest::Client,
    client: &ClientConfig,
    code: &str,
    verifier: Option<&str>,
) -> Result<TokenResponse> {
    let mut form = vec![
        ("grant_type", "authorization_code"),
        ("code", code),
        ("client_id", client.client_id.as_str()),
        ("redirect_uri", client.redirect_uri.as_str()),
    ];
    // Public clients (PKCE only) have no secret to send
    if !client.client_secret.is_blank() {
        form.push(("client_secret", client.client_secret.expose().as_str()));
    }
    if let Some(verifier) = verifier {
        form.push(("code_verifier", verifier));
    }

    debug!(endpoint = %client.token_endpoint, "exchanging authorization code");

    let response = http
        .post(&client.token_endpoint)
        .form(&form)
        .send()
        .await
        .map_err(|e| Error::Http(format!("token exchange request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        return Err(Error::TokenExchange(format!(
            "token endpoint returned {status}: {body}"
        )));
    }

    parse_token_response(response, "invalid token response").await
}

/// Obtain a new access token with a refresh token.
pub async fn refresh_token(
    http: &reqwest::Client,
    client: &ClientConfig,
    refresh: &str,
) -> Result<TokenResponse> {
    debug!(endpoint = %client.token_endpoint, "refreshing access token");

    let mut form = vec![
        ("grant_type", "refresh_token"),
        ("refresh_token", refresh),
        ("client_id", client.client_id.as_str()),
    ];
    if !client.client_secret.is_blank() {
        form.push(("client_secret", client.client_secret.expose().as_str()));
    }

    let response = http
        .post(&client.token_endpoint)
        .form(&form)
        .send()
        .await
        .map_err(|e| Error::Http(format!("token refresh request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));

        // Google answers a revoked refresh token with 400 invalid_grant
        if status.as_u16() == 401 || status.as_u16() == 403 || body.contains("invalid_grant") {
            return Err(Error::InvalidCredentials(format!(
                "refresh token rejected ({status}): {body}"
            )));
        }

        return Err(Error::TokenExchange(format!(
            "token refresh returned {status}: {body}"
        )));
    }

    parse_token_response(response, "invalid refresh response").await
}

async fn parse_token_response(response: reqwest::Response, context: &str) -> Result<TokenResponse> {
    let token = response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::TokenExchange(format!("{context}: {e}")))?;
    if token.access_token.trim().is_empty() {
        return Err(Error::TokenExchange(format!(
            "{context}: empty access_token"
        )));
    }
    Ok(token)
}
