//! OAuth token exchange logic.
//!
//! Handles exchanging authorization codes for access tokens.

use super::flow::OAuthError;
use super::provider::OAuthProvider;
use crate::credentials::TokenRecord;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

/// OAuth token response (standard OAuth 2.0, plus Bitbucket's `scopes`)
#[derive(Deserialize, Debug)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    scopes: Option<String>,
}

/// Exchange authorization code for access token
///
/// Sends exactly one request. The code is single-use, so nothing here retries.
///
/// # Returns
/// * `Ok(TokenRecord)` - Record owned by `user_id`
/// * `Err(OAuthError::Timeout)` - No answer within `provider.timeout`
/// * `Err(OAuthError::Provider)` - Non-2xx answer from the token endpoint
/// * `Err(OAuthError::Network | InvalidResponse)` - Transport or parse failure
pub async fn exchange_code_for_token(
    client: &reqwest::Client,
    provider: &OAuthProvider<'_>,
    code: &str,
    redirect_uri: &str,
    user_id: &str,
) -> Result<TokenRecord, OAuthError> {
    let form_data = [
        ("grant_type", "authorization_code"),
        ("code", code),
        ("redirect_uri", redirect_uri),
        ("client_id", provider.client_id),
        ("client_secret", provider.client_secret),
    ];

    tracing::debug!("Exchanging authorization code for token at {}", provider.token_url);

    let response = client
        .post(provider.token_url)
        .header("Accept", "application/json")
        .timeout(provider.timeout)
        .form(&form_data)
        .send()
        .await
        .map_err(|e| classify(e, provider))?;

    // Check response status
    if !response.status().is_success() {
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(OAuthError::Provider { status, body });
    }

    let body = response.bytes().await.map_err(|e| classify(e, provider))?;
    let token_response: TokenResponse = serde_json::from_slice(&body)
        .map_err(|e| OAuthError::InvalidResponse(e.to_string()))?;

    if token_response.access_token.is_empty() {
        return Err(OAuthError::InvalidResponse(
            "token response has an empty access_token".to_string(),
        ));
    }

    tracing::debug!(
        "Token exchange successful, has_refresh_token={}, expires_in={:?}",
        token_response.refresh_token.is_some(),
        token_response.expires_in
    );

    let now = Utc::now();
    let expires_at = match token_response.expires_in {
        Some(seconds) => Some(expiry_from(now, seconds)?),
        None => None,
    };

    Ok(TokenRecord {
        user_id: user_id.to_string(),
        access_token: token_response.access_token,
        token_type: token_response
            .token_type
            .unwrap_or_else(|| "bearer".to_string()),
        refresh_token: token_response.refresh_token,
        scopes: token_response.scopes,
        expires_at,
        connected_at: now,
    })
}

/// Absolute expiry for a relative `expires_in`. Rejects negative values and
/// values that overflow the timestamp range.
fn expiry_from(now: DateTime<Utc>, seconds: i64) -> Result<DateTime<Utc>, OAuthError> {
    if seconds < 0 {
        return Err(OAuthError::InvalidResponse(format!(
            "negative expires_in: {}",
            seconds
        )));
    }

    Duration::try_seconds(seconds)
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .ok_or_else(|| OAuthError::InvalidResponse(format!("expires_in out of range: {}", seconds)))
}

fn classify(error: reqwest::Error, provider: &OAuthProvider<'_>) -> OAuthError {
    if error.is_timeout() {
        OAuthError::Timeout(provider.timeout)
    } else {
        OAuthError::Network(error)
    }
}
