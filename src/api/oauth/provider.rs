//! OAuth provider endpoints and client credentials, taken from the active
//! configuration snapshot.

use crate::config::Snapshot;
use std::time::Duration;

/// Borrowed view of everything needed to talk to the OAuth provider.
#[derive(Clone, Debug)]
pub struct OAuthProvider<'a> {
    /// OAuth authorization endpoint URL
    pub authorize_url: &'a str,

    /// OAuth token exchange endpoint URL
    pub token_url: &'a str,

    pub scopes: &'a [String],

    pub client_id: &'a str,

    pub client_secret: &'a str,

    /// Upper bound on the token exchange request
    pub timeout: Duration,
}

impl<'a> OAuthProvider<'a> {
    pub fn from_snapshot(snapshot: &'a Snapshot) -> Self {
        let oauth = snapshot.oauth();
        Self {
            authorize_url: &oauth.authorize_url,
            token_url: &oauth.token_url,
            scopes: &oauth.scopes,
            client_id: snapshot.oauth_client_id(),
            client_secret: snapshot.oauth_client_secret(),
            timeout: snapshot.exchange_timeout(),
        }
    }

    /// Build authorization URL with state and redirect_uri
    pub fn build_auth_url(&self, state: &str, redirect_uri: &str) -> String {
        let mut url = format!(
            "{}?client_id={}&response_type=code&state={}&redirect_uri={}",
            self.authorize_url,
            urlencoding::encode(self.client_id),
            urlencoding::encode(state),
            urlencoding::encode(redirect_uri)
        );

        if !self.scopes.is_empty() {
            let scopes = self.scopes.join(" ");
            url.push_str("&scope=");
            url.push_str(&urlencoding::encode(&scopes));
        }

        url
    }
}
