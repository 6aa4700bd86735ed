//! Route table: every endpoint with its path, method, and authentication mode.
//!
//! The router is built only from [`Endpoint`]. Adding a variant without an
//! authentication mode does not compile, and a request for a path outside the
//! table never reaches a handler.

use axum::http::Method;
use std::collections::HashSet;
use strum::{EnumIter, IntoEnumIterator};

/// How a request must prove itself before reaching its handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthMode {
    /// The hosting runtime must vouch for an end-user
    SessionRequired,
    /// The body must carry a valid webhook signature or secret
    WebhookSecretRequired,
    /// No identity check
    Public,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, strum::Display)]
pub enum Endpoint {
    Health,
    OAuthConnect,
    OAuthComplete,
    Connected,
    Todo,
    Reviews,
    Token,
    Disconnect,
    Webhook,
}

/// One row of the route table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteSpec {
    pub method: Method,
    pub path: &'static str,
    pub auth: AuthMode,
}

impl Endpoint {
    pub fn spec(self) -> RouteSpec {
        use AuthMode::*;

        let (method, path, auth) = match self {
            Endpoint::Health => (Method::GET, "/healthz", Public),
            Endpoint::OAuthConnect => (Method::GET, "/oauth/connect", SessionRequired),
            Endpoint::OAuthComplete => (Method::GET, "/oauth/complete", SessionRequired),
            Endpoint::Connected => (Method::GET, "/api/v1/connected", SessionRequired),
            Endpoint::Todo => (Method::POST, "/api/v1/todo", SessionRequired),
            Endpoint::Reviews => (Method::GET, "/api/v1/reviews", SessionRequired),
            Endpoint::Token => (Method::GET, "/api/v1/token", SessionRequired),
            Endpoint::Disconnect => (Method::POST, "/api/v1/disconnect", SessionRequired),
            Endpoint::Webhook => (Method::POST, "/webhook", WebhookSecretRequired),
        };

        RouteSpec { method, path, auth }
    }

    pub fn path(self) -> &'static str {
        self.spec().path
    }

    pub fn auth_mode(self) -> AuthMode {
        self.spec().auth
    }

    /// Endpoint serving `method` on `path`, if any.
    pub fn lookup(method: &Method, path: &str) -> Option<Endpoint> {
        Endpoint::iter().find(|endpoint| {
            let spec = endpoint.spec();
            spec.path == path && spec.method == *method
        })
    }

    /// Checks the table before the router is built: paths are absolute and
    /// each path belongs to exactly one endpoint.
    pub fn validate_table() -> Result<(), RouteTableError> {
        let mut seen = HashSet::new();
        for endpoint in Endpoint::iter() {
            let path = endpoint.path();
            if !path.starts_with('/') {
                return Err(RouteTableError::RelativePath(endpoint));
            }
            if !seen.insert(path) {
                return Err(RouteTableError::DuplicatePath(path));
            }
        }
        Ok(())
    }
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum RouteTableError {
    #[error("route for {0} is not an absolute path")]
    RelativePath(Endpoint),
    #[error("path '{0}' is mapped more than once")]
    DuplicatePath(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_is_valid() {
        assert_eq!(Endpoint::validate_table(), Ok(()));
    }

    #[test]
    fn test_api_routes_require_session() {
        for (method, path) in [
            (Method::POST, "/api/v1/todo"),
            (Method::GET, "/api/v1/reviews"),
            (Method::GET, "/api/v1/token"),
            (Method::GET, "/api/v1/connected"),
            (Method::POST, "/api/v1/disconnect"),
            (Method::GET, "/oauth/connect"),
            (Method::GET, "/oauth/complete"),
        ] {
            let endpoint = Endpoint::lookup(&method, path).expect("mapped route");
            assert_eq!(endpoint.auth_mode(), AuthMode::SessionRequired, "{}", path);
        }
    }

    #[test]
    fn test_webhook_requires_secret() {
        assert_eq!(
            Endpoint::lookup(&Method::POST, "/webhook").map(Endpoint::auth_mode),
            Some(AuthMode::WebhookSecretRequired)
        );
    }

    #[test]
    fn test_only_health_is_public() {
        let public: Vec<_> = Endpoint::iter()
            .filter(|endpoint| endpoint.auth_mode() == AuthMode::Public)
            .collect();
        assert_eq!(public, vec![Endpoint::Health]);
    }

    #[test]
    fn test_unmapped_requests_have_no_endpoint() {
        assert_eq!(Endpoint::lookup(&Method::GET, "/api/v1/unknown"), None);
        assert_eq!(Endpoint::lookup(&Method::GET, "/api/v1/todo"), None);
        assert_eq!(Endpoint::lookup(&Method::POST, "/api/v1/todo/"), None);
    }
}
