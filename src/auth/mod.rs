use axum::http::HeaderMap;


/// Header the hosting runtime sets to assert the end-user behind a request.
///
/// Header names are case-insensitive; the runtime sends it as `Mattermost-User-ID`.
pub const USER_ID_HEADER: &str = "mattermost-user-id";

/// End-user identity vouched for by the hosting runtime.
///
/// Only the session boundary middleware constructs this, from the
/// [`USER_ID_HEADER`] it strips off the request. Handlers receive it as an
/// extractor and never look at the header themselves.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionIdentity {
    user_id: String,
}

impl SessionIdentity {
    pub(crate) fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }
}

/// Removes the identity header from `headers` and returns the identity it asserted.
///
/// Returns `None` (unauthenticated) when the header is absent, empty,
/// not valid UTF-8, or repeated.
pub(crate) fn take_session_identity(headers: &mut HeaderMap) -> Option<SessionIdentity> {
    let repeated = headers.get_all(USER_ID_HEADER).iter().count() > 1;
    // Removes every value for the name, not only the first
    let value = headers.remove(USER_ID_HEADER)?;

    if repeated {
        return None;
    }

    let user_id = value.to_str().ok()?.trim();
    if user_id.is_empty() {
        return None;
    }

    Some(SessionIdentity::new(user_id))
}
