use std::sync::Arc;

use axum::extract::{FromRef, FromRequestParts, OptionalFromRequestParts};
use axum::http::request::Parts;
use axum_extra::extract::PrivateCookieJar;
use axum_extra::extract::cookie::Key;

use super::config::SessionAuthConfig;
use super::cookies;
use super::error::AuthError;
use crate::clock::Clock;
use crate::state::TokenState;
use crate::types::{AccessToken, UserId};

/// Everything needed to read the session cookie outside the auth routes.
///
/// Obtain one with [`SessionAuthConfig::session_reader`] and make it
/// extractable from your router state via `FromRef`.
#[derive(Clone)]
pub struct SessionReader {
    key: Key,
    cookie_name: String,
    clock: Arc<dyn Clock>,
}

impl<U> SessionAuthConfig<U> {
    #[must_use]
    pub fn session_reader(&self) -> SessionReader {
        SessionReader {
            key: self.settings.cookie_key.clone(),
            cookie_name: self.settings.session_cookie_name.clone(),
            clock: self.settings.clock.clone(),
        }
    }
}

impl SessionReader {
    /// Read the session from request headers without refreshing it.
    fn read(&self, parts: &Parts) -> Result<AuthSession, AuthError> {
        let jar = PrivateCookieJar::from_headers(&parts.headers, self.key.clone());
        match cookies::read_session(&jar, &self.cookie_name) {
            TokenState::Authenticated {
                access_token,
                user_id,
                access_token_expires_at,
                ..
            } if self.clock.now() < access_token_expires_at => Ok(AuthSession {
                user_id,
                access_token,
            }),
            TokenState::Authenticated { .. } | TokenState::Errored { .. } => {
                Err(AuthError::SessionExpired)
            }
            TokenState::Anonymous | TokenState::OtpChallenge { .. } => {
                Err(AuthError::Unauthenticated)
            }
        }
    }
}

/// Authenticated session extracted from the session cookie.
///
/// Returns `401 Unauthorized` unless the cookie holds a non-expired access
/// token. This extractor never refreshes; clients call the session route
/// for that.
///
/// ```rust,ignore
/// async fn wallet(session: AuthSession) -> impl IntoResponse {
///     format!("wallet of {}", session.user_id)
/// }
///
/// async fn tours(session: Option<AuthSession>) -> impl IntoResponse {
///     match session {
///         Some(s) => format!("tours for {}", s.user_id),
///         None => "public tours".to_string(),
///     }
/// }
/// ```
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub user_id: UserId,
    /// Bearer credential for upstream API calls on behalf of the user.
    pub access_token: AccessToken,
}

impl<S> FromRequestParts<S> for AuthSession
where
    S: Send + Sync,
    SessionReader: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        SessionReader::from_ref(state).read(parts)
    }
}

impl<S> OptionalFromRequestParts<S> for AuthSession
where
    S: Send + Sync,
    SessionReader: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> Result<Option<Self>, Self::Rejection> {
        match SessionReader::from_ref(state).read(parts) {
            Ok(session) => Ok(Some(session)),
            Err(AuthError::Unauthenticated | AuthError::SessionExpired) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
