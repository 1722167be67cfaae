use std::sync::Mutex;

use axum_extra::extract::PrivateCookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use time::Duration;

use super::config::AuthSettings;
use crate::error::StoreError;
use crate::state::TokenState;
use crate::store::RefreshTokenStore;
use crate::types::RefreshToken;

/// Create the refresh token cookie.
pub(super) fn refresh_cookie(
    name: &str,
    token: &RefreshToken,
    max_age: Duration,
    secure: bool,
) -> Cookie<'static> {
    Cookie::build((name.to_string(), token.as_str().to_string()))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Strict)
        .path("/".to_string())
        .max_age(max_age)
        .build()
}

/// Create removal cookie for the refresh token.
pub(super) fn clear_refresh_cookie(name: &str) -> Cookie<'static> {
    Cookie::build((name.to_string(), ""))
        .path("/".to_string())
        .max_age(Duration::ZERO)
        .build()
}

/// Create the session cookie carrying the serialized token state.
pub(super) fn session_cookie(
    name: &str,
    state: &TokenState,
    ttl: Duration,
    secure: bool,
) -> Result<Cookie<'static>, serde_json::Error> {
    let value = serde_json::to_string(state)?;
    Ok(Cookie::build((name.to_string(), value))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/".to_string())
        .max_age(ttl)
        .build())
}

/// Create removal cookie for the session.
pub(super) fn clear_session_cookie(name: &str) -> Cookie<'static> {
    Cookie::build((name.to_string(), ""))
        .path("/".to_string())
        .max_age(Duration::ZERO)
        .build()
}

/// Decode the token state from the session cookie. Missing, tampered or
/// unreadable cookies read as `Anonymous`.
pub(super) fn read_session(jar: &PrivateCookieJar, name: &str) -> TokenState {
    let Some(cookie) = jar.get(name) else {
        return TokenState::Anonymous;
    };
    serde_json::from_str(cookie.value()).unwrap_or_else(|e| {
        tracing::debug!(error = %e, "Unreadable session cookie, treating as anonymous");
        TokenState::Anonymous
    })
}

/// Write `state` to the session cookie (sliding expiry), or clear it when anonymous.
pub(super) fn write_session(
    jar: PrivateCookieJar,
    state: &TokenState,
    settings: &AuthSettings,
) -> Result<PrivateCookieJar, serde_json::Error> {
    if matches!(state, TokenState::Anonymous) {
        if jar.get(&settings.session_cookie_name).is_none() {
            return Ok(jar);
        }
        return Ok(jar.remove(clear_session_cookie(&settings.session_cookie_name)));
    }
    let cookie = session_cookie(
        &settings.session_cookie_name,
        state,
        settings.session_ttl,
        settings.secure_cookies,
    )?;
    Ok(jar.add(cookie))
}

#[derive(Debug)]
enum CookieChange {
    Set(Cookie<'static>),
    Remove(Cookie<'static>),
}

/// Request-scoped [`RefreshTokenStore`] over the refresh token cookie.
///
/// Reads come from the incoming cookie. Writes are recorded and applied to
/// the response jar by the route handler via [`apply`](Self::apply), so the
/// `Set-Cookie` is emitted in exactly one place.
#[derive(Debug)]
pub(super) struct CookieRefreshStore {
    name: String,
    secure: bool,
    current: Mutex<Option<RefreshToken>>,
    change: Mutex<Option<CookieChange>>,
}

impl CookieRefreshStore {
    pub(super) fn from_jar(jar: &PrivateCookieJar, settings: &AuthSettings) -> Self {
        let current = jar
            .get(&settings.refresh_cookie_name)
            .map(|c| c.value().to_string())
            .filter(|v| !v.is_empty())
            .map(RefreshToken::from);
        Self {
            name: settings.refresh_cookie_name.clone(),
            secure: settings.secure_cookies,
            current: Mutex::new(current),
            change: Mutex::new(None),
        }
    }

    /// True if a write or removal is waiting to be applied.
    pub(super) fn has_pending_change(&self) -> bool {
        self.change
            .lock()
            .map(|change| change.is_some())
            .unwrap_or(false)
    }

    /// Apply the recorded change, if any, to the response jar.
    pub(super) fn apply(&self, jar: PrivateCookieJar) -> PrivateCookieJar {
        let change = self.change.lock().ok().and_then(|mut change| change.take());
        match change {
            Some(CookieChange::Set(cookie)) => jar.add(cookie),
            Some(CookieChange::Remove(cookie)) => jar.remove(cookie),
            None => jar,
        }
    }
}

impl RefreshTokenStore for CookieRefreshStore {
    fn get(&self) -> Option<RefreshToken> {
        self.current.lock().ok().and_then(|current| current.clone())
    }

    fn set(&self, token: &RefreshToken, max_age: Duration) -> Result<(), StoreError> {
        // The private jar seals the value, so any non-empty token fits.
        if token.as_str().is_empty() {
            return Err(StoreError::InvalidValue);
        }
        let cookie = refresh_cookie(&self.name, token, max_age, self.secure);

        let mut current = self
            .current
            .lock()
            .map_err(|_| StoreError::Unavailable("refresh cookie state poisoned".into()))?;
        let mut change = self
            .change
            .lock()
            .map_err(|_| StoreError::Unavailable("refresh cookie state poisoned".into()))?;
        *current = Some(token.clone());
        *change = Some(CookieChange::Set(cookie));
        Ok(())
    }

    fn remove(&self) {
        if let (Ok(mut current), Ok(mut change)) = (self.current.lock(), self.change.lock()) {
            *current = None;
            *change = Some(CookieChange::Remove(clear_refresh_cookie(&self.name)));
        }
    }
}
