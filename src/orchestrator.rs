use std::sync::Arc;

use time::Duration;

use crate::clock::Clock;
use crate::providers::Identity;
use crate::state::{REFRESH_TOKEN_MAX_AGE, TokenState};
use crate::store::RefreshTokenStore;
use crate::types::DeviceInfo;
use crate::upstream::{AuthUpstream, RefreshTokenRequest};

/// Upper bound on how long a session read may wait for the upstream refresh.
pub const REFRESH_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(3);

/// Decides on every session read whether the access token must be rotated.
pub struct Orchestrator<U> {
    upstream: Arc<U>,
    clock: Arc<dyn Clock>,
    timeout: std::time::Duration,
    refresh_max_age: Duration,
}

// Manual Clone: avoid derive adding a `U: Clone` bound.
impl<U> Clone for Orchestrator<U> {
    fn clone(&self) -> Self {
        Self {
            upstream: self.upstream.clone(),
            clock: self.clock.clone(),
            timeout: self.timeout,
            refresh_max_age: self.refresh_max_age,
        }
    }
}

impl<U: AuthUpstream> Orchestrator<U> {
    #[must_use]
    pub fn new(upstream: Arc<U>, clock: Arc<dyn Clock>) -> Self {
        Self {
            upstream,
            clock,
            timeout: REFRESH_TIMEOUT,
            refresh_max_age: REFRESH_TOKEN_MAX_AGE,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_refresh_max_age(mut self, max_age: Duration) -> Self {
        self.refresh_max_age = max_age;
        self
    }

    /// Produce the token state for this read.
    ///
    /// `event` is the identity a provider produced on this request, if any;
    /// it replaces `state` and no refresh runs on the same pass. Otherwise:
    ///
    /// - `Errored` and `OtpChallenge` are returned unchanged.
    /// - `Anonymous` stays anonymous unless `store` holds a refresh token.
    /// - `Authenticated` is returned unchanged until its access token expires.
    ///
    /// Any failed rotation yields `Errored`, which sticks until a provider
    /// produces a new identity.
    pub async fn resolve<S: RefreshTokenStore>(
        &self,
        state: TokenState,
        event: Option<Identity>,
        store: &S,
        device: &DeviceInfo,
    ) -> TokenState {
        if let Some(identity) = event {
            return identity.into_token_state(self.clock.now());
        }

        match state {
            TokenState::Errored { .. } | TokenState::OtpChallenge { .. } => state,
            TokenState::Anonymous => {
                if store.get().is_none() {
                    return state;
                }
                self.rotate(state, store, device).await
            }
            TokenState::Authenticated { .. } if state.is_valid_at(self.clock.now()) => state,
            TokenState::Authenticated { .. } => self.rotate(state, store, device).await,
        }
    }

    async fn rotate<S: RefreshTokenStore>(
        &self,
        state: TokenState,
        store: &S,
        device: &DeviceInfo,
    ) -> TokenState {
        let Some(current) = store.get() else {
            tracing::warn!(user_id = ?state.user_id(), "Access token expired and no refresh token cookie");
            return state.into_refresh_error();
        };

        let request = RefreshTokenRequest::new(current, device);
        let call = self.upstream.refresh_token(&request);
        let tokens = match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(tokens)) => tokens,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, user_id = ?state.user_id(), "Access token refresh failed");
                return state.into_refresh_error();
            }
            Err(_) => {
                tracing::warn!(timeout = ?self.timeout, user_id = ?state.user_id(), "Access token refresh timed out");
                return state.into_refresh_error();
            }
        };

        // The upstream has already burned the old refresh token; without the
        // new one stored the session cannot rotate again.
        if let Err(e) = store.set(&tokens.refresh_token, self.refresh_max_age) {
            tracing::error!(error = %e, user_id = %tokens.user_id, "Rotated refresh token not stored, discarding tokens");
            return state.into_refresh_error();
        }

        tracing::info!(user_id = %tokens.user_id, "Access token refreshed");

        TokenState::authenticated(
            tokens.user_id,
            tokens.access_token,
            tokens.refresh_token,
            self.clock.now(),
        )
    }
}
