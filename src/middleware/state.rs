use std::sync::Arc;

use axum::extract::FromRef;
use axum_extra::extract::cookie::Key;

use super::config::AuthSettings;
use crate::orchestrator::Orchestrator;
use crate::providers::Providers;
use crate::rotation::PendingRotations;
use crate::upstream::AuthUpstream;

/// Shared state for auth route handlers.
pub(super) struct AuthState<U> {
    pub(super) providers: Providers<U>,
    pub(super) orchestrator: Orchestrator<U>,
    pub(super) pending: Arc<PendingRotations>,
    pub(super) settings: AuthSettings,
}

// Manual Clone: avoid derive adding a `U: Clone` bound.
impl<U> Clone for AuthState<U> {
    fn clone(&self) -> Self {
        Self {
            providers: self.providers.clone(),
            orchestrator: self.orchestrator.clone(),
            pending: self.pending.clone(),
            settings: self.settings.clone(),
        }
    }
}

// PrivateCookieJar requires Key to be extractable from state
impl<U: AuthUpstream> FromRef<AuthState<U>> for Key {
    fn from_ref(state: &AuthState<U>) -> Self {
        state.settings.cookie_key.clone()
    }
}
