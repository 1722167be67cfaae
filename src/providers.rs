//! Credential providers: the three entry points that establish or rotate
//! session tokens.
//!
//! | Provider   | From state            | To state        | Store write failure |
//! |------------|-----------------------|-----------------|---------------------|
//! | send-otp   | any                   | `OtpChallenge`  | n/a                 |
//! | verify-otp | `OtpChallenge`        | `Authenticated` | fatal               |
//! | refresh    | any, cookie present   | `Authenticated` | tolerated (buffered)|
//!
//! Verify has no fallback delivery path: tokens are returned only once the
//! store holds the new refresh token. Refresh parks the new token in
//! [`PendingRotations`] before writing, so the response layer can still set it.

use std::sync::Arc;

use time::{Duration, OffsetDateTime};

use crate::error::{Error, StoreError};
use crate::orchestrator::REFRESH_TIMEOUT;
use crate::rotation::{PendingRotations, RotationKey};
use crate::state::{REFRESH_TOKEN_MAX_AGE, TokenState};
use crate::store::RefreshTokenStore;
use crate::types::{AccessToken, ChallengeId, DeviceInfo, NationalCode, RefreshToken, UserId};
use crate::upstream::{AuthUpstream, RefreshTokenRequest, SendOtpRequest, VerifyOtpRequest};

/// Fixed OTP request parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtpSettings {
    pub purpose: String,
    pub scope: String,
}

impl Default for OtpSettings {
    fn default() -> Self {
        Self {
            purpose: "Login".into(),
            scope: "Customer".into(),
        }
    }
}

/// Raw send-OTP input as submitted by the client.
#[derive(Debug, Clone, Default)]
pub struct SendOtpCredentials {
    pub national_code: Option<String>,
}

/// Raw verify-OTP input as submitted by the client.
#[derive(Clone, Default)]
pub struct VerifyOtpCredentials {
    pub challenge_id: Option<String>,
    pub otp: Option<String>,
}

/// Result of a successful provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// Challenge issued; the session is not authenticated yet.
    OtpSent {
        challenge_id: ChallengeId,
        masked_phone_number: Option<String>,
        national_code: NationalCode,
    },
    Authenticated {
        user_id: UserId,
        access_token: AccessToken,
        refresh_token: RefreshToken,
    },
}

impl Identity {
    /// Fold this identity into a fresh token state.
    #[must_use]
    pub fn into_token_state(self, now: OffsetDateTime) -> TokenState {
        match self {
            Self::OtpSent {
                challenge_id,
                masked_phone_number,
                national_code,
            } => TokenState::OtpChallenge {
                challenge_id,
                masked_phone_number,
                national_code,
            },
            Self::Authenticated {
                user_id,
                access_token,
                refresh_token,
            } => TokenState::authenticated(user_id, access_token, refresh_token, now),
        }
    }
}

/// Why a provider returned no identity.
#[derive(Debug, thiserror::Error)]
pub enum Rejection {
    #[error("missing credential: {0}")]
    MissingInput(&'static str),
    #[error(transparent)]
    InvalidInput(Error),
    #[error("upstream rejected request: {0}")]
    Upstream(#[source] Error),
    #[error("refresh token could not be stored: {0}")]
    Persistence(#[source] StoreError),
    #[error("no refresh token cookie")]
    NoRefreshToken,
    #[error("upstream did not answer within {0:?}")]
    Timeout(std::time::Duration),
}

fn required<'a>(value: Option<&'a str>, field: &'static str) -> Result<&'a str, Rejection> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(Rejection::MissingInput(field))
}

/// The send-otp, verify-otp and refresh providers over one upstream.
pub struct Providers<U> {
    upstream: Arc<U>,
    otp: OtpSettings,
    refresh_max_age: Duration,
    refresh_timeout: std::time::Duration,
}

// Manual Clone: avoid derive adding a `U: Clone` bound.
impl<U> Clone for Providers<U> {
    fn clone(&self) -> Self {
        Self {
            upstream: self.upstream.clone(),
            otp: self.otp.clone(),
            refresh_max_age: self.refresh_max_age,
            refresh_timeout: self.refresh_timeout,
        }
    }
}

impl<U: AuthUpstream> Providers<U> {
    #[must_use]
    pub fn new(upstream: Arc<U>) -> Self {
        Self {
            upstream,
            otp: OtpSettings::default(),
            refresh_max_age: REFRESH_TOKEN_MAX_AGE,
            refresh_timeout: REFRESH_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_otp_settings(mut self, otp: OtpSettings) -> Self {
        self.otp = otp;
        self
    }

    #[must_use]
    pub fn with_refresh_max_age(mut self, max_age: Duration) -> Self {
        self.refresh_max_age = max_age;
        self
    }

    /// Bound on the upstream call made by [`refresh`](Self::refresh).
    #[must_use]
    pub fn with_refresh_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    #[must_use]
    pub fn upstream(&self) -> &Arc<U> {
        &self.upstream
    }

    /// Request an OTP for a national code. Does not authenticate the session.
    ///
    /// # Errors
    ///
    /// Returns a [`Rejection`] for missing or malformed input, or any upstream failure.
    pub async fn send_otp(
        &self,
        credentials: &SendOtpCredentials,
        device: &DeviceInfo,
    ) -> Result<Identity, Rejection> {
        let national_code: NationalCode =
            required(credentials.national_code.as_deref(), "nationalCode")?
                .parse()
                .map_err(Rejection::InvalidInput)?;

        let request = SendOtpRequest {
            national_code: national_code.clone(),
            purpose: self.otp.purpose.clone(),
            scope: self.otp.scope.clone(),
            device_id: device.device_id.clone(),
            user_agent: device.user_agent.clone(),
            ip_address: device.ip_address.clone(),
        };

        let data = self.upstream.send_otp(&request).await.map_err(|e| {
            tracing::warn!(error = %e, "Send OTP failed");
            Rejection::Upstream(e)
        })?;

        tracing::info!(challenge_id = %data.challenge_id, "OTP challenge issued");

        Ok(Identity::OtpSent {
            challenge_id: data.challenge_id,
            masked_phone_number: data.masked_phone_number,
            national_code,
        })
    }

    /// Verify an OTP and store the issued refresh token.
    ///
    /// Tokens are only returned once `store` holds the new refresh token.
    ///
    /// # Errors
    ///
    /// Returns a [`Rejection`] for missing input, upstream failure, or
    /// [`Rejection::Persistence`] if the refresh token could not be stored.
    pub async fn verify_otp<S: RefreshTokenStore>(
        &self,
        credentials: &VerifyOtpCredentials,
        device: &DeviceInfo,
        store: &S,
    ) -> Result<Identity, Rejection> {
        let challenge_id = required(credentials.challenge_id.as_deref(), "challengeId")?;
        let otp = required(credentials.otp.as_deref(), "otp")?;

        let request = VerifyOtpRequest {
            challenge_id: ChallengeId::from(challenge_id.to_string()),
            otp_code: otp.to_string(),
            scope: self.otp.scope.clone(),
            device_id: device.device_id.clone(),
            user_agent: device.user_agent.clone(),
            ip_address: device.ip_address.clone(),
        };

        let tokens = self.upstream.verify_otp(&request).await.map_err(|e| {
            tracing::warn!(error = %e, challenge_id = %challenge_id, "OTP verification failed");
            Rejection::Upstream(e)
        })?;

        store
            .set(&tokens.refresh_token, self.refresh_max_age)
            .map_err(|e| {
                tracing::error!(error = %e, user_id = %tokens.user_id, "Refresh token not stored, rejecting login");
                Rejection::Persistence(e)
            })?;

        tracing::info!(user_id = %tokens.user_id, "OTP login successful");

        Ok(Identity::Authenticated {
            user_id: tokens.user_id,
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
        })
    }

    /// Rotate the refresh token held by `store`.
    ///
    /// The new refresh token is parked in `pending` under `key` before the
    /// direct store write is attempted; a failed write is logged and tolerated.
    ///
    /// # Errors
    ///
    /// Returns [`Rejection::NoRefreshToken`] if the store is empty,
    /// [`Rejection::Upstream`] if the upstream call fails, or
    /// [`Rejection::Timeout`] if it does not answer in time.
    pub async fn refresh<S: RefreshTokenStore>(
        &self,
        device: &DeviceInfo,
        store: &S,
        pending: &PendingRotations,
        key: RotationKey,
    ) -> Result<Identity, Rejection> {
        let current = store.get().ok_or_else(|| {
            tracing::warn!("Refresh requested without a refresh token cookie");
            Rejection::NoRefreshToken
        })?;

        let request = RefreshTokenRequest::new(current, device);
        let call = self.upstream.refresh_token(&request);
        let tokens = tokio::time::timeout(self.refresh_timeout, call)
            .await
            .map_err(|_| {
                tracing::warn!(timeout = ?self.refresh_timeout, "Token refresh timed out");
                Rejection::Timeout(self.refresh_timeout)
            })?
            .map_err(|e| {
                tracing::warn!(error = %e, "Token refresh failed");
                Rejection::Upstream(e)
            })?;

        pending.put(key, tokens.refresh_token.clone());
        if let Err(e) = store.set(&tokens.refresh_token, self.refresh_max_age) {
            tracing::warn!(error = %e, key = %key, "Refresh token write failed, relying on pending rotation");
        }

        tracing::info!(user_id = %tokens.user_id, "Tokens rotated");

        Ok(Identity::Authenticated {
            user_id: tokens.user_id,
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
        })
    }
}
