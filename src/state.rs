use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use crate::types::{AccessToken, ChallengeId, NationalCode, RefreshToken, UserId};

/// `user.id` exposed while an OTP challenge is pending.
pub const OTP_SENT_USER_ID: &str = "otp-sent";

/// Validity window of an access token, counted from issuance or rotation.
pub const ACCESS_TOKEN_TTL: Duration = Duration::minutes(15);

/// Lifetime of the refresh token cookie and of the session cookie.
pub const REFRESH_TOKEN_MAX_AGE: Duration = Duration::days(7);

/// Sticky failure marker. Once set, no refresh is attempted for the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenError {
    RefreshAccessTokenError,
}

/// Per-browser session token state, sealed into the session cookie.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TokenState {
    #[default]
    Anonymous,
    /// OTP sent, not yet verified. Not an authenticated session.
    OtpChallenge {
        challenge_id: ChallengeId,
        masked_phone_number: Option<String>,
        national_code: NationalCode,
    },
    Authenticated {
        access_token: AccessToken,
        /// Last issued refresh token, held for the current request only.
        /// Never projected, never written to the session cookie, and never
        /// used for rotation: the refresh token store is authoritative.
        #[serde(skip)]
        refresh_token: RefreshToken,
        user_id: UserId,
        #[serde(with = "time::serde::rfc3339")]
        access_token_expires_at: OffsetDateTime,
    },
    Errored {
        error: TokenError,
        last_user_id: Option<UserId>,
    },
}

impl TokenState {
    /// Fresh tokens, valid for [`ACCESS_TOKEN_TTL`] from `now`.
    #[must_use]
    pub fn authenticated(
        user_id: UserId,
        access_token: AccessToken,
        refresh_token: RefreshToken,
        now: OffsetDateTime,
    ) -> Self {
        Self::Authenticated {
            access_token,
            refresh_token,
            user_id,
            access_token_expires_at: now + ACCESS_TOKEN_TTL,
        }
    }

    /// Mark the state as failed to refresh, keeping the last known user.
    #[must_use]
    pub fn into_refresh_error(self) -> Self {
        let last_user_id = match self {
            Self::Authenticated { user_id, .. } => Some(user_id),
            Self::Errored { last_user_id, .. } => last_user_id,
            Self::Anonymous | Self::OtpChallenge { .. } => None,
        };
        Self::Errored {
            error: TokenError::RefreshAccessTokenError,
            last_user_id,
        }
    }

    #[must_use]
    pub fn error(&self) -> Option<TokenError> {
        match self {
            Self::Errored { error, .. } => Some(*error),
            _ => None,
        }
    }

    #[must_use]
    pub fn access_token(&self) -> Option<&AccessToken> {
        match self {
            Self::Authenticated { access_token, .. } => Some(access_token),
            _ => None,
        }
    }

    #[must_use]
    pub fn user_id(&self) -> Option<&UserId> {
        match self {
            Self::Authenticated { user_id, .. } => Some(user_id),
            Self::Errored { last_user_id, .. } => last_user_id.as_ref(),
            Self::Anonymous | Self::OtpChallenge { .. } => None,
        }
    }

    /// True while the access token has not reached its expiry.
    #[must_use]
    pub fn is_valid_at(&self, now: OffsetDateTime) -> bool {
        matches!(
            self,
            Self::Authenticated { access_token_expires_at, .. } if now < *access_token_expires_at
        )
    }

    /// Externally visible view of this state.
    #[must_use]
    pub fn project(&self) -> SessionProjection {
        match self {
            Self::OtpChallenge {
                challenge_id,
                masked_phone_number,
                national_code,
            } => SessionProjection {
                user: ProjectedUser {
                    id: OTP_SENT_USER_ID.into(),
                },
                access_token: None,
                challenge_id: Some(challenge_id.clone()),
                masked_phone_number: masked_phone_number.clone(),
                national_code: Some(national_code.clone()),
            },
            Self::Authenticated {
                access_token,
                user_id,
                ..
            } => SessionProjection {
                user: ProjectedUser {
                    id: user_id.to_string(),
                },
                access_token: Some(access_token.clone()),
                ..SessionProjection::unauthenticated()
            },
            Self::Anonymous | Self::Errored { .. } => SessionProjection::unauthenticated(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectedUser {
    pub id: String,
}

/// Sanitized session returned to callers. Has no refresh token field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionProjection {
    pub user: ProjectedUser,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<AccessToken>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub challenge_id: Option<ChallengeId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub masked_phone_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub national_code: Option<NationalCode>,
}

impl SessionProjection {
    /// `{user: {id: ""}}`: callers must treat this as not authenticated.
    #[must_use]
    pub fn unauthenticated() -> Self {
        Self {
            user: ProjectedUser { id: String::new() },
            access_token: None,
            challenge_id: None,
            masked_phone_number: None,
            national_code: None,
        }
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.access_token.is_some() && !self.user.id.is_empty() && self.user.id != OTP_SENT_USER_ID
    }
}
