use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::providers::Rejection;
use crate::state::SessionProjection;

/// Authentication errors for the middleware layer.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No valid session found.
    #[error("Not authenticated")]
    Unauthenticated,

    /// Session exists but its access token expired or could not be refreshed.
    #[error("Session expired")]
    SessionExpired,

    /// A credential provider returned no identity.
    #[error("Credentials rejected: {0}")]
    Rejected(#[from] Rejection),

    /// Session cookie could not be written.
    #[error("Session error: {0}")]
    Session(String),

    /// Missing or invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        match self {
            Self::Unauthenticated | Self::SessionExpired => {
                (StatusCode::UNAUTHORIZED, self.to_string()).into_response()
            }
            Self::Rejected(_) => (
                StatusCode::UNAUTHORIZED,
                Json(SessionProjection::unauthenticated()),
            )
                .into_response(),
            Self::Session(_) | Self::Config(_) => {
                tracing::error!(error = %self, "Auth internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal error").into_response()
            }
        }
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(e: serde_json::Error) -> Self {
        Self::Session(e.to_string())
    }
}
