//! Axum integration for OTP sessions.
//!
//! Mounts the OTP, verify, refresh and session routes, keeps the encrypted
//! session cookie and the refresh token cookie in step, and provides an
//! [`AuthSession`] extractor for the rest of the application.
//!
//! Rotation happens on the session and refresh routes. [`AuthSession`] reads the
//! session cookie as is and answers `401` once the access token has expired,
//! so clients call `GET /api/auth/session` before retrying.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use otp_session::middleware::{SessionAuthConfig, session_routes};
//!
//! let config = SessionAuthConfig::from_env()?;
//! let reader = config.session_reader();
//!
//! let app = axum::Router::new()
//!     .route("/wallet", get(wallet))
//!     .with_state(reader)
//!     .merge(session_routes(config));
//! ```

mod config;
mod cookies;
mod error;
mod extractor;
mod prefix;
mod routes;
mod state;

pub use config::SessionAuthConfig;
pub use error::AuthError;
pub use extractor::{AuthSession, SessionReader};
pub use prefix::{BasePath, strip_base_path};
pub use routes::session_routes;

/// Re-export cookie key type for builder API.
pub use axum_extra::extract::cookie::Key as CookieKey;
