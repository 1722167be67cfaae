use std::sync::Arc;

use axum_extra::extract::cookie::Key;
use time::Duration;
use url::Url;

use super::error::AuthError;
use crate::clock::{Clock, SystemClock};
use crate::orchestrator::REFRESH_TIMEOUT;
use crate::providers::OtpSettings;
use crate::rotation::DEFAULT_TTL;
use crate::state::REFRESH_TOKEN_MAX_AGE;
use crate::upstream::{UpstreamClient, UpstreamConfig};

/// Shared auth settings used by both config and runtime state.
#[derive(Clone)]
pub(crate) struct AuthSettings {
    pub(crate) cookie_key: Key,
    pub(crate) session_cookie_name: String,
    pub(crate) refresh_cookie_name: String,
    pub(crate) session_ttl: Duration,
    pub(crate) refresh_max_age: Duration,
    pub(crate) secure_cookies: bool,
    pub(crate) auth_path: String,
    pub(crate) base_path: Option<String>,
    pub(crate) otp: OtpSettings,
    pub(crate) refresh_timeout: std::time::Duration,
    pub(crate) rotation_ttl: Duration,
    pub(crate) sweep_interval: std::time::Duration,
    pub(crate) clock: Arc<dyn Clock>,
}

impl AuthSettings {
    pub(crate) fn defaults() -> Self {
        Self {
            cookie_key: Key::generate(),
            session_cookie_name: "session-token".into(),
            refresh_cookie_name: "refreshToken".into(),
            session_ttl: REFRESH_TOKEN_MAX_AGE,
            refresh_max_age: REFRESH_TOKEN_MAX_AGE,
            secure_cookies: true,
            auth_path: "/api/auth".into(),
            base_path: None,
            otp: OtpSettings::default(),
            refresh_timeout: REFRESH_TIMEOUT,
            rotation_ttl: DEFAULT_TTL,
            sweep_interval: std::time::Duration::from_secs(30),
            clock: Arc::new(SystemClock),
        }
    }
}

/// Session authentication configuration.
///
/// The upstream is a constructor parameter; everything else has a default
/// overridable with `with_*` methods. Use [`from_env()`](SessionAuthConfig::from_env)
/// for convention-based setup.
pub struct SessionAuthConfig<U = UpstreamClient> {
    pub(super) upstream: U,
    pub(super) settings: AuthSettings,
}

impl SessionAuthConfig<UpstreamClient> {
    /// Create config from environment variables.
    ///
    /// # Required env vars
    /// - `UPSTREAM_BASE_URL`: base URL of the upstream auth service
    /// - `SESSION_SECRET`: key sealing the session cookie (at least 64 bytes)
    ///
    /// # Optional env vars
    /// - `PUBLIC_BASE_URL`: externally visible URL; its path is stripped from requests
    /// - `APP_ENV`: `development`, `dev` or `test` disable `Secure` cookies
    /// - `OTP_PURPOSE`, `OTP_SCOPE`: override the OTP request parameters
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if required env vars are missing or invalid.
    pub fn from_env() -> Result<Self, AuthError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, AuthError> {
        let base_url: Url = lookup("UPSTREAM_BASE_URL")
            .ok_or_else(|| AuthError::Config("UPSTREAM_BASE_URL is required".into()))?
            .parse()
            .map_err(|e| AuthError::Config(format!("UPSTREAM_BASE_URL: {e}")))?;

        let secret = lookup("SESSION_SECRET")
            .ok_or_else(|| AuthError::Config("SESSION_SECRET is required".into()))?;
        let cookie_key = Key::try_from(secret.as_bytes()).map_err(|_| {
            AuthError::Config("SESSION_SECRET is invalid (must be at least 64 bytes)".into())
        })?;

        let mut config = Self::new(UpstreamClient::new(UpstreamConfig::new(base_url)))
            .with_cookie_key(cookie_key);

        if let Some(public) = lookup("PUBLIC_BASE_URL") {
            let url: Url = public
                .parse()
                .map_err(|e| AuthError::Config(format!("PUBLIC_BASE_URL: {e}")))?;
            config = config.with_base_path(url.path());
        }

        let development = matches!(
            lookup("APP_ENV").as_deref(),
            Some("development" | "dev" | "test")
        );
        config = config.with_secure_cookies(!development);

        let mut otp = OtpSettings::default();
        if let Some(purpose) = lookup("OTP_PURPOSE") {
            otp.purpose = purpose;
        }
        if let Some(scope) = lookup("OTP_SCOPE") {
            otp.scope = scope;
        }

        Ok(config.with_otp_settings(otp))
    }
}

impl<U> SessionAuthConfig<U> {
    /// Create config around an upstream. The cookie key is ephemeral until
    /// [`with_cookie_key`](Self::with_cookie_key) is called.
    #[must_use]
    pub fn new(upstream: U) -> Self {
        Self {
            upstream,
            settings: AuthSettings::defaults(),
        }
    }

    #[must_use]
    pub fn with_cookie_key(mut self, key: Key) -> Self {
        self.settings.cookie_key = key;
        self
    }

    #[must_use]
    pub fn with_session_cookie_name(mut self, name: impl Into<String>) -> Self {
        self.settings.session_cookie_name = name.into();
        self
    }

    #[must_use]
    pub fn with_refresh_cookie_name(mut self, name: impl Into<String>) -> Self {
        self.settings.refresh_cookie_name = name.into();
        self
    }

    #[must_use]
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.settings.session_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_refresh_max_age(mut self, max_age: Duration) -> Self {
        self.settings.refresh_max_age = max_age;
        self
    }

    #[must_use]
    pub fn with_secure_cookies(mut self, secure: bool) -> Self {
        self.settings.secure_cookies = secure;
        self
    }

    #[must_use]
    pub fn with_auth_path(mut self, path: impl Into<String>) -> Self {
        self.settings.auth_path = path.into();
        self
    }

    /// Path prefix injected by a reverse proxy, removed by
    /// [`strip_base_path`](super::strip_base_path). `/` and empty mean none.
    #[must_use]
    pub fn with_base_path(mut self, path: &str) -> Self {
        let trimmed = path.trim_end_matches('/');
        self.settings.base_path = (!trimmed.is_empty()).then(|| trimmed.to_string());
        self
    }

    #[must_use]
    pub fn with_otp_settings(mut self, otp: OtpSettings) -> Self {
        self.settings.otp = otp;
        self
    }

    #[must_use]
    pub fn with_refresh_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.settings.refresh_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_rotation_ttl(mut self, ttl: Duration) -> Self {
        self.settings.rotation_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_sweep_interval(mut self, interval: std::time::Duration) -> Self {
        self.settings.sweep_interval = interval;
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.settings.clock = clock;
        self
    }

    /// Prefix to strip before routing, if any.
    #[must_use]
    pub fn base_path(&self) -> Option<&str> {
        self.settings.base_path.as_deref()
    }
}
