use std::future::Future;

use serde::{Deserialize, Serialize};
#[cfg(feature = "client")]
use serde::de::DeserializeOwned;
use url::Url;

use crate::error::Error;
use crate::types::{AccessToken, ChallengeId, DeviceInfo, NationalCode, RefreshToken, UserId};

/// Upstream response envelope: `{isSuccess, message?, errors?, data?}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T> {
    pub is_success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub errors: Option<Vec<String>>,
    pub data: Option<T>,
}

impl<T> Envelope<T> {
    /// Returns `data` only when the envelope reports success and carries it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Upstream`] if `isSuccess` is false or `data` is missing.
    pub fn into_data(self, operation: &'static str, status: u16) -> Result<T, Error> {
        match (self.is_success, self.data) {
            (true, Some(data)) => Ok(data),
            (true, None) => Err(Error::Upstream {
                operation,
                status: Some(status),
                detail: "missing data".into(),
            }),
            (false, _) => Err(Error::Upstream {
                operation,
                status: Some(status),
                detail: failure_detail(self.message, self.errors),
            }),
        }
    }
}

fn failure_detail(message: Option<String>, errors: Option<Vec<String>>) -> String {
    match (message, errors.filter(|e| !e.is_empty())) {
        (Some(m), Some(e)) => format!("{m}: {}", e.join("; ")),
        (Some(m), None) => m,
        (None, Some(e)) => e.join("; "),
        (None, None) => "request rejected".into(),
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendOtpRequest {
    pub national_code: NationalCode,
    pub purpose: String,
    pub scope: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
}

#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyOtpRequest {
    pub challenge_id: ChallengeId,
    pub otp_code: String,
    pub scope: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenRequest {
    pub refresh_token: RefreshToken,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
}

impl RefreshTokenRequest {
    #[must_use]
    pub fn new(refresh_token: RefreshToken, device: &DeviceInfo) -> Self {
        Self {
            refresh_token,
            device_id: device.device_id.clone(),
            user_agent: device.user_agent.clone(),
            ip_address: device.ip_address.clone(),
        }
    }
}

/// `data` of a successful send-OTP call.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendOtpData {
    pub challenge_id: ChallengeId,
    #[serde(default)]
    pub masked_phone_number: Option<String>,
}

/// `data` of a successful verify-OTP or refresh call.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: AccessToken,
    pub refresh_token: RefreshToken,
    pub user_id: UserId,
}

/// The upstream OTP authentication service.
///
/// Every failure, including `isSuccess: false`, is an `Err`; callers never
/// see partial data.
pub trait AuthUpstream: Send + Sync + 'static {
    fn send_otp(
        &self,
        request: &SendOtpRequest,
    ) -> impl Future<Output = Result<SendOtpData, Error>> + Send;

    fn verify_otp(
        &self,
        request: &VerifyOtpRequest,
    ) -> impl Future<Output = Result<TokenPair, Error>> + Send;

    fn refresh_token(
        &self,
        request: &RefreshTokenRequest,
    ) -> impl Future<Output = Result<TokenPair, Error>> + Send;
}

/// Upstream endpoint configuration.
///
/// ```rust,ignore
/// let config = UpstreamConfig::new("https://api.example.com/auth/".parse()?)
///     .with_refresh_path("token/refresh");
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct UpstreamConfig {
    pub(crate) base_url: Url,
    pub(crate) send_otp_path: String,
    pub(crate) verify_otp_path: String,
    pub(crate) refresh_path: String,
}

impl UpstreamConfig {
    /// Endpoint paths are resolved relative to `base_url`; a missing trailing
    /// slash is added so the last path segment is kept.
    #[must_use]
    pub fn new(mut base_url: Url) -> Self {
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Self {
            base_url,
            send_otp_path: "otp".into(),
            verify_otp_path: "otp/verify".into(),
            refresh_path: "refresh".into(),
        }
    }

    #[must_use]
    pub fn with_send_otp_path(mut self, path: impl Into<String>) -> Self {
        self.send_otp_path = path.into();
        self
    }

    #[must_use]
    pub fn with_verify_otp_path(mut self, path: impl Into<String>) -> Self {
        self.verify_otp_path = path.into();
        self
    }

    #[must_use]
    pub fn with_refresh_path(mut self, path: impl Into<String>) -> Self {
        self.refresh_path = path.into();
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, Error> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }
}

/// reqwest-backed [`AuthUpstream`].
#[cfg(feature = "client")]
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    config: UpstreamConfig,
    http: reqwest::Client,
}

#[cfg(feature = "client")]
impl UpstreamClient {
    #[must_use]
    pub fn new(config: UpstreamConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    #[must_use]
    pub fn config(&self) -> &UpstreamConfig {
        &self.config
    }

    async fn post<B, T>(&self, path: &str, body: &B, operation: &'static str) -> Result<T, Error>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.config.endpoint(path)?;
        let response = self.http.post(url).json(body).send().await?;
        let status = response.status().as_u16();

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = match serde_json::from_str::<Envelope<serde_json::Value>>(&body) {
                Ok(envelope) => failure_detail(envelope.message, envelope.errors),
                Err(_) => body,
            };
            return Err(Error::Upstream {
                operation,
                status: Some(status),
                detail,
            });
        }

        response
            .json::<Envelope<T>>()
            .await?
            .into_data(operation, status)
    }
}

#[cfg(feature = "client")]
impl AuthUpstream for UpstreamClient {
    async fn send_otp(&self, request: &SendOtpRequest) -> Result<SendOtpData, Error> {
        self.post(&self.config.send_otp_path, request, "send-otp")
            .await
    }

    async fn verify_otp(&self, request: &VerifyOtpRequest) -> Result<TokenPair, Error> {
        self.post(&self.config.verify_otp_path, request, "verify-otp")
            .await
    }

    async fn refresh_token(&self, request: &RefreshTokenRequest) -> Result<TokenPair, Error> {
        self.post(&self.config.refresh_path, request, "refresh-token")
            .await
    }
}
