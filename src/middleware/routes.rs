use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, header::USER_AGENT};
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_extra::extract::PrivateCookieJar;
use serde::Deserialize;

use super::config::{AuthSettings, SessionAuthConfig};
use super::cookies::{self, CookieRefreshStore};
use super::error::AuthError;
use super::state::AuthState;
use crate::orchestrator::Orchestrator;
use crate::providers::{Identity, Providers, SendOtpCredentials, VerifyOtpCredentials};
use crate::rotation::{PendingRotations, RotationKey, spawn_sweeper};
use crate::state::{SessionProjection, TokenState};
use crate::types::{DeviceInfo, RefreshToken};
use crate::upstream::AuthUpstream;

type SessionResponse = (PrivateCookieJar, Json<SessionProjection>);

/// Create the session authentication router.
///
/// Routes, relative to the configured auth path (default `/api/auth`):
/// `POST /otp`, `POST /otp/verify`, `POST /refresh`, `GET /session`.
pub fn session_routes<U: AuthUpstream>(config: SessionAuthConfig<U>) -> Router {
    let SessionAuthConfig { upstream, settings } = config;
    let upstream = Arc::new(upstream);

    let providers = Providers::new(upstream.clone())
        .with_otp_settings(settings.otp.clone())
        .with_refresh_max_age(settings.refresh_max_age)
        .with_refresh_timeout(settings.refresh_timeout);
    let orchestrator = Orchestrator::new(upstream, settings.clock.clone())
        .with_timeout(settings.refresh_timeout)
        .with_refresh_max_age(settings.refresh_max_age);
    let pending = Arc::new(
        PendingRotations::new(settings.clock.clone()).with_ttl(settings.rotation_ttl),
    );

    // The sweeper exits once the router, and with it `pending`, is dropped.
    if tokio::runtime::Handle::try_current().is_ok() {
        spawn_sweeper(&pending, settings.sweep_interval);
    } else {
        tracing::warn!("No Tokio runtime; pending rotations expire only on access");
    }

    let auth_path = settings.auth_path.clone();
    let state = AuthState {
        providers,
        orchestrator,
        pending,
        settings,
    };

    Router::new()
        .route(&format!("{auth_path}/otp"), post(send_otp::<U>))
        .route(&format!("{auth_path}/otp/verify"), post(verify_otp::<U>))
        .route(&format!("{auth_path}/refresh"), post(refresh::<U>))
        .route(&format!("{auth_path}/session"), get(session::<U>))
        .with_state(state)
}

// ── Send OTP ───────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendOtpBody {
    national_code: Option<String>,
    device_id: Option<String>,
}

async fn send_otp<U: AuthUpstream>(
    State(state): State<AuthState<U>>,
    jar: PrivateCookieJar,
    headers: HeaderMap,
    Json(body): Json<SendOtpBody>,
) -> Result<SessionResponse, AuthError> {
    let device = device_info(&headers, body.device_id);
    let credentials = SendOtpCredentials {
        national_code: body.national_code,
    };

    let identity = state.providers.send_otp(&credentials, &device).await?;

    let store = CookieRefreshStore::from_jar(&jar, &state.settings);
    establish(&state, jar, identity, &store, &device).await
}

// ── Verify OTP ─────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyOtpBody {
    challenge_id: Option<String>,
    otp: Option<String>,
    device_id: Option<String>,
}

async fn verify_otp<U: AuthUpstream>(
    State(state): State<AuthState<U>>,
    jar: PrivateCookieJar,
    headers: HeaderMap,
    Json(body): Json<VerifyOtpBody>,
) -> Result<SessionResponse, AuthError> {
    let device = device_info(&headers, body.device_id);
    let credentials = VerifyOtpCredentials {
        challenge_id: body.challenge_id,
        otp: body.otp,
    };

    let store = CookieRefreshStore::from_jar(&jar, &state.settings);
    let identity = state
        .providers
        .verify_otp(&credentials, &device, &store)
        .await?;

    establish(&state, jar, identity, &store, &device).await
}

// ── Refresh ────────────────────────────────────────────────────────

async fn refresh<U: AuthUpstream>(
    State(state): State<AuthState<U>>,
    jar: PrivateCookieJar,
    headers: HeaderMap,
) -> Result<SessionResponse, AuthError> {
    let device = device_info(&headers, None);
    let store = CookieRefreshStore::from_jar(&jar, &state.settings);
    let key = RotationKey::new();

    let result = state
        .providers
        .refresh(&device, &store, &state.pending, key)
        .await;
    let buffered = state.pending.take(&key);
    let identity = result?;

    let jar = deliver_pending_rotation(jar, store.has_pending_change(), buffered, &state.settings);
    establish(&state, jar, identity, &store, &device).await
}

/// Set the refresh cookie from the pending rotation when the direct store
/// write did not go through.
fn deliver_pending_rotation(
    jar: PrivateCookieJar,
    store_written: bool,
    buffered: Option<RefreshToken>,
    settings: &AuthSettings,
) -> PrivateCookieJar {
    if !store_written && let Some(token) = buffered {
        tracing::info!("Setting rotated refresh token from pending rotation");
        return jar.add(cookies::refresh_cookie(
            &settings.refresh_cookie_name,
            &token,
            settings.refresh_max_age,
            settings.secure_cookies,
        ));
    }
    jar
}

// ── Session ────────────────────────────────────────────────────────

async fn session<U: AuthUpstream>(
    State(state): State<AuthState<U>>,
    jar: PrivateCookieJar,
    headers: HeaderMap,
) -> Result<SessionResponse, AuthError> {
    let device = device_info(&headers, None);
    let store = CookieRefreshStore::from_jar(&jar, &state.settings);
    let current = cookies::read_session(&jar, &state.settings.session_cookie_name);

    let next = state
        .orchestrator
        .resolve(current, None, &store, &device)
        .await;

    finish(&state, jar, &next, &store)
}

// ── Helpers ────────────────────────────────────────────────────────

/// Fold a provider identity into the session and write the response cookies.
async fn establish<U: AuthUpstream>(
    state: &AuthState<U>,
    jar: PrivateCookieJar,
    identity: Identity,
    store: &CookieRefreshStore,
    device: &DeviceInfo,
) -> Result<SessionResponse, AuthError> {
    let current = cookies::read_session(&jar, &state.settings.session_cookie_name);
    let next = state
        .orchestrator
        .resolve(current, Some(identity), store, device)
        .await;
    finish(state, jar, &next, store)
}

fn finish<U>(
    state: &AuthState<U>,
    jar: PrivateCookieJar,
    next: &TokenState,
    store: &CookieRefreshStore,
) -> Result<SessionResponse, AuthError> {
    let jar = store.apply(jar);
    let jar = cookies::write_session(jar, next, &state.settings)?;
    Ok((jar, Json(next.project())))
}

fn device_info(headers: &HeaderMap, device_id: Option<String>) -> DeviceInfo {
    DeviceInfo {
        device_id: device_id.or_else(|| header_value(headers, "x-device-id")),
        user_agent: header_value(headers, USER_AGENT.as_str()),
        ip_address: extract_client_ip(headers),
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .or_else(|| header_value(headers, "x-real-ip"))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use axum::body::{Body, to_bytes};
    use axum::http::header::{CONTENT_TYPE, COOKIE, SET_COOKIE};
    use axum::http::{HeaderValue, Request, StatusCode};
    use axum::response::Response;
    use axum_extra::extract::cookie::{Cookie, Key};
    use serde_json::{Value, json};
    use time::{Duration, OffsetDateTime};
    use tower::ServiceExt;

    use super::*;
    use crate::clock::ManualClock;
    use crate::middleware::AuthSession;
    use crate::testing::{FakeUpstream, Reply, pair};

    struct TestApp {
        router: Router,
        key: Key,
        clock: ManualClock,
        upstream: Arc<FakeUpstream>,
        cookies: BTreeMap<String, String>,
    }

    impl TestApp {
        fn new(upstream: FakeUpstream) -> Self {
            let key = Key::generate();
            let clock = ManualClock::new(OffsetDateTime::UNIX_EPOCH + Duration::days(20_000));
            let upstream = Arc::new(upstream);
            let config = SessionAuthConfig::new(SharedUpstream(upstream.clone()))
                .with_cookie_key(key.clone())
                .with_secure_cookies(false)
                .with_clock(Arc::new(clock.clone()));
            let reader = config.session_reader();
            let router = Router::new()
                .route(
                    "/me",
                    get(|session: AuthSession| async move { session.user_id.to_string() }),
                )
                .with_state(reader)
                .merge(session_routes(config));
            Self {
                router,
                key,
                clock,
                upstream,
                cookies: BTreeMap::new(),
            }
        }

        async fn send(&mut self, method: &str, uri: &str, body: Option<Value>) -> Response {
            let mut builder = Request::builder().method(method).uri(uri);
            if !self.cookies.is_empty() {
                let header = self
                    .cookies
                    .iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect::<Vec<_>>()
                    .join("; ");
                builder = builder.header(COOKIE, header);
            }
            let request = match body {
                Some(body) => builder
                    .header(CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
                None => builder.body(Body::empty()).unwrap(),
            };
            let response = self.router.clone().oneshot(request).await.unwrap();
            for value in response.headers().get_all(SET_COOKIE) {
                let cookie = Cookie::parse(value.to_str().unwrap().to_string()).unwrap();
                if cookie.max_age() == Some(Duration::ZERO) {
                    self.cookies.remove(cookie.name());
                } else {
                    self.cookies
                        .insert(cookie.name().to_string(), cookie.value().to_string());
                }
            }
            response
        }

        /// Decrypted value of a cookie currently held by the client.
        fn cookie(&self, name: &str) -> Option<String> {
            let value = self.cookies.get(name)?;
            let mut headers = HeaderMap::new();
            headers.insert(
                COOKIE,
                HeaderValue::from_str(&format!("{name}={value}")).unwrap(),
            );
            PrivateCookieJar::from_headers(&headers, self.key.clone())
                .get(name)
                .map(|c| c.value().to_string())
        }

        async fn login(&mut self) {
            let response = self
                .send("POST", "/api/auth/otp", Some(json!({"nationalCode": "1234567890"})))
                .await;
            assert_eq!(response.status(), StatusCode::OK);
            let response = self
                .send(
                    "POST",
                    "/api/auth/otp/verify",
                    Some(json!({"challengeId": "c1", "otp": "4321"})),
                )
                .await;
            assert_eq!(response.status(), StatusCode::OK);
        }
    }

    /// Lets tests keep a handle on the upstream the router owns.
    struct SharedUpstream(Arc<FakeUpstream>);

    impl AuthUpstream for SharedUpstream {
        async fn send_otp(
            &self,
            request: &crate::upstream::SendOtpRequest,
        ) -> Result<crate::upstream::SendOtpData, crate::Error> {
            self.0.send_otp(request).await
        }

        async fn verify_otp(
            &self,
            request: &crate::upstream::VerifyOtpRequest,
        ) -> Result<crate::upstream::TokenPair, crate::Error> {
            self.0.verify_otp(request).await
        }

        async fn refresh_token(
            &self,
            request: &crate::upstream::RefreshTokenRequest,
        ) -> Result<crate::upstream::TokenPair, crate::Error> {
            self.0.refresh_token(request).await
        }
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn send_otp_starts_challenge() {
        let mut app = TestApp::new(FakeUpstream::default());
        let response = app
            .send("POST", "/api/auth/otp", Some(json!({"nationalCode": "1234567890"})))
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            json!({
                "user": {"id": "otp-sent"},
                "challengeId": "c1",
                "maskedPhoneNumber": "09**1234",
                "nationalCode": "1234567890",
            })
        );
        assert!(app.cookie("session-token").is_some());
        assert!(app.cookie("refreshToken").is_none());
    }

    #[tokio::test]
    async fn send_otp_without_code_is_unauthorized() {
        let mut app = TestApp::new(FakeUpstream::default());
        let response = app.send("POST", "/api/auth/otp", Some(json!({}))).await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await, json!({"user": {"id": ""}}));
        assert_eq!(app.upstream.calls(), 0);
    }

    #[tokio::test]
    async fn verify_otp_sets_refresh_cookie_and_hides_it() {
        let mut app = TestApp::new(FakeUpstream::default());
        app.send("POST", "/api/auth/otp", Some(json!({"nationalCode": "1234567890"})))
            .await;
        let response = app
            .send(
                "POST",
                "/api/auth/otp/verify",
                Some(json!({"challengeId": "c1", "otp": "4321"})),
            )
            .await;

        let set_cookies: Vec<String> = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect();
        let refresh = set_cookies
            .iter()
            .find(|c| c.starts_with("refreshToken="))
            .unwrap();
        assert!(refresh.contains("HttpOnly"));
        assert!(refresh.contains("SameSite=Strict"));
        assert!(refresh.contains("Max-Age=604800"));

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body, json!({"user": {"id": "u1"}, "accessToken": "A1"}));
        assert_eq!(app.cookie("refreshToken").as_deref(), Some("R1"));
        let session = app.cookie("session-token").unwrap();
        assert!(!session.contains("\"R1\""), "refresh token in {session}");
    }

    #[tokio::test]
    async fn session_refreshes_expired_access_token() {
        let mut app = TestApp::new(FakeUpstream::default());
        app.login().await;
        app.clock.advance(Duration::minutes(16));

        let response = app.send("GET", "/api/auth/session", None).await;

        assert_eq!(
            json_body(response).await,
            json!({"user": {"id": "u1"}, "accessToken": "A2"})
        );
        assert_eq!(app.cookie("refreshToken").as_deref(), Some("R2"));
        assert_eq!(app.upstream.refresh_calls(), 1);
    }

    #[tokio::test]
    async fn session_within_validity_makes_no_upstream_call() {
        let mut app = TestApp::new(FakeUpstream::default());
        app.login().await;
        let calls = app.upstream.calls();

        for _ in 0..3 {
            let response = app.send("GET", "/api/auth/session", None).await;
            assert_eq!(response.status(), StatusCode::OK);
        }
        assert_eq!(app.upstream.calls(), calls);
    }

    #[tokio::test]
    async fn failed_refresh_sticks_until_next_login() {
        let mut app = TestApp::new(FakeUpstream::default());
        app.login().await;
        *app.upstream.refresh.lock().unwrap() = Reply::Reject("revoked");
        app.clock.advance(Duration::minutes(16));

        let response = app.send("GET", "/api/auth/session", None).await;
        assert_eq!(json_body(response).await, json!({"user": {"id": ""}}));
        assert_eq!(app.upstream.refresh_calls(), 1);

        app.send("GET", "/api/auth/session", None).await;
        app.send("GET", "/api/auth/session", None).await;
        assert_eq!(app.upstream.refresh_calls(), 1);

        app.login().await;
        let response = app.send("GET", "/api/auth/session", None).await;
        assert_eq!(
            json_body(response).await,
            json!({"user": {"id": "u1"}, "accessToken": "A1"})
        );
    }

    #[tokio::test]
    async fn explicit_refresh_rotates_tokens() {
        let mut app = TestApp::new(FakeUpstream::default());
        app.login().await;

        let response = app.send("POST", "/api/auth/refresh", None).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            json!({"user": {"id": "u1"}, "accessToken": "A2"})
        );
        assert_eq!(app.cookie("refreshToken").as_deref(), Some("R2"));
    }

    #[tokio::test]
    async fn explicit_refresh_without_cookie_is_unauthorized() {
        let mut app = TestApp::new(FakeUpstream::default());
        let response = app.send("POST", "/api/auth/refresh", None).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(app.upstream.calls(), 0);
    }

    #[tokio::test]
    async fn tokens_outside_cookie_octets_round_trip() {
        let mut app = TestApp::new(
            FakeUpstream::default()
                .with_verify(Reply::Ok(pair("A1", "R 1", "u1")))
                .with_refresh(Reply::Ok(pair("A2", "R 2;x", "u1"))),
        );
        app.login().await;
        assert_eq!(app.cookie("refreshToken").as_deref(), Some("R 1"));

        let response = app.send("POST", "/api/auth/refresh", None).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            *app.upstream.last_refresh_token.lock().unwrap(),
            Some(RefreshToken::from("R 1"))
        );
        assert_eq!(app.cookie("refreshToken").as_deref(), Some("R 2;x"));
    }

    #[test]
    fn pending_rotation_delivered_only_without_store_write() {
        let settings = AuthSettings::defaults();
        let key = settings.cookie_key.clone();
        let buffered = Some(RefreshToken::from("R2"));

        let jar = deliver_pending_rotation(
            PrivateCookieJar::new(key.clone()),
            false,
            buffered.clone(),
            &settings,
        );
        let cookie = jar.get("refreshToken").unwrap();
        assert_eq!(cookie.value(), "R2");
        assert_eq!(cookie.http_only(), Some(true));

        let jar =
            deliver_pending_rotation(PrivateCookieJar::new(key.clone()), true, buffered, &settings);
        assert!(jar.get("refreshToken").is_none());

        let jar = deliver_pending_rotation(PrivateCookieJar::new(key), false, None, &settings);
        assert!(jar.get("refreshToken").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_route_gives_up_on_hung_upstream() {
        let mut app = TestApp::new(FakeUpstream::default());
        app.login().await;
        *app.upstream.refresh.lock().unwrap() = Reply::Hang;

        let started = tokio::time::Instant::now();
        let response = app.send("POST", "/api/auth/refresh", None).await;

        assert!(started.elapsed() < std::time::Duration::from_secs(4));
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await, json!({"user": {"id": ""}}));
        assert_eq!(app.cookie("refreshToken").as_deref(), Some("R1"));
    }

    #[tokio::test]
    async fn auth_session_extractor_tracks_validity() {
        let mut app = TestApp::new(FakeUpstream::default());
        let response = app.send("GET", "/me", None).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        app.login().await;
        let response = app.send("GET", "/me", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"u1");

        app.clock.advance(Duration::minutes(16));
        let response = app.send("GET", "/me", None).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        // The session route rotates; the extractor then sees the new token.
        app.send("GET", "/api/auth/session", None).await;
        let response = app.send("GET", "/me", None).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn device_info_prefers_forwarded_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.1, 10.0.0.2"));
        headers.insert("x-real-ip", HeaderValue::from_static("10.9.9.9"));
        headers.insert("x-device-id", HeaderValue::from_static("dev-1"));
        headers.insert(USER_AGENT, HeaderValue::from_static("test-agent"));

        let device = device_info(&headers, None);
        assert_eq!(device.ip_address.as_deref(), Some("10.0.0.1"));
        assert_eq!(device.device_id.as_deref(), Some("dev-1"));
        assert_eq!(device.user_agent.as_deref(), Some("test-agent"));

        let device = device_info(&headers, Some("body-device".into()));
        assert_eq!(device.device_id.as_deref(), Some("body-device"));
    }
}
