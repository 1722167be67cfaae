//! Scripted upstream for unit tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::Error;
use crate::types::{ChallengeId, RefreshToken, UserId};
use crate::upstream::{
    AuthUpstream, RefreshTokenRequest, SendOtpData, SendOtpRequest, TokenPair, VerifyOtpRequest,
};

#[derive(Debug, Clone)]
pub(crate) enum Reply<T> {
    Ok(T),
    Reject(&'static str),
    Hang,
}

impl<T: Clone> Reply<T> {
    async fn resolve(&self, operation: &'static str) -> Result<T, Error> {
        match self {
            Self::Ok(value) => Ok(value.clone()),
            Self::Reject(detail) => Err(Error::Upstream {
                operation,
                status: Some(400),
                detail: (*detail).to_string(),
            }),
            Self::Hang => std::future::pending().await,
        }
    }
}

pub(crate) fn pair(access: &str, refresh: &str, user: &str) -> TokenPair {
    TokenPair {
        access_token: access.into(),
        refresh_token: refresh.into(),
        user_id: UserId::from(user.to_string()),
    }
}

#[derive(Debug)]
pub(crate) struct FakeUpstream {
    pub(crate) send: Mutex<Reply<SendOtpData>>,
    pub(crate) verify: Mutex<Reply<TokenPair>>,
    pub(crate) refresh: Mutex<Reply<TokenPair>>,
    pub(crate) send_calls: AtomicUsize,
    pub(crate) verify_calls: AtomicUsize,
    pub(crate) refresh_calls: AtomicUsize,
    pub(crate) last_refresh_token: Mutex<Option<RefreshToken>>,
}

impl Default for FakeUpstream {
    fn default() -> Self {
        Self {
            send: Mutex::new(Reply::Ok(SendOtpData {
                challenge_id: ChallengeId::from("c1".to_string()),
                masked_phone_number: Some("09**1234".into()),
            })),
            verify: Mutex::new(Reply::Ok(pair("A1", "R1", "u1"))),
            refresh: Mutex::new(Reply::Ok(pair("A2", "R2", "u1"))),
            send_calls: AtomicUsize::new(0),
            verify_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            last_refresh_token: Mutex::new(None),
        }
    }
}

impl FakeUpstream {
    pub(crate) fn with_refresh(self, reply: Reply<TokenPair>) -> Self {
        *self.refresh.lock().unwrap() = reply;
        self
    }

    pub(crate) fn with_verify(self, reply: Reply<TokenPair>) -> Self {
        *self.verify.lock().unwrap() = reply;
        self
    }

    pub(crate) fn with_send(self, reply: Reply<SendOtpData>) -> Self {
        *self.send.lock().unwrap() = reply;
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.send_calls.load(Ordering::SeqCst)
            + self.verify_calls.load(Ordering::SeqCst)
            + self.refresh_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }
}

impl AuthUpstream for FakeUpstream {
    async fn send_otp(&self, _request: &SendOtpRequest) -> Result<SendOtpData, Error> {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        let reply = self.send.lock().unwrap().clone();
        reply.resolve("send-otp").await
    }

    async fn verify_otp(&self, _request: &VerifyOtpRequest) -> Result<TokenPair, Error> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        let reply = self.verify.lock().unwrap().clone();
        reply.resolve("verify-otp").await
    }

    async fn refresh_token(&self, request: &RefreshTokenRequest) -> Result<TokenPair, Error> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_refresh_token.lock().unwrap() = Some(request.refresh_token.clone());
        let reply = self.refresh.lock().unwrap().clone();
        reply.resolve("refresh-token").await
    }
}
