use std::sync::Mutex;

use time::Duration;

use crate::error::StoreError;
use crate::types::RefreshToken;

/// Canonical holder of the current refresh token.
///
/// Providers and the orchestrator read the refresh token only from here,
/// never from session state, since a cached copy may be stale after rotation.
pub trait RefreshTokenStore: Send + Sync {
    fn get(&self) -> Option<RefreshToken>;

    /// Persist `token`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the value cannot be stored. Callers decide
    /// whether that is fatal.
    fn set(&self, token: &RefreshToken, max_age: Duration) -> Result<(), StoreError>;

    fn remove(&self);
}

impl<S: RefreshTokenStore + ?Sized> RefreshTokenStore for &S {
    fn get(&self) -> Option<RefreshToken> {
        (**self).get()
    }

    fn set(&self, token: &RefreshToken, max_age: Duration) -> Result<(), StoreError> {
        (**self).set(token, max_age)
    }

    fn remove(&self) {
        (**self).remove();
    }
}

/// In-process store, mainly for tests and non-HTTP callers.
#[derive(Debug, Default)]
pub struct MemoryRefreshStore {
    token: Mutex<Option<RefreshToken>>,
    fail_writes: Mutex<bool>,
}

impl MemoryRefreshStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_token(token: impl Into<RefreshToken>) -> Self {
        Self {
            token: Mutex::new(Some(token.into())),
            fail_writes: Mutex::new(false),
        }
    }

    /// Make every subsequent `set` fail with [`StoreError::Unavailable`].
    pub fn fail_writes(&self, fail: bool) {
        *self.fail_writes.lock().unwrap_or_else(|e| e.into_inner()) = fail;
    }
}

impl RefreshTokenStore for MemoryRefreshStore {
    fn get(&self) -> Option<RefreshToken> {
        self.token.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set(&self, token: &RefreshToken, _max_age: Duration) -> Result<(), StoreError> {
        if *self.fail_writes.lock().unwrap_or_else(|e| e.into_inner()) {
            return Err(StoreError::Unavailable("writes disabled".into()));
        }
        let mut slot = self
            .token
            .lock()
            .map_err(|_| StoreError::Unavailable("poisoned".into()))?;
        *slot = Some(token.clone());
        Ok(())
    }

    fn remove(&self) {
        *self.token.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}
