//! Short-lived hand-off of freshly rotated refresh tokens.
//!
//! A refresh token minted deep inside a credential provider must reach the
//! outgoing response as a `Set-Cookie`. The provider parks it here under the
//! request's [`RotationKey`]; the outermost handler takes it back out and sets
//! the cookie itself if the direct store write did not go through.
//!
//! Entries live at most `ttl` (60 seconds by default). This is a delivery
//! aid, not a source of truth: no ordering, at-least-once, best effort.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use derive_more::Display;
use time::{Duration, OffsetDateTime};
use ulid::Ulid;

use crate::clock::Clock;
use crate::types::RefreshToken;

pub const DEFAULT_TTL: Duration = Duration::seconds(60);
pub const DEFAULT_CAPACITY: usize = 1024;

/// Per-request key for a pending rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub struct RotationKey(Ulid);

impl RotationKey {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for RotationKey {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct Entry {
    key: RotationKey,
    token: RefreshToken,
    inserted_at: OffsetDateTime,
}

/// Process-wide buffer of rotated refresh tokens awaiting delivery.
pub struct PendingRotations {
    clock: Arc<dyn Clock>,
    ttl: Duration,
    capacity: usize,
    entries: Mutex<VecDeque<Entry>>,
}

impl std::fmt::Debug for PendingRotations {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRotations")
            .field("ttl", &self.ttl)
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

impl PendingRotations {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            ttl: DEFAULT_TTL,
            capacity: DEFAULT_CAPACITY,
            entries: Mutex::new(VecDeque::new()),
        }
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Maximum number of entries; the oldest is evicted when full.
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn entries(&self) -> MutexGuard<'_, VecDeque<Entry>> {
        // Entries are plain data; a panic mid-update cannot leave them torn.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_fresh(&self, entry: &Entry, now: OffsetDateTime) -> bool {
        now - entry.inserted_at <= self.ttl
    }

    /// Park `token` under `key`, replacing an existing entry for the same key.
    pub fn put(&self, key: RotationKey, token: RefreshToken) {
        let now = self.clock.now();
        let mut entries = self.entries();
        entries.retain(|e| e.key != key);
        while entries.len() >= self.capacity {
            if let Some(evicted) = entries.pop_front() {
                tracing::warn!(key = %evicted.key, "Pending rotation buffer full, evicting oldest entry");
            }
        }
        entries.push_back(Entry {
            key,
            token,
            inserted_at: now,
        });
    }

    /// Remove and return the entry for `key` if it has not expired.
    pub fn take(&self, key: &RotationKey) -> Option<RefreshToken> {
        let now = self.clock.now();
        let mut entries = self.entries();
        let index = entries.iter().position(|e| e.key == *key)?;
        let entry = entries.remove(index)?;
        self.is_fresh(&entry, now).then_some(entry.token)
    }

    /// Remove and return the most recently parked unexpired entry.
    pub fn take_fresh_entry(&self) -> Option<(RotationKey, RefreshToken)> {
        let now = self.clock.now();
        let mut entries = self.entries();
        let index = entries.iter().rposition(|e| self.is_fresh(e, now))?;
        let entry = entries.remove(index)?;
        Some((entry.key, entry.token))
    }

    pub fn remove(&self, key: &RotationKey) {
        self.entries().retain(|e| e.key != *key);
    }

    /// Drop entries older than the TTL as of `now`. Returns how many were removed.
    pub fn sweep(&self, now: OffsetDateTime) -> usize {
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|e| self.is_fresh(e, now));
        before - entries.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

/// Run [`PendingRotations::sweep`] every `period`.
///
/// The task holds only a weak reference and exits once the last owner of
/// `buffer` is dropped.
pub fn spawn_sweeper(
    buffer: &Arc<PendingRotations>,
    period: std::time::Duration,
) -> tokio::task::JoinHandle<()> {
    let buffer = Arc::downgrade(buffer);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let Some(buffer) = buffer.upgrade() else {
                tracing::debug!("Pending rotation buffer dropped, stopping sweeper");
                return;
            };
            let removed = buffer.sweep(buffer.clock.now());
            if removed > 0 {
                tracing::debug!(removed, "Swept expired pending rotations");
            }
        }
    })
}
