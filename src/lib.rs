#![doc = include_str!("../README.md")]

pub mod clock;
pub mod error;
#[cfg(feature = "middleware")]
pub mod middleware;
pub mod orchestrator;
pub mod providers;
pub mod rotation;
pub mod state;
pub mod store;
pub mod types;
pub mod upstream;

#[cfg(test)]
mod testing;

// Re-exports for convenient access
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, StoreError};
pub use orchestrator::{Orchestrator, REFRESH_TIMEOUT};
pub use providers::{
    Identity, OtpSettings, Providers, Rejection, SendOtpCredentials, VerifyOtpCredentials,
};
pub use rotation::{PendingRotations, RotationKey, spawn_sweeper};
pub use state::{ACCESS_TOKEN_TTL, SessionProjection, TokenError, TokenState};
pub use store::{MemoryRefreshStore, RefreshTokenStore};
pub use types::{AccessToken, ChallengeId, DeviceInfo, NationalCode, RefreshToken, UserId};
#[cfg(feature = "client")]
pub use upstream::UpstreamClient;
pub use upstream::{AuthUpstream, UpstreamConfig};
