#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("upstream {operation} failed (status {status:?}): {detail}")]
    Upstream {
        operation: &'static str,
        status: Option<u16>,
        detail: String,
    },
    #[cfg(feature = "client")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid national code: {0:?}")]
    InvalidNationalCode(String),
    #[error("upstream URL error: {0}")]
    Url(#[from] url::ParseError),
}

/// Failure to persist or read the refresh token.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum StoreError {
    /// The token cannot be represented as a cookie value.
    #[error("refresh token is not a valid cookie value")]
    InvalidValue,
    #[error("refresh token store unavailable: {0}")]
    Unavailable(String),
}
