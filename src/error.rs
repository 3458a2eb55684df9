//! Failure taxonomy shared by the registry, the fetchers and the cache.

use thiserror::Error;

/// Why a station/source pair produced no reading.
///
/// The type is `Clone` so one in-flight fetch can hand the same outcome to
/// every caller waiting on it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("upstream call timed out")]
    FetchTimeout,

    #[error("upstream returned HTTP {0}")]
    HttpError(u16),

    #[error("could not parse upstream payload: {0}")]
    ParseError(String),

    #[error("upstream returned no usable rows")]
    Empty,

    #[error("station not found: {0}")]
    NotFound(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::FetchTimeout
        } else if let Some(status) = err.status() {
            Error::HttpError(status.as_u16())
        } else if err.is_decode() {
            Error::ParseError(err.to_string())
        } else {
            Error::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::ParseError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
