//! Error types for cluster module

use thiserror::Error;

/// Cluster error types
#[derive(Debug, Error)]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Unexpected status {status} from {url}")]
    UnexpectedStatus { url: String, status: u16 },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Timeout: {0}")]
    Timeout(String),
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        let url = err.url().map_or_else(String::new, ToString::to_string);
        if err.is_timeout() {
            Self::Timeout(url)
        } else if err.is_decode() {
            Self::Serialization(format!("{url}: {err}"))
        } else {
            Self::Http(err.to_string())
        }
    }
}

/// Result type for cluster operations
pub type Result<T> = std::result::Result<T, Error>;
