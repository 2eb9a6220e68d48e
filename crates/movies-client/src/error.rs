use std::sync::Arc;

use reqwest::{Method, StatusCode};
use url::Url;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error, Clone)]
pub enum Error {
    #[error("Token cannot be used as a header value. Must be ASCII.")]
    InvalidHeaderValue,
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("Invalid configuration for `{field}`: {message}")]
    Config { field: String, message: String },
    #[error("Request failed: {0}")]
    Transport(#[from] Arc<reqwest::Error>),
    #[error("{method} {url} failed with status {status}")]
    Status {
        method: Method,
        url: Url,
        status: StatusCode,
        body: String,
    },
    #[error("Failed to serialize request body: {0}")]
    Serialization(String),
    #[error("OIDC discovery failed: {0}")]
    Discovery(String),
    #[error("User info request failed: {0}")]
    UserInfo(String),
    #[error("Request to fetch token failed: {0}")]
    TokenRequestFailed(String),
    #[error("Failed to parse token response: {0}")]
    TokenParseError(String),
    #[error("Token source failed: {0}")]
    TokenSource(String),
}

impl Error {
    pub(crate) fn config(field: &str, message: impl Into<String>) -> Self {
        Self::Config {
            field: field.to_string(),
            message: message.into(),
        }
    }

    /// HTTP status of a rejected request, if this error carries one.
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Transport(e) => e.status(),
            _ => None,
        }
    }

    /// `true` if the remote API answered `404 Not Found`.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(StatusCode::NOT_FOUND)
    }

    /// `true` if the remote API rejected the credentials (`401` or `403`).
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self.status(),
            Some(StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN)
        )
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Self::Transport(Arc::new(value))
    }
}
