use shared::error::ProtocolError;
use storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{0} is mandatory")]
    MissingArgument(&'static str),
    #[error("invalid url '{url}': {source}")]
    InvalidUrl {
        url: String,
        source: url::ParseError,
    },
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        source: reqwest::Error,
    },
    #[error("{url} answered with status {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
    #[error("server reported {error_type}: {title}")]
    Server {
        error_type: String,
        title: String,
        message: String,
    },
    #[error("invalid response body from {url}: {source}")]
    Decode {
        url: String,
        source: serde_json::Error,
    },
    #[error("failed to encode value: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("no template handler matched the {0}")]
    NoTemplate(&'static str),
    #[error("no view model handler matched model '{0}'")]
    NoViewModel(String),
    #[error("session has no page model")]
    NoPage,
    #[error("session controller is {0}")]
    InvalidState(&'static str),
}

impl SessionError {
    /// Programming errors detected before any I/O took place.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            SessionError::MissingArgument(_)
                | SessionError::InvalidUrl { .. }
                | SessionError::Protocol(_)
                | SessionError::InvalidState(_)
                | SessionError::Storage(StorageError::MissingArgument(_))
        )
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;

pub(crate) fn require<'a>(value: &'a str, name: &'static str) -> Result<&'a str> {
    if value.is_empty() {
        return Err(SessionError::MissingArgument(name));
    }
    Ok(value)
}
