use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store document is not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("feed request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("feed server answered with status {0}")]
    Status(u16),
    #[error("feed could not be parsed: {0}")]
    Parse(String),
    #[error("unsupported feed url: {0}")]
    UnsupportedUrl(String),
}

#[derive(Debug, Error)]
#[error("failed to send message: {0}")]
pub struct SendError(pub String);

/// Completion signal of every command handler.
#[derive(Debug, Error)]
pub enum CalendarError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
}
