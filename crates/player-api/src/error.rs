use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("http error: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("json error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("base64 decode error: {0}")]
    Base64Error(#[from] base64::DecodeError),
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("invalid proxy: {0}")]
    InvalidProxy(String),
    #[error("other: {0}")]
    Other(String),
}
