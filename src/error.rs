use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Request error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("HTTP error! status: {status}, message: {body}")]
    Status { status: u16, body: String },

    #[error("No response body")]
    NoBody,

    /// The backend answered with an envelope whose code is not the success code.
    #[error("Backend rejected request (code {code}): {msg}")]
    Rejected { code: i64, msg: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Decode(err.to_string())
    }
}

impl From<url::ParseError> for ApiError {
    fn from(err: url::ParseError) -> Self {
        ApiError::InvalidUrl(err.to_string())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
