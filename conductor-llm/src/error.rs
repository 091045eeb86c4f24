use thiserror::Error;

pub type LlmResult<T> = Result<T, LlmError>;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("provider returned malformed JSON: {0}")]
    MalformedJson(String),

    #[error("provider request timed out")]
    Timeout,

    #[error("provider rate limited the request")]
    RateLimited,

    #[error("provider rejected the request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
