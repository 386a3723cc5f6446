use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Request failed: {0}")]
    Middleware(#[from] reqwest_middleware::Error),

    #[error("Run request failed with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to obtain token: {0}")]
    Auth(String),

    #[error("Invalid header {0}")]
    InvalidHeader(String),
}
