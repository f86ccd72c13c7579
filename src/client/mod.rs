use thiserror::Error;

pub mod gamma;
pub mod messages;
pub mod stream;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP status {status}: {body}")]
    HttpStatus {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("malformed market metadata: {0}")]
    Metadata(String),
}

pub type ClientResult<T> = Result<T, ClientError>;
