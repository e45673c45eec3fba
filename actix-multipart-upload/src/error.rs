use actix_web::{http::StatusCode, ResponseError};
use thiserror::Error;

/// Error raised while setting up the middleware or a storage engine.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("A storage engine must be provided (set MULTIPART_STORAGE to `memory` or `disk`)")]
    MissingStorage,
    #[error("Unknown storage engine: {0}")]
    UnknownStorage(String),
    #[error("Disk storage needs exactly one of a destination or a destination generator")]
    Destination,
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

/// Error type for a single multipart request.
#[derive(Error, Debug)]
pub enum MultipartError {
    #[error("Malformed multipart body: {0}")]
    Parse(actix_multipart::MultipartError),
    #[error("File for field ({field}) was too large (max size: {limit} bytes)")]
    FileTooLarge { field: String, limit: usize },
    #[error("Value for field ({field}) was too large (max size: {limit} bytes)")]
    FieldTooLarge { field: String, limit: usize },
    #[error("Too many files (max: {limit})")]
    TooManyFiles { limit: usize },
    #[error("Could not write uploaded file: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Multipart body ended before it was fully read")]
    Incomplete,
    #[error("Request was not processed by the multipart middleware")]
    NotCollected,
    #[error("Error while parsing field: {0}")]
    ParseError(serde_json::Error),
}

impl MultipartError {
    /// Wrap an arbitrary error raised by a custom [`StorageEngine`](crate::StorageEngine).
    pub fn storage<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        MultipartError::Storage(err.into())
    }
}

impl ResponseError for MultipartError {
    fn status_code(&self) -> StatusCode {
        match self {
            MultipartError::Io(_) | MultipartError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            _ => StatusCode::BAD_REQUEST,
        }
    }
}
