use crate::services::identifier::IdKind;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("file type `{0}` is not permitted")]
    RejectedExtension(String),
    #[error("invalid upload: {0}")]
    InvalidUpload(String),
    #[error("{0} identifier already in use")]
    DuplicateIdentifier(IdKind),
    #[error("no free {kind} identifier after {attempts} attempts")]
    IdentifierSpaceExhausted { kind: IdKind, attempts: usize },
    #[error("`{0}` not found")]
    NotFound(String),
    #[error("stored file `{0}` already exists")]
    StoredFileExists(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type ImageResult<T> = Result<T, ImageError>;
