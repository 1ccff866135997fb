use std::io;
use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage quota exceeded writing {key}: needs {required} units, {available} available")]
    Full {
        key: String,
        required: u64,
        available: u64,
    },
    #[error("storage backend failure: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("post title is required")]
    EmptyTitle,
    #[error("URL is required")]
    EmptyUrl,
    #[error("image is {size} bytes, the limit is {limit} bytes")]
    ImageTooLarge { size: u64, limit: u64 },
    #[error("{0} is not an image file")]
    NotAnImage(String),
}

#[derive(Debug, Error)]
pub enum BlogError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Storage(#[from] StoreError),
    #[error("post index {index} is out of range for {len} posts")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("no post with id {0}")]
    PostNotFound(Uuid),
    #[error("stored value under {key} is malformed")]
    Decode {
        key: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("reading image {}", path.display())]
    ImageRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl BlogError {
    pub fn is_storage_full(&self) -> bool {
        matches!(self, BlogError::Storage(StoreError::Full { .. }))
    }

    pub fn user_hint(&self) -> Option<&'static str> {
        match self {
            BlogError::Storage(StoreError::Full { .. }) => {
                Some("storage is full: use smaller images or delete old posts")
            }
            BlogError::Storage(StoreError::Backend(_)) => {
                Some("storage is unavailable: retry, or free space by deleting old posts")
            }
            BlogError::Validation(ValidationError::ImageTooLarge { .. }) => {
                Some("choose an image under the size limit")
            }
            _ => None,
        }
    }
}

pub type BlogResult<T> = Result<T, BlogError>;
