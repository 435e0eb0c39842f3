// rust/patch-loader/src/error.rs

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoaderError {

    #[error("Store error: {message}")]
    Store {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Split {split} exhausted after {num_batches} batches; rewind before loading again")]
    CursorExhausted {
        split: usize,
        num_batches: usize,
    },

    #[error("Split {split} out of range (total splits: {num_splits})")]
    InvalidSplit {
        split: usize,
        num_splits: usize,
    },

    #[error("Snapshot error at '{path}': {message}")]
    Snapshot {
        path: PathBuf,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Decode error: {message}")]
    Decode {
        message: String,
    },
}

pub type Result<T> = std::result::Result<T, LoaderError>;

// Convenience constructors
impl LoaderError {

    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
            source: None,
        }
    }

    pub fn store_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Store {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    pub fn config_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn cursor_exhausted(split: usize, num_batches: usize) -> Self {
        Self::CursorExhausted { split, num_batches }
    }

    pub fn invalid_split(split: usize, num_splits: usize) -> Self {
        Self::InvalidSplit { split, num_splits }
    }

    pub fn snapshot(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Snapshot {
            path: path.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn snapshot_with_source(
        path: impl Into<PathBuf>,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Snapshot {
            path: path.into(),
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Returns true for failures reported by the backing store.
    pub fn is_store(&self) -> bool {
        matches!(self, Self::Store { .. })
    }
}
