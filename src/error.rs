//! Error types for the retrieval evaluator.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our custom error.
pub type Result<T> = std::result::Result<T, EvalError>;

/// Errors that can occur while indexing or evaluating.
///
/// A failed validation is not an error; it is reported through
/// [`crate::validation::ValidationResult`].
#[derive(Error, Debug)]
pub enum EvalError {
    /// Missing or invalid model/vendor configuration. Fatal before any query runs.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An embedding or reranking vendor call failed.
    #[error("{provider} provider error: {message}")]
    Provider { provider: String, message: String },

    /// The vector store is unavailable, corrupted, or was given bad input.
    #[error("Vector store error: {0}")]
    Store(String),

    /// Error reading or writing files.
    #[error("I/O error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error during serialization/deserialization.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// HTTP transport error.
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// Two corpus items share the same id.
    #[error("Duplicate content id {0} in corpus")]
    DuplicateId(u64),

    /// A corpus or query file/directory does not exist.
    #[error("Dataset not found at '{0}'")]
    DatasetNotFound(PathBuf),
}

impl EvalError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a provider error tagged with the provider name.
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Whether this error came from an external embedding/rerank vendor.
    pub fn is_provider(&self) -> bool {
        matches!(self, Self::Provider { .. } | Self::Http(_))
    }
}

impl From<reqwest::Error> for EvalError {
    fn from(err: reqwest::Error) -> Self {
        EvalError::Http(err.to_string())
    }
}

impl From<serde_json::Error> for EvalError {
    fn from(err: serde_json::Error) -> Self {
        EvalError::Serialization(err.to_string())
    }
}
