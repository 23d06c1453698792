//! Error types for manifest parsing and module resolution.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while resolving a manifest.
#[derive(Debug, Error)]
pub enum ResolutionError {
    /// The manifest lists no modules.
    #[error("manifest contains no wasm sources")]
    EmptyManifest,

    /// The resolved bytes do not match the declared hash.
    #[error("module hash mismatch: expected {expected}, got {actual}")]
    HashMismatch {
        /// Declared hash.
        expected: String,
        /// Hash of the resolved bytes.
        actual: String,
    },

    /// A hash is required but the source declares none.
    #[error("module {module} declares no hash but hashes are required")]
    HashRequired {
        /// Description of the source.
        module: String,
    },

    /// The declared hash string could not be parsed.
    #[error("invalid content hash {hash:?}: {message}")]
    InvalidHash {
        /// The declared hash.
        hash: String,
        /// What is wrong with it.
        message: String,
    },

    /// The source URL could not be parsed.
    #[error("invalid module URL {url:?}: {message}")]
    InvalidUrl {
        /// The declared URL.
        url: String,
        /// Parser message.
        message: String,
    },

    /// No transport is configured, or the fetch failed.
    #[error("failed to fetch {url}: {message}")]
    TransportFailure {
        /// Requested URL.
        url: String,
        /// Transport message.
        message: String,
    },

    /// A local module file could not be read.
    #[error("failed to read module file {path}: {source}")]
    Io {
        /// File path after joining with the base directory.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The manifest document could not be parsed.
    #[error("failed to parse manifest: {0}")]
    Parse(String),
}

/// Result type for manifest operations.
pub type ResolutionResult<T> = Result<T, ResolutionError>;

/// Failure reported by a [`Transport`](crate::Transport).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TransportError {
    message: String,
}

impl TransportError {
    /// Create a transport error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}
