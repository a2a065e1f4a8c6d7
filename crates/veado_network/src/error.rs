//! Network error types.

use std::path::PathBuf;

/// Errors that can occur in the veado_network crate.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// Discovery subsystem error.
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// The discovery directory does not look like a peer instances directory.
    #[error("Refusing to watch {0}: not an instances directory")]
    InvalidWatchDir(PathBuf),

    /// A peer descriptor file could not be interpreted.
    #[error("Bad descriptor: {0}")]
    Descriptor(String),

    /// JSON serialization / deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
