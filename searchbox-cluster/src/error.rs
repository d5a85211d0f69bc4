//! Error types for the cluster client and node discovery

use thiserror::Error;

/// Cluster error types
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    #[error(transparent)]
    Core(#[from] searchbox_core::Error),
}

/// Result type for cluster operations
pub type Result<T> = std::result::Result<T, Error>;
