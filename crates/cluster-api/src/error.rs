//! Error types for the cluster API server.

use thiserror::Error;

use crate::directory::DirectoryError;

/// Process-level errors: startup, configuration and serving.
#[derive(Error, Debug)]
pub enum SrvError {
    /// CA/server key material could not be loaded or created; the
    /// service must not accept traffic.
    #[error("bootstrap failed: {0}")]
    Bootstrap(#[from] cluster_ca::CaError),

    /// Configuration is invalid or missing required fields.
    #[error("config error: {0}")]
    Config(String),

    /// HTTP server failed to bind or run.
    #[error("server error: {0}")]
    Server(String),

    /// Node directory could not be opened.
    #[error("directory error: {0}")]
    Directory(#[from] DirectoryError),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
