//! Error types for CA operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for CA operations.
pub type Result<T> = std::result::Result<T, CaError>;

/// Errors that can occur while generating, signing or persisting key material.
#[derive(Error, Debug)]
pub enum CaError {
    /// RSA key generation failed (entropy or resource exhaustion).
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    /// Building or signing a certificate or CSR failed.
    #[error("signing failed: {0}")]
    Signing(String),

    /// A private key could not be decoded.
    #[error("invalid private key: {0}")]
    InvalidKey(String),

    /// A certificate could not be decoded or inspected.
    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),

    /// A certificate signing request could not be decoded.
    #[error("invalid certificate signing request: {0}")]
    InvalidCsr(String),

    /// PKI configuration is inconsistent.
    #[error("config error: {0}")]
    Config(String),

    /// Reading or writing a key/certificate file failed.
    #[error("io error on {}: {source}", path.display())]
    Io {
        /// File that was being accessed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

impl CaError {
    /// Wrap an I/O error with the path it occurred on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<rcgen::Error> for CaError {
    fn from(err: rcgen::Error) -> Self {
        Self::Signing(err.to_string())
    }
}
