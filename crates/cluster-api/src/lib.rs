//! cluster-api: enrollment and authentication service for cluster nodes.
//!
//! Nodes call `POST /join` once to receive a CA-signed client certificate
//! and private key. Afterwards they reach authenticated endpoints through a
//! TLS-terminating reverse proxy that verifies the certificate against the
//! deployment CA and forwards the result as headers.
//!
//! # Architecture
//!
//! ```text
//! startup:  ServerConfig -> CaBootstrapper (blocking barrier) -> listener
//! /join:    EnrollmentService -> CertificateEngine -> NodeDirectory
//! /info:    AuthenticationGuard -> NodeDirectory
//! ```
//!
//! Node records live behind the [`directory::NodeDirectory`] trait: an
//! in-memory backend by default and MySQL with the `mysql` feature.

pub mod auth;
pub mod config;
pub mod directory;
pub mod enrollment;
pub mod error;
pub mod http;
pub mod server;
pub mod shutdown;

// Re-exports for convenience.
pub use config::ServerConfig;
pub use error::SrvError;

/// Result type for cluster-api operations.
pub type Result<T> = std::result::Result<T, SrvError>;
