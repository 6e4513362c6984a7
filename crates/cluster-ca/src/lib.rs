//! # cluster-ca
//!
//! Minimal certificate authority for mTLS cluster enrollment.
//!
//! ## Architecture
//!
//! ```text
//! CA root (self-signed, RSA-4096, 10 years, on disk)
//!        │
//!        ├── API server certificate (CA-signed, on disk)
//!        └── node client certificates (CA-signed, handed to the node, never stored)
//! ```
//!
//! ## Security Model
//!
//! - The CA identity is created once on first boot and never rotated
//! - Client private keys exist only in memory for the duration of a join
//! - A node is identified by the SHA-1 fingerprint of its certificate
//!
//! ## Example
//!
//! ```rust,ignore
//! use cluster_ca::{CaBootstrapper, CertificateEngine, PkiConfig};
//!
//! let config = PkiConfig::default();
//! let engine = CertificateEngine::new();
//! let pki = CaBootstrapper::new(&config, &engine).run()?;
//!
//! let key = engine.generate_key_pair()?;
//! let csr = engine.generate_csr(&key, "node-uuid")?;
//! let cert = engine.sign_certificate(&csr, pki.ca.key(), pki.ca.certificate(), 365)?;
//! let fingerprint = engine.fingerprint_of(&cert);
//! ```

mod bootstrap;
mod config;
mod engine;
mod error;
mod material;
mod store;

pub use bootstrap::{
    Artifact, ArtifactState, BootstrapReport, Bootstrapped, CaBootstrapper, CaIdentity,
    ServerIdentity,
};
pub use config::{PkiConfig, DEFAULT_DATA_DIR};
pub use engine::{CertificateEngine, DEFAULT_KEY_BITS};
pub use error::{CaError, Result};
pub use material::{Certificate, Csr, Fingerprint, KeyPair};
pub use store::KeyMaterialStore;
