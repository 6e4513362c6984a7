//! CA bootstrap: make sure the CA and API server identities exist on disk.
//!
//! Four artifacts are checked in order, each independently:
//!
//! ```text
//! CA key ──► CA cert (self-signed) ──► server key ──► server cert (CA-signed)
//! ```
//!
//! A present file is loaded as-is, a missing one is generated and persisted.
//! Running against a complete set is a no-op, and a partial set resumes at
//! the first missing artifact without touching the existing ones.

use serde::Serialize;
use std::fmt;
use std::path::Path;
use tracing::{info, warn};

use crate::material::{Certificate, KeyPair};
use crate::{CertificateEngine, KeyMaterialStore, PkiConfig, Result};

/// The deployment's certificate authority.
#[derive(Debug)]
pub struct CaIdentity {
    key: KeyPair,
    certificate: Certificate,
}

impl CaIdentity {
    /// Pair an existing CA key and certificate.
    pub const fn new(key: KeyPair, certificate: Certificate) -> Self {
        Self { key, certificate }
    }

    /// CA private key.
    pub const fn key(&self) -> &KeyPair {
        &self.key
    }

    /// Self-signed CA certificate.
    pub const fn certificate(&self) -> &Certificate {
        &self.certificate
    }
}

/// The API endpoint's own CA-signed identity.
#[derive(Debug)]
pub struct ServerIdentity {
    key: KeyPair,
    certificate: Certificate,
}

impl ServerIdentity {
    /// Server private key.
    pub const fn key(&self) -> &KeyPair {
        &self.key
    }

    /// Server certificate.
    pub const fn certificate(&self) -> &Certificate {
        &self.certificate
    }
}

/// One of the four bootstrap artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Artifact {
    CaKey,
    CaCert,
    ServerKey,
    ServerCert,
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::CaKey => "CA key",
            Self::CaCert => "CA cert",
            Self::ServerKey => "server key",
            Self::ServerCert => "server cert",
        })
    }
}

/// What bootstrap did with an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactState {
    /// Missing on disk, created by this run.
    Generated,
    /// Already on disk, loaded unchanged.
    Reused,
}

/// Per-artifact outcome of a bootstrap run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BootstrapReport {
    pub ca_key: ArtifactState,
    pub ca_cert: ArtifactState,
    pub server_key: ArtifactState,
    pub server_cert: ArtifactState,
}

impl BootstrapReport {
    /// Artifacts created by this run.
    pub fn generated(&self) -> Vec<Artifact> {
        [
            (Artifact::CaKey, self.ca_key),
            (Artifact::CaCert, self.ca_cert),
            (Artifact::ServerKey, self.server_key),
            (Artifact::ServerCert, self.server_cert),
        ]
        .into_iter()
        .filter(|(_, state)| *state == ArtifactState::Generated)
        .map(|(artifact, _)| artifact)
        .collect()
    }
}

/// Result of a successful bootstrap.
#[derive(Debug)]
pub struct Bootstrapped {
    pub ca: CaIdentity,
    pub server: ServerIdentity,
    pub report: BootstrapReport,
}

/// Ensures CA and server material exist, generating what is missing.
#[derive(Debug)]
pub struct CaBootstrapper<'a> {
    config: &'a PkiConfig,
    engine: &'a CertificateEngine,
    store: KeyMaterialStore,
}

impl<'a> CaBootstrapper<'a> {
    pub const fn new(config: &'a PkiConfig, engine: &'a CertificateEngine) -> Self {
        Self {
            config,
            engine,
            store: KeyMaterialStore::new(),
        }
    }

    /// Run all four steps, CA first.
    ///
    /// Any error is fatal for the caller: the service must not start
    /// serving with incomplete key material.
    pub fn run(&self) -> Result<Bootstrapped> {
        self.config.validate()?;

        let (ca_key, ca_key_state) = self.ensure_key(Artifact::CaKey, &self.config.ca_key_path)?;
        let (ca_cert, ca_cert_state) = self.ensure_ca_cert(&ca_key)?;
        let (server_key, server_key_state) =
            self.ensure_key(Artifact::ServerKey, &self.config.server_key_path)?;
        let (server_cert, server_cert_state) =
            self.ensure_server_cert(&server_key, &ca_key, &ca_cert)?;

        let report = BootstrapReport {
            ca_key: ca_key_state,
            ca_cert: ca_cert_state,
            server_key: server_key_state,
            server_cert: server_cert_state,
        };

        Ok(Bootstrapped {
            ca: CaIdentity::new(ca_key, ca_cert),
            server: ServerIdentity {
                key: server_key,
                certificate: server_cert,
            },
            report,
        })
    }

    fn ensure_key(&self, artifact: Artifact, path: &Path) -> Result<(KeyPair, ArtifactState)> {
        if self.store.exists(path) {
            info!(path = %path.display(), "using {artifact}");
            return Ok((self.store.read_key(path)?, ArtifactState::Reused));
        }

        info!(path = %path.display(), bits = self.engine.key_bits(), "create new {artifact}");
        let key = self.engine.generate_key_pair()?;
        self.store.write_key(path, &key)?;
        Ok((key, ArtifactState::Generated))
    }

    fn ensure_ca_cert(&self, ca_key: &KeyPair) -> Result<(Certificate, ArtifactState)> {
        let path = &self.config.ca_cert_path;
        if self.store.exists(path) {
            info!(path = %path.display(), "using {}", Artifact::CaCert);
            let cert = self.store.read_certificate(path)?;
            if !cert.matches_key(ca_key)? {
                warn!(path = %path.display(), "CA cert does not belong to the configured CA key");
            }
            return Ok((cert, ArtifactState::Reused));
        }

        info!(
            path = %path.display(),
            cn = %self.config.ca_common_name,
            days = self.config.validity_days_root,
            "create new {}",
            Artifact::CaCert
        );
        let cert = self.engine.generate_self_signed_root(
            ca_key,
            &self.config.ca_common_name,
            self.config.validity_days_root,
        )?;
        self.store.write_certificate(path, &cert)?;
        Ok((cert, ArtifactState::Generated))
    }

    fn ensure_server_cert(
        &self,
        server_key: &KeyPair,
        ca_key: &KeyPair,
        ca_cert: &Certificate,
    ) -> Result<(Certificate, ArtifactState)> {
        let path = &self.config.server_cert_path;
        if self.store.exists(path) {
            info!(path = %path.display(), "using {}", Artifact::ServerCert);
            return Ok((self.store.read_certificate(path)?, ArtifactState::Reused));
        }

        info!(
            path = %path.display(),
            cn = %self.config.server_common_name,
            days = self.config.validity_days_leaf,
            "create new {}",
            Artifact::ServerCert
        );
        let csr = self
            .engine
            .generate_csr(server_key, &self.config.server_common_name)?;
        let cert =
            self.engine
                .sign_certificate(&csr, ca_key, ca_cert, self.config.validity_days_leaf)?;
        self.store.write_certificate(path, &cert)?;
        Ok((cert, ArtifactState::Generated))
    }
}
