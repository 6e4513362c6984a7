//! Server configuration for the cluster API.

use cluster_ca::PkiConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::SrvError;

/// Configuration for a cluster API instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address (default: 0.0.0.0:3000).
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// MySQL connection string. Without it nodes are kept in memory.
    #[serde(default)]
    pub database_url: Option<String>,

    /// Headers set by the TLS-terminating reverse proxy.
    #[serde(default)]
    pub headers: TlsHeaderConfig,

    /// CA and server key material.
    #[serde(default)]
    pub pki: PkiConfig,
}

/// Names of the headers the reverse proxy uses to pass mTLS results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsHeaderConfig {
    /// Verification outcome; `SUCCESS` means the client certificate chained to our CA.
    #[serde(default = "default_verify_header")]
    pub verify_header: String,

    /// SHA-1 fingerprint of the presented client certificate.
    #[serde(default = "default_fingerprint_header")]
    pub fingerprint_header: String,

    /// Subject DN of the presented client certificate.
    #[serde(default = "default_subject_dn_header")]
    pub subject_dn_header: String,

    /// Client address chain as seen by the proxy.
    #[serde(default = "default_forwarded_for_header")]
    pub forwarded_for_header: String,

    /// Prefix of the headers echoed back by `/info`.
    #[serde(default = "default_metadata_prefix")]
    pub metadata_prefix: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            database_url: None,
            headers: TlsHeaderConfig::default(),
            pki: PkiConfig::default(),
        }
    }
}

impl Default for TlsHeaderConfig {
    fn default() -> Self {
        Self {
            verify_header: default_verify_header(),
            fingerprint_header: default_fingerprint_header(),
            subject_dn_header: default_subject_dn_header(),
            forwarded_for_header: default_forwarded_for_header(),
            metadata_prefix: default_metadata_prefix(),
        }
    }
}

/// Environment variables that override file settings.
pub mod env {
    pub const CA_KEY: &str = "PATH_CA_KEY";
    pub const CA_CERT: &str = "PATH_CA_CERT";
    pub const SERVER_KEY: &str = "PATH_SERVER_KEY";
    pub const SERVER_CERT: &str = "PATH_SERVER_CERT";
    pub const LISTEN: &str = "CLUSTER_API_LISTEN";
    pub const DATABASE_URL: &str = "DATABASE_URL";
}

impl ServerConfig {
    /// Load config from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> crate::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content).map_err(|e| SrvError::Config(e.to_string()))
        } else {
            Ok(Self::default())
        }
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> crate::Result<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from `lookup`, which maps a variable name to its value.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> crate::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = non_empty(env::CA_KEY) {
            self.pki.ca_key_path = PathBuf::from(v);
        }
        if let Some(v) = non_empty(env::CA_CERT) {
            self.pki.ca_cert_path = PathBuf::from(v);
        }
        if let Some(v) = non_empty(env::SERVER_KEY) {
            self.pki.server_key_path = PathBuf::from(v);
        }
        if let Some(v) = non_empty(env::SERVER_CERT) {
            self.pki.server_cert_path = PathBuf::from(v);
        }
        if let Some(v) = non_empty(env::LISTEN) {
            self.listen = v
                .trim()
                .parse()
                .map_err(|e| SrvError::Config(format!("{}={v}: {e}", env::LISTEN)))?;
        }
        if let Some(v) = non_empty(env::DATABASE_URL) {
            self.database_url = Some(v);
        }
        Ok(())
    }

    /// Check settings that serde can't.
    pub fn validate(&self) -> crate::Result<()> {
        self.pki
            .validate()
            .map_err(|e| SrvError::Config(e.to_string()))?;

        let h = &self.headers;
        for name in [
            &h.verify_header,
            &h.fingerprint_header,
            &h.subject_dn_header,
            &h.forwarded_for_header,
        ] {
            if axum::http::HeaderName::from_bytes(name.as_bytes()).is_err() {
                return Err(SrvError::Config(format!("invalid header name '{name}'")));
            }
        }
        if h.metadata_prefix.is_empty() {
            return Err(SrvError::Config("metadata prefix must not be empty".into()));
        }
        Ok(())
    }
}

// Default value functions for serde.
fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 3000))
}

fn default_verify_header() -> String {
    String::from("ssl-client-verify")
}

fn default_fingerprint_header() -> String {
    String::from("ssl-client-fingerprint")
}

fn default_subject_dn_header() -> String {
    String::from("ssl-client-sdn")
}

fn default_forwarded_for_header() -> String {
    String::from("x-forwarded-for")
}

fn default_metadata_prefix() -> String {
    String::from("ssl-")
}
