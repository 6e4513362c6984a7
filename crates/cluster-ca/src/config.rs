//! PKI configuration: where the CA and server artifacts live and how long
//! issued certificates stay valid.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::{CaError, Result};

/// Paths and validity settings for the deployment's key material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PkiConfig {
    /// CA private key (default: /data/ca-key.pem).
    #[serde(default = "default_ca_key_path")]
    pub ca_key_path: PathBuf,

    /// Self-signed CA certificate (default: /data/ca-cert.pem).
    #[serde(default = "default_ca_cert_path")]
    pub ca_cert_path: PathBuf,

    /// API server private key (default: /data/server-key.pem).
    #[serde(default = "default_server_key_path")]
    pub server_key_path: PathBuf,

    /// CA-signed API server certificate (default: /data/server-cert.pem).
    #[serde(default = "default_server_cert_path")]
    pub server_cert_path: PathBuf,

    /// Validity of leaf certificates in days (server and clients).
    #[serde(default = "default_validity_days_leaf")]
    pub validity_days_leaf: u32,

    /// Validity of the CA root in days.
    #[serde(default = "default_validity_days_root")]
    pub validity_days_root: u32,

    /// Subject CN of the CA root.
    #[serde(default = "default_ca_common_name")]
    pub ca_common_name: String,

    /// Subject CN of the API server certificate.
    #[serde(default = "default_server_common_name")]
    pub server_common_name: String,
}

impl Default for PkiConfig {
    fn default() -> Self {
        Self {
            ca_key_path: default_ca_key_path(),
            ca_cert_path: default_ca_cert_path(),
            server_key_path: default_server_key_path(),
            server_cert_path: default_server_cert_path(),
            validity_days_leaf: default_validity_days_leaf(),
            validity_days_root: default_validity_days_root(),
            ca_common_name: default_ca_common_name(),
            server_common_name: default_server_common_name(),
        }
    }
}

impl PkiConfig {
    /// Place all four artifacts under `dir` using the default file names.
    pub fn rooted_at(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            ca_key_path: dir.join("ca-key.pem"),
            ca_cert_path: dir.join("ca-cert.pem"),
            server_key_path: dir.join("server-key.pem"),
            server_cert_path: dir.join("server-cert.pem"),
            ..Self::default()
        }
    }

    /// Check that validity periods are non-zero and every artifact has its own path.
    pub fn validate(&self) -> Result<()> {
        if self.validity_days_leaf == 0 || self.validity_days_root == 0 {
            return Err(CaError::Config("validity days must be non-zero".into()));
        }
        if self.ca_common_name.trim().is_empty() || self.server_common_name.trim().is_empty() {
            return Err(CaError::Config("common names must not be empty".into()));
        }

        let paths = [
            &self.ca_key_path,
            &self.ca_cert_path,
            &self.server_key_path,
            &self.server_cert_path,
        ];
        for (i, a) in paths.iter().enumerate() {
            if paths[i + 1..].contains(a) {
                return Err(CaError::Config(format!(
                    "artifact path {} is configured twice",
                    a.display()
                )));
            }
        }
        Ok(())
    }
}

/// Directory holding all durable key material by default.
pub const DEFAULT_DATA_DIR: &str = "/data";

// Default value functions for serde.
fn default_ca_key_path() -> PathBuf {
    PathBuf::from(DEFAULT_DATA_DIR).join("ca-key.pem")
}

fn default_ca_cert_path() -> PathBuf {
    PathBuf::from(DEFAULT_DATA_DIR).join("ca-cert.pem")
}

fn default_server_key_path() -> PathBuf {
    PathBuf::from(DEFAULT_DATA_DIR).join("server-key.pem")
}

fn default_server_cert_path() -> PathBuf {
    PathBuf::from(DEFAULT_DATA_DIR).join("server-cert.pem")
}

const fn default_validity_days_leaf() -> u32 {
    365
}

const fn default_validity_days_root() -> u32 {
    3650
}

fn default_ca_common_name() -> String {
    String::from("selfsigned-app-ca")
}

fn default_server_common_name() -> String {
    String::from("cluster-api-server-selfsigned")
}
