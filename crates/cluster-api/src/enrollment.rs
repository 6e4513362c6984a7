//! Node enrollment ("join").
//!
//! Every join mints a new identity: a random UUID that becomes both the
//! directory key and the certificate CN, a fresh RSA key, and a CA-signed
//! certificate. The private key is returned to the caller and never
//! persisted. Its PEM lives in a [`KeyPair`] whose buffer is wiped on drop,
//! so every exit path discards it. Signing the CSR briefly needs an rcgen
//! copy of the key that is freed but not wiped; it never outlives the
//! blocking issuance task.

use cluster_ca::{CaError, CaIdentity, Certificate, CertificateEngine, Fingerprint, KeyPair};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::directory::{DirectoryError, NewNode, NodeDirectory, NodeId};

/// Display names longer than this are truncated.
pub const MAX_NAME_LEN: usize = 255;

/// Why a join did not produce an identity.
#[derive(Error, Debug)]
pub enum EnrollmentError {
    /// The directory refused or failed the write, or returned an invalid id.
    /// Reported to the caller as a business failure.
    #[error("unable to create node: {0}")]
    Failed(#[from] DirectoryError),

    /// Key generation or signing failed.
    #[error("certificate issuance failed: {0}")]
    Crypto(#[from] CaError),

    /// The blocking issuance task panicked or was cancelled.
    #[error("issuance task failed: {0}")]
    Task(String),
}

/// A freshly issued node identity.
#[derive(Debug)]
pub struct Enrollment {
    /// Directory-assigned id.
    pub node_id: NodeId,
    /// Minted identifier, also the certificate CN.
    pub identifier: Uuid,
    /// CA-signed client certificate.
    pub certificate: Certificate,
    /// Fingerprint recorded in the directory.
    pub fingerprint: Fingerprint,
    key: KeyPair,
}

impl Enrollment {
    /// The node's private key. Only the node keeps a copy after the response.
    pub const fn key(&self) -> &KeyPair {
        &self.key
    }
}

/// Issues client identities and records them in the directory.
#[derive(Debug, Clone)]
pub struct EnrollmentService {
    engine: CertificateEngine,
    ca: Arc<CaIdentity>,
    directory: Arc<dyn NodeDirectory>,
    validity_days: u32,
}

impl EnrollmentService {
    pub fn new(
        engine: CertificateEngine,
        ca: Arc<CaIdentity>,
        directory: Arc<dyn NodeDirectory>,
        validity_days: u32,
    ) -> Self {
        Self {
            engine,
            ca,
            directory,
            validity_days,
        }
    }

    /// The CA that signs enrolled nodes.
    pub fn ca(&self) -> &CaIdentity {
        &self.ca
    }

    /// Enroll a new node.
    ///
    /// `display_name` and `source_address` are stored for operators only;
    /// neither takes part in authentication. Not idempotent: each call
    /// creates a distinct node.
    pub async fn join(
        &self,
        display_name: Option<&str>,
        source_address: Option<&str>,
    ) -> Result<Enrollment, EnrollmentError> {
        let identifier = Uuid::new_v4();

        let engine = self.engine;
        let ca = Arc::clone(&self.ca);
        let validity_days = self.validity_days;
        let (key, certificate) = tokio::task::spawn_blocking(move || {
            issue_client_identity(&engine, &ca, identifier, validity_days)
        })
        .await
        .map_err(|e| EnrollmentError::Task(e.to_string()))??;

        let fingerprint = self.engine.fingerprint_of(&certificate);
        let node = NewNode {
            identifier,
            name: display_name.map(truncate_name),
            source_address: source_address.map(str::to_string),
            fingerprint: fingerprint.clone(),
        };

        let node_id = match self.directory.create_node_with_cert(node).await {
            Ok(id) if id.is_valid() => id,
            Ok(id) => {
                warn!(
                    identifier = %identifier,
                    node_id = %id,
                    "directory returned invalid node id"
                );
                return Err(DirectoryError::InvalidNodeId(id.get()).into());
            }
            Err(e) => {
                warn!(identifier = %identifier, error = %e, "unable to create node");
                return Err(e.into());
            }
        };

        info!(
            identifier = %identifier,
            node_id = %node_id,
            fingerprint = %fingerprint,
            name = ?display_name,
            "enrolled node"
        );

        Ok(Enrollment {
            node_id,
            identifier,
            certificate,
            fingerprint,
            key,
        })
    }
}

fn issue_client_identity(
    engine: &CertificateEngine,
    ca: &CaIdentity,
    identifier: Uuid,
    validity_days: u32,
) -> cluster_ca::Result<(KeyPair, Certificate)> {
    let key = engine.generate_key_pair()?;
    let csr = engine.generate_csr(&key, &identifier.to_string())?;
    let cert = engine.sign_certificate(&csr, ca.key(), ca.certificate(), validity_days)?;
    Ok((key, cert))
}

fn truncate_name(name: &str) -> String {
    name.chars().take(MAX_NAME_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{MemoryDirectory, NodeRecord, RecordStatus};
    use async_trait::async_trait;
    use std::collections::HashSet;

    /// Directory whose writes always fail.
    #[derive(Debug, Default)]
    struct FailingDirectory;

    #[async_trait]
    impl NodeDirectory for FailingDirectory {
        async fn create_node_with_cert(&self, _: NewNode) -> Result<NodeId, DirectoryError> {
            Err(DirectoryError::Database("connection reset".into()))
        }
        async fn find_active_record(
            &self,
            _: &Uuid,
            _: &Fingerprint,
        ) -> Result<bool, DirectoryError> {
            Ok(false)
        }
        async fn get_node(&self, _: NodeId) -> Result<Option<NodeRecord>, DirectoryError> {
            Ok(None)
        }
        async fn set_node_status(&self, _: NodeId, _: RecordStatus) -> Result<(), DirectoryError> {
            Ok(())
        }
        async fn set_cert_status(
            &self,
            _: NodeId,
            _: &Fingerprint,
            _: RecordStatus,
        ) -> Result<(), DirectoryError> {
            Ok(())
        }
    }

    /// Directory that accepts writes but hands back id 0.
    #[derive(Debug, Default)]
    struct ZeroIdDirectory(MemoryDirectory);

    #[async_trait]
    impl NodeDirectory for ZeroIdDirectory {
        async fn create_node_with_cert(&self, _: NewNode) -> Result<NodeId, DirectoryError> {
            Ok(NodeId::new(0))
        }
        async fn find_active_record(
            &self,
            i: &Uuid,
            f: &Fingerprint,
        ) -> Result<bool, DirectoryError> {
            self.0.find_active_record(i, f).await
        }
        async fn get_node(&self, id: NodeId) -> Result<Option<NodeRecord>, DirectoryError> {
            self.0.get_node(id).await
        }
        async fn set_node_status(&self, id: NodeId, s: RecordStatus) -> Result<(), DirectoryError> {
            self.0.set_node_status(id, s).await
        }
        async fn set_cert_status(
            &self,
            id: NodeId,
            f: &Fingerprint,
            s: RecordStatus,
        ) -> Result<(), DirectoryError> {
            self.0.set_cert_status(id, f, s).await
        }
    }

    fn test_ca(engine: &CertificateEngine) -> Arc<CaIdentity> {
        let key = engine.generate_key_pair().unwrap();
        let cert = engine
            .generate_self_signed_root(&key, "test-ca", 3650)
            .unwrap();
        Arc::new(CaIdentity::new(key, cert))
    }

    fn service(directory: Arc<dyn NodeDirectory>) -> EnrollmentService {
        let engine = CertificateEngine::with_key_bits(2048);
        EnrollmentService::new(engine, test_ca(&engine), directory, 365)
    }

    #[tokio::test]
    async fn test_join_records_certificate_fingerprint() {
        let directory = Arc::new(MemoryDirectory::new());
        let service = service(directory.clone());

        let enrollment = service
            .join(Some("web-1"), Some("10.1.2.3"))
            .await
            .unwrap();

        let record = directory
            .get_node(enrollment.node_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.identifier, enrollment.identifier);
        assert_eq!(record.name.as_deref(), Some("web-1"));
        assert_eq!(record.source_address.as_deref(), Some("10.1.2.3"));
        assert_eq!(record.certificates.len(), 1);
        assert_eq!(
            record.certificates[0].fingerprint,
            enrollment.certificate.fingerprint()
        );
        assert_eq!(enrollment.fingerprint, enrollment.certificate.fingerprint());
    }

    #[tokio::test]
    async fn test_join_certificate_names_identifier_and_chains_to_ca() {
        let directory = Arc::new(MemoryDirectory::new());
        let service = service(directory);

        let enrollment = service.join(None, None).await.unwrap();

        assert_eq!(
            enrollment.certificate.common_name().unwrap(),
            enrollment.identifier.to_string()
        );
        assert!(enrollment
            .certificate
            .verify_issued_by(service.ca().certificate())
            .unwrap());
        assert!(enrollment.certificate.matches_key(enrollment.key()).unwrap());
    }

    #[tokio::test]
    async fn test_directory_failure_is_business_failure() {
        let service = service(Arc::new(FailingDirectory));

        let err = service.join(Some("web-1"), None).await.unwrap_err();

        assert!(matches!(
            err,
            EnrollmentError::Failed(DirectoryError::Database(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_node_id_is_business_failure() {
        let directory = Arc::new(ZeroIdDirectory::default());
        let service = service(directory.clone());

        let err = service.join(Some("web-1"), None).await.unwrap_err();

        assert!(matches!(
            err,
            EnrollmentError::Failed(DirectoryError::InvalidNodeId(0))
        ));
        assert!(directory.0.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_joins_are_distinct() {
        let directory = Arc::new(MemoryDirectory::new());
        let service = service(directory.clone());

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..6 {
            let service = service.clone();
            tasks.spawn(async move { service.join(Some(&format!("node-{i}")), None).await });
        }

        let mut ids = HashSet::new();
        let mut identifiers = HashSet::new();
        let mut fingerprints = HashSet::new();
        while let Some(joined) = tasks.join_next().await {
            let enrollment = joined.unwrap().unwrap();
            ids.insert(enrollment.node_id);
            identifiers.insert(enrollment.identifier);
            fingerprints.insert(enrollment.fingerprint.clone());
        }

        assert_eq!(ids.len(), 6);
        assert_eq!(identifiers.len(), 6);
        assert_eq!(fingerprints.len(), 6);
        assert_eq!(directory.len(), 6);
        assert_eq!(directory.cert_count(), 6);
    }

    #[test]
    fn test_truncate_name() {
        let long = "é".repeat(MAX_NAME_LEN + 10);
        assert_eq!(truncate_name(&long).chars().count(), MAX_NAME_LEN);
        assert_eq!(truncate_name("web-1"), "web-1");
    }
}
