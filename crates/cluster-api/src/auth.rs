//! Authentication of enrolled nodes.
//!
//! mTLS is terminated by a reverse proxy that forwards its verdict, the
//! client certificate fingerprint and the subject DN as request headers.
//! The guard combines those with a directory lookup. It is read-only.
//!
//! The identifier is taken from the subject-DN header as forwarded; it is
//! not cross-checked against the certificate itself. A spoofed header still
//! has to pair with the fingerprint of that node's active certificate.

use cluster_ca::Fingerprint;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::directory::NodeDirectory;

/// The caller is not an authenticated, active node. Carries no detail on
/// purpose; the reason is only logged.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("unauthenticated")]
pub struct Unauthenticated;

/// A node that passed every check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedNode {
    pub identifier: Uuid,
    pub fingerprint: Fingerprint,
}

/// Decides whether a request comes from an active enrolled node.
#[derive(Debug, Clone)]
pub struct AuthenticationGuard {
    directory: Arc<dyn NodeDirectory>,
}

impl AuthenticationGuard {
    pub fn new(directory: Arc<dyn NodeDirectory>) -> Self {
        Self { directory }
    }

    /// Authenticate a caller.
    ///
    /// Succeeds only when the transport verified the client certificate,
    /// both identity and fingerprint are present and well-formed, and the
    /// directory holds an active record for that pair under an active node.
    /// Directory errors fail closed.
    pub async fn authenticate(
        &self,
        transport_verified: bool,
        claimed_identity: Option<&str>,
        presented_fingerprint: Option<&str>,
    ) -> Result<AuthenticatedNode, Unauthenticated> {
        if !transport_verified {
            debug!("rejecting request: transport verification failed");
            return Err(Unauthenticated);
        }

        let Some(identifier) = claimed_identity.and_then(|v| Uuid::parse_str(v.trim()).ok())
        else {
            debug!(
                claimed = ?claimed_identity,
                "rejecting request: missing or malformed identity"
            );
            return Err(Unauthenticated);
        };

        let Some(fingerprint) = presented_fingerprint.and_then(Fingerprint::parse) else {
            debug!(
                identifier = %identifier,
                "rejecting request: missing or malformed fingerprint"
            );
            return Err(Unauthenticated);
        };

        match self
            .directory
            .find_active_record(&identifier, &fingerprint)
            .await
        {
            Ok(true) => Ok(AuthenticatedNode {
                identifier,
                fingerprint,
            }),
            Ok(false) => {
                debug!(
                    identifier = %identifier,
                    fingerprint = %fingerprint,
                    "rejecting request: no active record"
                );
                Err(Unauthenticated)
            }
            Err(e) => {
                warn!(
                    identifier = %identifier,
                    error = %e,
                    "directory lookup failed during authentication"
                );
                Err(Unauthenticated)
            }
        }
    }
}

/// Extract the CN value from a subject DN.
///
/// Accepts RFC 2253 (`CN=x,O=y`) and OpenSSL slash (`/O=y/CN=x`) forms.
pub fn identity_from_subject_dn(dn: &str) -> Option<&str> {
    dn.split([',', '/'])
        .filter_map(|rdn| rdn.trim().split_once('='))
        .find(|(attr, _)| attr.trim().eq_ignore_ascii_case("CN"))
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{MemoryDirectory, NewNode, RecordStatus};

    async fn enrolled() -> (AuthenticationGuard, Arc<MemoryDirectory>, Uuid, Fingerprint) {
        let directory = Arc::new(MemoryDirectory::new());
        let identifier = Uuid::new_v4();
        let fingerprint = Fingerprint::of_der(b"client certificate");
        directory
            .create_node_with_cert(NewNode {
                identifier,
                name: Some("web-1".into()),
                source_address: None,
                fingerprint: fingerprint.clone(),
            })
            .await
            .unwrap();
        (
            AuthenticationGuard::new(directory.clone()),
            directory,
            identifier,
            fingerprint,
        )
    }

    #[tokio::test]
    async fn test_authenticate_enrolled_node() {
        let (guard, _, identifier, fingerprint) = enrolled().await;
        let id = identifier.to_string();

        let node = guard
            .authenticate(true, Some(&id), Some(fingerprint.as_str()))
            .await
            .unwrap();

        assert_eq!(node.identifier, identifier);
        assert_eq!(node.fingerprint, fingerprint);
    }

    #[tokio::test]
    async fn test_colon_separated_uppercase_fingerprint() {
        let (guard, _, identifier, fingerprint) = enrolled().await;
        let id = identifier.to_string();
        let presented = fingerprint
            .as_str()
            .to_uppercase()
            .as_bytes()
            .chunks(2)
            .map(|pair| String::from_utf8_lossy(pair).into_owned())
            .collect::<Vec<_>>()
            .join(":");

        assert!(guard
            .authenticate(true, Some(&id), Some(&presented))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_any_altered_field_fails() {
        let (guard, _, identifier, fingerprint) = enrolled().await;
        let id = identifier.to_string();
        let other_id = Uuid::new_v4().to_string();
        let other_fp = Fingerprint::of_der(b"someone else");

        assert_eq!(
            guard.authenticate(false, Some(&id), Some(fingerprint.as_str())).await,
            Err(Unauthenticated)
        );
        assert_eq!(
            guard.authenticate(true, Some(&other_id), Some(fingerprint.as_str())).await,
            Err(Unauthenticated)
        );
        assert_eq!(
            guard.authenticate(true, Some(&id), Some(other_fp.as_str())).await,
            Err(Unauthenticated)
        );
    }

    #[tokio::test]
    async fn test_missing_or_malformed_inputs_fail() {
        let (guard, _, identifier, fingerprint) = enrolled().await;
        let id = identifier.to_string();

        assert!(guard.authenticate(true, None, Some(fingerprint.as_str())).await.is_err());
        assert!(guard.authenticate(true, Some(&id), None).await.is_err());
        assert!(guard
            .authenticate(true, Some("not-a-uuid"), Some(fingerprint.as_str()))
            .await
            .is_err());
        assert!(guard.authenticate(true, Some(&id), Some("abc123")).await.is_err());
    }

    #[tokio::test]
    async fn test_revoked_records_fail() {
        let (guard, directory, identifier, fingerprint) = enrolled().await;
        let id = identifier.to_string();
        let node_id = crate::directory::NodeId::new(1);

        directory
            .set_cert_status(node_id, &fingerprint, RecordStatus::Revoked)
            .await
            .unwrap();
        assert!(guard
            .authenticate(true, Some(&id), Some(fingerprint.as_str()))
            .await
            .is_err());

        directory
            .set_cert_status(node_id, &fingerprint, RecordStatus::Active)
            .await
            .unwrap();
        directory
            .set_node_status(node_id, RecordStatus::Revoked)
            .await
            .unwrap();
        assert!(guard
            .authenticate(true, Some(&id), Some(fingerprint.as_str()))
            .await
            .is_err());
    }

    #[test]
    fn test_identity_from_subject_dn() {
        let id = "6f1c2a8e-4b7d-4e0a-9c55-0d2f3b1a7e90";
        assert_eq!(identity_from_subject_dn(&format!("CN={id}")), Some(id));
        assert_eq!(identity_from_subject_dn(&format!("CN={id},O=cluster")), Some(id));
        assert_eq!(identity_from_subject_dn(&format!("/O=cluster/CN={id}")), Some(id));
        assert_eq!(identity_from_subject_dn(&format!("cn = {id}")), Some(id));
        assert_eq!(identity_from_subject_dn("O=cluster"), None);
        assert_eq!(identity_from_subject_dn("CN="), None);
        assert_eq!(identity_from_subject_dn(""), None);
    }
}
