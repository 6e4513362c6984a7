//! Node directory: durable store of enrolled nodes and their certificate
//! fingerprints.
//!
//! The directory is the only shared state that needs transactional
//! discipline. A node and its first certificate record are always created
//! together by [`NodeDirectory::create_node_with_cert`]; a failure commits
//! neither. After creation only the status fields change.

pub mod memory;
#[cfg(feature = "mysql")]
pub mod mysql;

pub use memory::MemoryDirectory;
#[cfg(feature = "mysql")]
pub use mysql::MySqlDirectory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cluster_ca::Fingerprint;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug};
use uuid::Uuid;

/// Error type for directory operations
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("record already exists: {0}")]
    Conflict(String),

    #[error("node not found: {0}")]
    NotFound(String),

    #[error("directory returned invalid node id {0}")]
    InvalidNodeId(i64),

    #[error("database error: {0}")]
    Database(String),
}

/// Directory-assigned numeric node id, returned to the node at enrollment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(i64);

impl NodeId {
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    pub const fn get(self) -> i64 {
        self.0
    }

    /// Ids are positive; anything else signals a broken backend.
    pub const fn is_valid(self) -> bool {
        self.0 > 0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Soft status flag shared by nodes and certificate records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Active,
    Revoked,
}

impl RecordStatus {
    /// Column value used by SQL backends.
    pub const fn as_db(self) -> i8 {
        match self {
            Self::Active => 1,
            Self::Revoked => 0,
        }
    }

    pub const fn from_db(value: i8) -> Self {
        if value == 1 {
            Self::Active
        } else {
            Self::Revoked
        }
    }
}

/// Everything needed to create a node and its certificate record.
#[derive(Debug, Clone)]
pub struct NewNode {
    /// Opaque identifier minted at enrollment; also the certificate CN.
    pub identifier: Uuid,
    /// Caller-supplied display name.
    pub name: Option<String>,
    /// Observed source address of the join request.
    pub source_address: Option<String>,
    /// Fingerprint of the issued certificate.
    pub fingerprint: Fingerprint,
}

/// A certificate fingerprint bound to a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientCertRecord {
    pub fingerprint: Fingerprint,
    pub status: RecordStatus,
    pub created_at: DateTime<Utc>,
}

/// An enrolled node with its certificate records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeRecord {
    pub id: NodeId,
    pub identifier: Uuid,
    pub name: Option<String>,
    pub source_address: Option<String>,
    pub status: RecordStatus,
    pub created_at: DateTime<Utc>,
    pub certificates: Vec<ClientCertRecord>,
}

/// Storage backend for node identities.
///
/// Implementations must be thread-safe; concurrent creates need no mutual
/// ordering but each create is a single atomic unit.
#[async_trait]
pub trait NodeDirectory: Send + Sync + Debug {
    /// Atomically create a node and its certificate record.
    async fn create_node_with_cert(&self, node: NewNode) -> Result<NodeId, DirectoryError>;

    /// True if an active certificate record with `fingerprint` belongs to
    /// the active node `identifier`.
    async fn find_active_record(
        &self,
        identifier: &Uuid,
        fingerprint: &Fingerprint,
    ) -> Result<bool, DirectoryError>;

    /// Look up a node with its certificate records.
    async fn get_node(&self, id: NodeId) -> Result<Option<NodeRecord>, DirectoryError>;

    /// Change a node's status.
    async fn set_node_status(&self, id: NodeId, status: RecordStatus)
        -> Result<(), DirectoryError>;

    /// Change the status of one of a node's certificate records.
    async fn set_cert_status(
        &self,
        id: NodeId,
        fingerprint: &Fingerprint,
        status: RecordStatus,
    ) -> Result<(), DirectoryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_validity() {
        assert!(NodeId::new(1).is_valid());
        assert!(!NodeId::new(0).is_valid());
        assert!(!NodeId::new(-1).is_valid());
    }

    #[test]
    fn test_status_db_mapping() {
        assert_eq!(RecordStatus::from_db(RecordStatus::Active.as_db()), RecordStatus::Active);
        assert_eq!(RecordStatus::from_db(0), RecordStatus::Revoked);
        assert_eq!(RecordStatus::from_db(7), RecordStatus::Revoked);
    }

    #[test]
    fn test_node_id_serializes_as_number() {
        assert_eq!(serde_json::to_string(&NodeId::new(42)).unwrap(), "42");
    }
}
