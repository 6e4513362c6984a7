//! In-memory node directory
//!
//! Default backend. All state sits behind one lock, so a create either
//! lands completely or not at all. Data is lost on restart.

use async_trait::async_trait;
use chrono::Utc;
use cluster_ca::Fingerprint;
use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::info;
use uuid::Uuid;

use super::{
    ClientCertRecord, DirectoryError, NewNode, NodeDirectory, NodeId, NodeRecord, RecordStatus,
};

#[derive(Debug, Default)]
struct Inner {
    last_id: i64,
    nodes: BTreeMap<NodeId, NodeRecord>,
    by_identifier: HashMap<Uuid, NodeId>,
    by_fingerprint: HashMap<Fingerprint, NodeId>,
}

/// In-memory node directory implementation
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    inner: RwLock<Inner>,
}

impl MemoryDirectory {
    /// Create an empty directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes stored. Still answers after the lock is poisoned.
    pub fn len(&self) -> usize {
        self.snapshot().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of certificate records across all nodes.
    pub fn cert_count(&self) -> usize {
        self.snapshot().by_fingerprint.len()
    }

    fn snapshot(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>, DirectoryError> {
        self.inner
            .read()
            .map_err(|_| DirectoryError::Database("directory lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>, DirectoryError> {
        self.inner
            .write()
            .map_err(|_| DirectoryError::Database("directory lock poisoned".into()))
    }
}

#[async_trait]
impl NodeDirectory for MemoryDirectory {
    async fn create_node_with_cert(&self, node: NewNode) -> Result<NodeId, DirectoryError> {
        let mut inner = self.write()?;

        // Check every constraint before mutating anything.
        if inner.by_identifier.contains_key(&node.identifier) {
            return Err(DirectoryError::Conflict(format!("node {}", node.identifier)));
        }
        if inner.by_fingerprint.contains_key(&node.fingerprint) {
            return Err(DirectoryError::Conflict(format!(
                "certificate {}",
                node.fingerprint
            )));
        }

        inner.last_id += 1;
        let id = NodeId::new(inner.last_id);
        let now = Utc::now();

        inner.by_identifier.insert(node.identifier, id);
        inner.by_fingerprint.insert(node.fingerprint.clone(), id);
        inner.nodes.insert(
            id,
            NodeRecord {
                id,
                identifier: node.identifier,
                name: node.name,
                source_address: node.source_address,
                status: RecordStatus::Active,
                created_at: now,
                certificates: vec![ClientCertRecord {
                    fingerprint: node.fingerprint,
                    status: RecordStatus::Active,
                    created_at: now,
                }],
            },
        );

        info!(node_id = %id, identifier = %node.identifier, "stored node");
        Ok(id)
    }

    async fn find_active_record(
        &self,
        identifier: &Uuid,
        fingerprint: &Fingerprint,
    ) -> Result<bool, DirectoryError> {
        let inner = self.read()?;
        let Some(id) = inner.by_fingerprint.get(fingerprint) else {
            return Ok(false);
        };
        let Some(node) = inner.nodes.get(id) else {
            return Ok(false);
        };

        Ok(node.identifier == *identifier
            && node.status == RecordStatus::Active
            && node
                .certificates
                .iter()
                .any(|c| c.fingerprint == *fingerprint && c.status == RecordStatus::Active))
    }

    async fn get_node(&self, id: NodeId) -> Result<Option<NodeRecord>, DirectoryError> {
        Ok(self.read()?.nodes.get(&id).cloned())
    }

    async fn set_node_status(
        &self,
        id: NodeId,
        status: RecordStatus,
    ) -> Result<(), DirectoryError> {
        let mut inner = self.write()?;
        let node = inner
            .nodes
            .get_mut(&id)
            .ok_or_else(|| DirectoryError::NotFound(id.to_string()))?;
        node.status = status;
        info!(node_id = %id, status = ?status, "updated node status");
        Ok(())
    }

    async fn set_cert_status(
        &self,
        id: NodeId,
        fingerprint: &Fingerprint,
        status: RecordStatus,
    ) -> Result<(), DirectoryError> {
        let mut inner = self.write()?;
        let cert = inner
            .nodes
            .get_mut(&id)
            .and_then(|node| {
                node.certificates
                    .iter_mut()
                    .find(|c| c.fingerprint == *fingerprint)
            })
            .ok_or_else(|| DirectoryError::NotFound(format!("{id}/{fingerprint}")))?;
        cert.status = status;
        info!(
            node_id = %id,
            fingerprint = %fingerprint,
            status = ?status,
            "updated certificate status"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(seed: &str) -> Fingerprint {
        Fingerprint::of_der(seed.as_bytes())
    }

    fn new_node(fingerprint: Fingerprint) -> NewNode {
        NewNode {
            identifier: Uuid::new_v4(),
            name: Some("web-1".into()),
            source_address: Some("10.0.0.7".into()),
            fingerprint,
        }
    }

    #[tokio::test]
    async fn test_create_and_find() {
        let dir = MemoryDirectory::new();
        let node = new_node(fp("a"));
        let identifier = node.identifier;

        let id = dir.create_node_with_cert(node).await.unwrap();

        assert_eq!(id, NodeId::new(1));
        assert!(dir.find_active_record(&identifier, &fp("a")).await.unwrap());
        assert!(!dir.find_active_record(&identifier, &fp("b")).await.unwrap());
        assert!(!dir
            .find_active_record(&Uuid::new_v4(), &fp("a"))
            .await
            .unwrap());

        let record = dir.get_node(id).await.unwrap().unwrap();
        assert_eq!(record.identifier, identifier);
        assert_eq!(record.name.as_deref(), Some("web-1"));
        assert_eq!(record.certificates.len(), 1);
        assert_eq!(record.certificates[0].fingerprint, fp("a"));
    }

    #[tokio::test]
    async fn test_ids_are_sequential() {
        let dir = MemoryDirectory::new();
        let a = dir.create_node_with_cert(new_node(fp("a"))).await.unwrap();
        let b = dir.create_node_with_cert(new_node(fp("b"))).await.unwrap();
        assert_eq!(a.get() + 1, b.get());
    }

    #[tokio::test]
    async fn test_duplicate_fingerprint_commits_nothing() {
        let dir = MemoryDirectory::new();
        dir.create_node_with_cert(new_node(fp("a"))).await.unwrap();

        let dup = new_node(fp("a"));
        let dup_identifier = dup.identifier;
        let err = dir.create_node_with_cert(dup).await.unwrap_err();

        assert!(matches!(err, DirectoryError::Conflict(_)));
        assert_eq!(dir.len(), 1);
        assert_eq!(dir.cert_count(), 1);
        assert!(!dir
            .find_active_record(&dup_identifier, &fp("a"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_identifier_commits_nothing() {
        let dir = MemoryDirectory::new();
        let first = new_node(fp("a"));
        let mut second = new_node(fp("b"));
        second.identifier = first.identifier;

        dir.create_node_with_cert(first).await.unwrap();
        assert!(dir.create_node_with_cert(second).await.is_err());
        assert_eq!(dir.len(), 1);
        assert_eq!(dir.cert_count(), 1);
    }

    #[tokio::test]
    async fn test_revoked_node_or_cert_is_not_active() {
        let dir = MemoryDirectory::new();
        let node = new_node(fp("a"));
        let identifier = node.identifier;
        let id = dir.create_node_with_cert(node).await.unwrap();

        dir.set_node_status(id, RecordStatus::Revoked).await.unwrap();
        assert!(!dir.find_active_record(&identifier, &fp("a")).await.unwrap());

        dir.set_node_status(id, RecordStatus::Active).await.unwrap();
        dir.set_cert_status(id, &fp("a"), RecordStatus::Revoked)
            .await
            .unwrap();
        assert!(!dir.find_active_record(&identifier, &fp("a")).await.unwrap());
    }

    #[tokio::test]
    async fn test_status_update_on_missing_node() {
        let dir = MemoryDirectory::new();
        let err = dir
            .set_node_status(NodeId::new(9), RecordStatus::Revoked)
            .await
            .unwrap_err();
        assert!(matches!(err, DirectoryError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_poisoned_lock_reports_error_but_keeps_counts() {
        let dir = MemoryDirectory::new();
        let node = new_node(fp("a"));
        let identifier = node.identifier;
        dir.create_node_with_cert(node).await.unwrap();

        let poisoned = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = dir.inner.write().unwrap();
            panic!("writer crashed");
        }));
        assert!(poisoned.is_err());

        assert_eq!(dir.len(), 1);
        assert_eq!(dir.cert_count(), 1);
        assert!(!dir.is_empty());
        let err = dir
            .find_active_record(&identifier, &fp("a"))
            .await
            .unwrap_err();
        assert!(matches!(err, DirectoryError::Database(_)));
    }
}
