//! MySQL node directory
//!
//! Persistent backend for production clusters. Enabled with the `mysql`
//! feature.
//!
//! # Schema
//!
//! Created on connect if missing:
//!
//! ```sql
//! node(id, uuid, hostname, ip, status, created_at)
//! clientcert(id, node_id -> node.id, sha1, status, created_at)
//! ```
//!
//! `status` is 1 for active, 0 for revoked.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cluster_ca::Fingerprint;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use sqlx::Row;
use tracing::info;
use uuid::Uuid;

use super::{
    ClientCertRecord, DirectoryError, NewNode, NodeDirectory, NodeId, NodeRecord, RecordStatus,
};

const CREATE_NODE_TABLE: &str = r"
    CREATE TABLE IF NOT EXISTS node (
        id BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
        uuid CHAR(36) NOT NULL UNIQUE,
        hostname VARCHAR(255) NULL,
        ip VARCHAR(255) NULL,
        status TINYINT NOT NULL DEFAULT 1,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    )";

const CREATE_CLIENTCERT_TABLE: &str = r"
    CREATE TABLE IF NOT EXISTS clientcert (
        id BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
        node_id BIGINT NOT NULL,
        sha1 CHAR(40) NOT NULL UNIQUE,
        status TINYINT NOT NULL DEFAULT 1,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        CONSTRAINT fk_clientcert_node FOREIGN KEY (node_id) REFERENCES node(id)
    )";

/// MySQL node directory implementation
#[derive(Debug, Clone)]
pub struct MySqlDirectory {
    pool: MySqlPool,
}

impl MySqlDirectory {
    /// Connect and create the tables if needed.
    pub async fn connect(database_url: &str) -> Result<Self, DirectoryError> {
        let pool = MySqlPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(db_error)?;

        info!("Connected to MySQL node directory");

        let directory = Self { pool };
        directory.run_migrations().await?;
        Ok(directory)
    }

    /// Create from an existing pool
    pub const fn from_pool(pool: MySqlPool) -> Self {
        Self { pool }
    }

    async fn run_migrations(&self) -> Result<(), DirectoryError> {
        for statement in [CREATE_NODE_TABLE, CREATE_CLIENTCERT_TABLE] {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(db_error)?;
        }
        info!("Node directory migrations complete");
        Ok(())
    }
}

#[async_trait]
impl NodeDirectory for MySqlDirectory {
    async fn create_node_with_cert(&self, node: NewNode) -> Result<NodeId, DirectoryError> {
        // Dropping the transaction without commit rolls both inserts back.
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let inserted =
            sqlx::query("INSERT INTO node (uuid, hostname, ip, status) VALUES (?, ?, ?, ?)")
                .bind(node.identifier.to_string())
                .bind(node.name.as_deref())
                .bind(node.source_address.as_deref())
                .bind(RecordStatus::Active.as_db())
                .execute(&mut *tx)
                .await
                .map_err(db_error)?;

        let raw_id = i64::try_from(inserted.last_insert_id())
            .map_err(|_| DirectoryError::InvalidNodeId(-1))?;
        let id = NodeId::new(raw_id);
        if !id.is_valid() {
            return Err(DirectoryError::InvalidNodeId(raw_id));
        }

        sqlx::query("INSERT INTO clientcert (node_id, sha1, status) VALUES (?, ?, ?)")
            .bind(id.get())
            .bind(node.fingerprint.as_str())
            .bind(RecordStatus::Active.as_db())
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;
        Ok(id)
    }

    async fn find_active_record(
        &self,
        identifier: &Uuid,
        fingerprint: &Fingerprint,
    ) -> Result<bool, DirectoryError> {
        let row = sqlx::query(
            "SELECT COUNT(1) AS n FROM clientcert c JOIN node n ON n.id = c.node_id \
             WHERE c.status = 1 AND c.sha1 = ? AND n.status = 1 AND n.uuid = ?",
        )
        .bind(fingerprint.as_str())
        .bind(identifier.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;

        let count: i64 = row.try_get("n").map_err(db_error)?;
        Ok(count > 0)
    }

    async fn get_node(&self, id: NodeId) -> Result<Option<NodeRecord>, DirectoryError> {
        let Some(row) = sqlx::query(
            "SELECT id, uuid, hostname, ip, status, created_at FROM node WHERE id = ?",
        )
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?
        else {
            return Ok(None);
        };

        let uuid: String = row.try_get("uuid").map_err(db_error)?;
        let identifier = Uuid::parse_str(&uuid)
            .map_err(|e| DirectoryError::Database(format!("stored uuid '{uuid}': {e}")))?;

        let cert_rows = sqlx::query(
            "SELECT sha1, status, created_at FROM clientcert WHERE node_id = ? ORDER BY id",
        )
        .bind(id.get())
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        let mut certificates = Vec::with_capacity(cert_rows.len());
        for cert in cert_rows {
            let sha1: String = cert.try_get("sha1").map_err(db_error)?;
            let fingerprint = Fingerprint::parse(&sha1)
                .ok_or_else(|| DirectoryError::Database(format!("stored fingerprint '{sha1}'")))?;
            certificates.push(ClientCertRecord {
                fingerprint,
                status: RecordStatus::from_db(cert.try_get("status").map_err(db_error)?),
                created_at: cert
                    .try_get::<DateTime<Utc>, _>("created_at")
                    .map_err(db_error)?,
            });
        }

        Ok(Some(NodeRecord {
            id,
            identifier,
            name: row.try_get("hostname").map_err(db_error)?,
            source_address: row.try_get("ip").map_err(db_error)?,
            status: RecordStatus::from_db(row.try_get("status").map_err(db_error)?),
            created_at: row.try_get("created_at").map_err(db_error)?,
            certificates,
        }))
    }

    async fn set_node_status(
        &self,
        id: NodeId,
        status: RecordStatus,
    ) -> Result<(), DirectoryError> {
        let result = sqlx::query("UPDATE node SET status = ? WHERE id = ?")
            .bind(status.as_db())
            .bind(id.get())
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        if result.rows_affected() == 0 && self.get_node(id).await?.is_none() {
            return Err(DirectoryError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn set_cert_status(
        &self,
        id: NodeId,
        fingerprint: &Fingerprint,
        status: RecordStatus,
    ) -> Result<(), DirectoryError> {
        let result = sqlx::query("UPDATE clientcert SET status = ? WHERE node_id = ? AND sha1 = ?")
            .bind(status.as_db())
            .bind(id.get())
            .bind(fingerprint.as_str())
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        if result.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM clientcert WHERE node_id = ? AND sha1 = ?")
                .bind(id.get())
                .bind(fingerprint.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error)?;
            if exists.is_none() {
                return Err(DirectoryError::NotFound(format!("{id}/{fingerprint}")));
            }
        }
        Ok(())
    }
}

fn db_error(err: sqlx::Error) -> DirectoryError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return DirectoryError::Conflict(db.message().to_string());
        }
    }
    DirectoryError::Database(err.to_string())
}
