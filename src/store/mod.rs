//! # Operation Store
//!
//! Durable home of [`Operation`] and [`Cluster`] records.
//!
//! The operation record is the only state shared between workers, so every
//! write goes through [`OperationStore::save`] with the version the writer
//! read. A mismatch means someone else advanced the operation first and
//! surfaces as [`ProvisionerError::ConcurrentModification`]; the loser drops
//! its result and the stage is re-run from the stored state later.
//!
//! Cancellation is a flag next to the record. Setting it never interrupts a
//! running stage; the executor reads it at the next transition boundary.
//!
//! [`ProvisionerError::ConcurrentModification`]: crate::error::ProvisionerError::ConcurrentModification

use crate::error::Result;
use crate::models::{Cluster, Operation};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::InMemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PgOperationStore;

#[async_trait]
pub trait OperationStore: Send + Sync {
    /// Insert or replace a cluster description
    async fn insert_cluster(&self, cluster: &Cluster) -> Result<()>;

    async fn load_cluster(&self, cluster_id: &str) -> Result<Cluster>;

    async fn insert(&self, operation: &Operation) -> Result<()>;

    /// Insert `operation` unless its cluster is busy.
    ///
    /// The in-flight check and the insert happen atomically per cluster. An
    /// in-flight operation the new kind does not
    /// [supersede](crate::models::OperationKind::supersedes) rejects the insert
    /// with [`ProvisionerError::ClusterBusy`]; superseded operations get their
    /// cancellation flag set. Returns the ids of the superseded operations.
    ///
    /// [`ProvisionerError::ClusterBusy`]: crate::error::ProvisionerError::ClusterBusy
    async fn insert_exclusive(&self, operation: &Operation) -> Result<Vec<Uuid>>;

    async fn load(&self, operation_id: Uuid) -> Result<Operation>;

    /// Compare-and-swap write.
    ///
    /// Succeeds only while the stored version equals `expected_version` and the
    /// stored record is not terminal. Returns the record as stored, with its
    /// version incremented.
    async fn save(&self, operation: &Operation, expected_version: i64) -> Result<Operation>;

    /// Ids of in-progress operations due at or before `now`, earliest first
    async fn list_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Uuid>>;

    async fn list_in_progress(&self) -> Result<Vec<Operation>>;

    async fn list_for_cluster(&self, cluster_id: &str) -> Result<Vec<Operation>>;

    async fn request_cancellation(&self, operation_id: Uuid) -> Result<()>;

    async fn is_cancellation_requested(&self, operation_id: Uuid) -> Result<bool>;
}
