//! Postgres-backed [`OperationStore`].
//!
//! Compare-and-swap is a single `UPDATE ... WHERE version = $n AND status =
//! 'in_progress'`; a zero-row update is disambiguated into not-found versus
//! lost race with one follow-up read.
//!
//! Admission of a new operation locks the cluster row for the duration of
//! the in-flight check and insert.

use super::OperationStore;
use crate::error::{ProvisionerError, Result};
use crate::models::{Cluster, Operation, OperationKind, OperationStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use tracing::{debug, instrument};
use uuid::Uuid;

/// Migrations for the `clusters` and `operations` tables.
///
/// ```rust,ignore
/// #[sqlx::test(migrator = "provisioner_core::store::postgres::MIGRATOR")]
/// async fn test_feature(pool: PgPool) { /* ... */ }
/// ```
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

const OPERATION_COLUMNS: &str = "id, cluster_id, kind, stage, status, entered_stage_at, due_at, \
     attempts, last_error, version, created_at, updated_at, finished_at";

#[derive(Debug, FromRow)]
struct OperationRow {
    id: Uuid,
    cluster_id: String,
    kind: String,
    stage: String,
    status: String,
    entered_stage_at: DateTime<Utc>,
    due_at: DateTime<Utc>,
    attempts: i32,
    last_error: Option<String>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl TryFrom<OperationRow> for Operation {
    type Error = ProvisionerError;

    fn try_from(row: OperationRow) -> Result<Self> {
        let kind: OperationKind = row.kind.parse().map_err(ProvisionerError::DatabaseError)?;
        let status: OperationStatus = row
            .status
            .parse()
            .map_err(ProvisionerError::DatabaseError)?;

        Ok(Operation {
            id: row.id,
            cluster_id: row.cluster_id,
            kind,
            stage: row.stage.into(),
            status,
            entered_stage_at: row.entered_stage_at,
            due_at: row.due_at,
            attempts: u32::try_from(row.attempts).unwrap_or_default(),
            last_error: row.last_error,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
            finished_at: row.finished_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct ClusterRow {
    id: String,
    name: String,
    provider_config: Json<serde_json::Value>,
    kubeconfig: Option<String>,
    administrators: Json<Vec<String>>,
}

impl From<ClusterRow> for Cluster {
    fn from(row: ClusterRow) -> Self {
        Cluster {
            id: row.id,
            name: row.name,
            provider_config: row.provider_config.0,
            kubeconfig: row.kubeconfig,
            administrators: row.administrators.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PgOperationStore {
    pool: PgPool,
}

impl PgOperationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect using the database section of the engine configuration
    pub async fn connect(config: &crate::config::DatabaseConfig) -> Result<Self> {
        let url = config.database_url().ok_or_else(|| {
            ProvisionerError::Configuration(
                crate::config::ConfigurationError::missing_required_field("database.url", "database"),
            )
        })?;
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&url)
            .await?;
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> Result<()> {
        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| ProvisionerError::DatabaseError(format!("Migration failed: {e}")))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_operations(&self, sql: &str, bind: Option<&str>) -> Result<Vec<Operation>> {
        let mut query = sqlx::query_as::<_, OperationRow>(sql);
        if let Some(value) = bind {
            query = query.bind(value.to_string());
        }
        query
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Operation::try_from)
            .collect()
    }
}

async fn insert_operation<'e, E>(executor: E, operation: &Operation) -> Result<()>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query(
        "INSERT INTO operations (id, cluster_id, kind, stage, status, entered_stage_at,
             due_at, attempts, last_error, version, created_at, updated_at, finished_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
    )
    .bind(operation.id)
    .bind(&operation.cluster_id)
    .bind(operation.kind.as_str())
    .bind(operation.stage.as_str())
    .bind(operation.status.as_str())
    .bind(operation.entered_stage_at)
    .bind(operation.due_at)
    .bind(i32::try_from(operation.attempts).unwrap_or(i32::MAX))
    .bind(&operation.last_error)
    .bind(operation.version)
    .bind(operation.created_at)
    .bind(operation.updated_at)
    .bind(operation.finished_at)
    .execute(executor)
    .await?;
    Ok(())
}

#[async_trait]
impl OperationStore for PgOperationStore {
    async fn insert_cluster(&self, cluster: &Cluster) -> Result<()> {
        sqlx::query(
            "INSERT INTO clusters (id, name, provider_config, kubeconfig, administrators)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (id) DO UPDATE SET
                 name = EXCLUDED.name,
                 provider_config = EXCLUDED.provider_config,
                 kubeconfig = EXCLUDED.kubeconfig,
                 administrators = EXCLUDED.administrators",
        )
        .bind(&cluster.id)
        .bind(&cluster.name)
        .bind(Json(&cluster.provider_config))
        .bind(&cluster.kubeconfig)
        .bind(Json(&cluster.administrators))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_cluster(&self, cluster_id: &str) -> Result<Cluster> {
        sqlx::query_as::<_, ClusterRow>(
            "SELECT id, name, provider_config, kubeconfig, administrators
             FROM clusters WHERE id = $1",
        )
        .bind(cluster_id)
        .fetch_optional(&self.pool)
        .await?
        .map(Cluster::from)
        .ok_or_else(|| ProvisionerError::ClusterNotFound(cluster_id.to_string()))
    }

    #[instrument(skip(self, operation), fields(operation_id = %operation.id))]
    async fn insert(&self, operation: &Operation) -> Result<()> {
        insert_operation(&self.pool, operation).await?;
        debug!("Inserted operation");
        Ok(())
    }

    #[instrument(skip(self, operation), fields(operation_id = %operation.id, cluster_id = %operation.cluster_id))]
    async fn insert_exclusive(&self, operation: &Operation) -> Result<Vec<Uuid>> {
        let mut tx = self.pool.begin().await?;

        // Row lock on the cluster serializes admission; released on commit or rollback
        sqlx::query_scalar::<_, String>("SELECT id FROM clusters WHERE id = $1 FOR UPDATE")
            .bind(&operation.cluster_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| ProvisionerError::ClusterNotFound(operation.cluster_id.clone()))?;

        let in_flight = sqlx::query_as::<_, (Uuid, String)>(
            "SELECT id, kind FROM operations
             WHERE cluster_id = $1 AND status = 'in_progress'
             ORDER BY created_at ASC",
        )
        .bind(&operation.cluster_id)
        .fetch_all(&mut *tx)
        .await?;

        let mut superseded = Vec::with_capacity(in_flight.len());
        for (id, kind) in in_flight {
            let kind = kind
                .parse::<OperationKind>()
                .map_err(ProvisionerError::DatabaseError)?;
            if !operation.kind.supersedes(kind) {
                return Err(ProvisionerError::ClusterBusy {
                    cluster_id: operation.cluster_id.clone(),
                    operation_id: id,
                    kind,
                });
            }
            superseded.push(id);
        }

        if !superseded.is_empty() {
            sqlx::query("UPDATE operations SET cancellation_requested = TRUE WHERE id = ANY($1)")
                .bind(&superseded)
                .execute(&mut *tx)
                .await?;
        }
        insert_operation(&mut *tx, operation).await?;
        tx.commit().await?;

        debug!(superseded = superseded.len(), "Inserted operation exclusively");
        Ok(superseded)
    }

    async fn load(&self, operation_id: Uuid) -> Result<Operation> {
        let sql = format!("SELECT {OPERATION_COLUMNS} FROM operations WHERE id = $1");
        let row = sqlx::query_as::<_, OperationRow>(&sql)
            .bind(operation_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(ProvisionerError::OperationNotFound(operation_id))?;
        Operation::try_from(row)
    }

    #[instrument(skip(self, operation), fields(operation_id = %operation.id))]
    async fn save(&self, operation: &Operation, expected_version: i64) -> Result<Operation> {
        let sql = format!(
            "UPDATE operations SET
                 stage = $2, status = $3, entered_stage_at = $4, due_at = $5,
                 attempts = $6, last_error = $7, updated_at = $8, finished_at = $9,
                 version = version + 1
             WHERE id = $1 AND version = $10 AND status = 'in_progress'
             RETURNING {OPERATION_COLUMNS}"
        );
        let updated = sqlx::query_as::<_, OperationRow>(&sql)
            .bind(operation.id)
            .bind(operation.stage.as_str())
            .bind(operation.status.as_str())
            .bind(operation.entered_stage_at)
            .bind(operation.due_at)
            .bind(i32::try_from(operation.attempts).unwrap_or(i32::MAX))
            .bind(&operation.last_error)
            .bind(operation.updated_at)
            .bind(operation.finished_at)
            .bind(expected_version)
            .fetch_optional(&self.pool)
            .await?;

        match updated {
            Some(row) => Operation::try_from(row),
            None => {
                // Distinguish a missing record from a lost race
                self.load(operation.id).await?;
                debug!("Compare-and-swap lost");
                Err(ProvisionerError::ConcurrentModification {
                    operation_id: operation.id,
                    expected_version,
                })
            }
        }
    }

    async fn list_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM operations
             WHERE status = 'in_progress' AND due_at <= $1
             ORDER BY due_at ASC
             LIMIT $2",
        )
        .bind(now)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn list_in_progress(&self) -> Result<Vec<Operation>> {
        let sql = format!(
            "SELECT {OPERATION_COLUMNS} FROM operations
             WHERE status = 'in_progress' ORDER BY created_at ASC"
        );
        self.fetch_operations(&sql, None).await
    }

    async fn list_for_cluster(&self, cluster_id: &str) -> Result<Vec<Operation>> {
        let sql = format!(
            "SELECT {OPERATION_COLUMNS} FROM operations
             WHERE cluster_id = $1 ORDER BY created_at ASC"
        );
        self.fetch_operations(&sql, Some(cluster_id)).await
    }

    async fn request_cancellation(&self, operation_id: Uuid) -> Result<()> {
        let result =
            sqlx::query("UPDATE operations SET cancellation_requested = TRUE WHERE id = $1")
                .bind(operation_id)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(ProvisionerError::OperationNotFound(operation_id));
        }
        Ok(())
    }

    async fn is_cancellation_requested(&self, operation_id: Uuid) -> Result<bool> {
        sqlx::query_scalar::<_, bool>(
            "SELECT cancellation_requested FROM operations WHERE id = $1",
        )
        .bind(operation_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(ProvisionerError::OperationNotFound(operation_id))
    }
}
