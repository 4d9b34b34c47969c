//! PostgreSQL-backed persistence implementation.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use crate::error::TrackerError;

use super::{
    ConcurrentChildInstance, NodeExecutionRecord, Persistence, StepDetailRecord,
    child_instance_from_columns,
};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/postgresql");

/// PostgreSQL-backed persistence provider.
#[derive(Clone)]
pub struct PostgresPersistence {
    pool: PgPool,
}

impl PostgresPersistence {
    /// Create a new Postgres persistence provider from an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to PostgreSQL and run migrations.
    ///
    /// # Arguments
    ///
    /// * `database_url` - PostgreSQL connection string
    /// * `max_connections` - Pool size
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
    ) -> Result<Self, TrackerError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| TrackerError::DatabaseError {
                operation: "connect".to_string(),
                details: format!("Failed to connect to PostgreSQL: {}", e),
            })?;

        MIGRATOR
            .run(&pool)
            .await
            .map_err(|e| TrackerError::DatabaseError {
                operation: "migrate".to_string(),
                details: format!("Failed to run migrations: {}", e),
            })?;

        Ok(Self { pool })
    }
}

#[derive(sqlx::FromRow)]
struct DetailsRow {
    uuid: String,
    node_execution_id: String,
    plan_execution_id: Option<String>,
    resolved_inputs: Option<Vec<u8>>,
    child_cursor: Option<i64>,
    child_node_execution_ids: Option<String>,
    valid_until: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

#[async_trait::async_trait]
impl Persistence for PostgresPersistence {
    async fn create_record(
        &self,
        node_execution_id: &str,
        plan_execution_id: &str,
    ) -> Result<(), TrackerError> {
        sqlx::query(
            r#"
            INSERT INTO node_execution_details (uuid, node_execution_id, plan_execution_id, created_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (node_execution_id) DO UPDATE SET
                plan_execution_id = COALESCE(node_execution_details.plan_execution_id, EXCLUDED.plan_execution_id)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(node_execution_id)
        .bind(plan_execution_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_record(
        &self,
        node_execution_id: &str,
    ) -> Result<Option<NodeExecutionRecord>, TrackerError> {
        let row = sqlx::query_as::<_, DetailsRow>(
            r#"
            SELECT uuid, node_execution_id, plan_execution_id, resolved_inputs,
                   child_cursor, child_node_execution_ids, valid_until, created_at
            FROM node_execution_details
            WHERE node_execution_id = $1
            "#,
        )
        .bind(node_execution_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let step_details = sqlx::query_as::<_, StepDetailRecord>(
            r#"
            SELECT name, detail, created_at
            FROM step_details
            WHERE node_execution_id = $1
            ORDER BY name
            "#,
        )
        .bind(node_execution_id)
        .fetch_all(&self.pool)
        .await?;

        let concurrent_child_instance = child_instance_from_columns(
            &row.node_execution_id,
            row.child_cursor,
            row.child_node_execution_ids.as_deref(),
        )?;

        Ok(Some(NodeExecutionRecord {
            uuid: row.uuid,
            node_execution_id: row.node_execution_id,
            plan_execution_id: row.plan_execution_id,
            step_details,
            resolved_inputs: row.resolved_inputs,
            concurrent_child_instance,
            valid_until: row.valid_until,
            created_at: row.created_at,
        }))
    }

    async fn put_step_detail(
        &self,
        node_execution_id: &str,
        plan_execution_id: &str,
        name: &str,
        detail: &[u8],
    ) -> Result<(), TrackerError> {
        // Parent and detail are written in one transaction so a detail row
        // never exists without its record.
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO node_execution_details (uuid, node_execution_id, plan_execution_id, created_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (node_execution_id) DO UPDATE SET
                plan_execution_id = COALESCE(node_execution_details.plan_execution_id, EXCLUDED.plan_execution_id)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(node_execution_id)
        .bind(plan_execution_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO step_details (node_execution_id, name, detail, created_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (node_execution_id, name) DO UPDATE SET
                detail = EXCLUDED.detail,
                created_at = EXCLUDED.created_at
            "#,
        )
        .bind(node_execution_id)
        .bind(name)
        .bind(detail)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_step_details(
        &self,
        plan_execution_id: &str,
        node_execution_id: &str,
    ) -> Result<Vec<StepDetailRecord>, TrackerError> {
        let rows = sqlx::query_as::<_, StepDetailRecord>(
            r#"
            SELECT sd.name, sd.detail, sd.created_at
            FROM step_details sd
            JOIN node_execution_details ned
              ON ned.node_execution_id = sd.node_execution_id
            WHERE sd.node_execution_id = $1
              AND ned.plan_execution_id = $2
            ORDER BY sd.name
            "#,
        )
        .bind(node_execution_id)
        .bind(plan_execution_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn set_resolved_inputs(
        &self,
        node_execution_id: &str,
        plan_execution_id: &str,
        resolved_inputs: &[u8],
    ) -> Result<Option<Vec<u8>>, TrackerError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO node_execution_details (uuid, node_execution_id, plan_execution_id, created_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (node_execution_id) DO UPDATE SET
                plan_execution_id = COALESCE(node_execution_details.plan_execution_id, EXCLUDED.plan_execution_id)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(node_execution_id)
        .bind(plan_execution_id)
        .execute(&mut *tx)
        .await?;

        let previous: Option<(Option<Vec<u8>>,)> = sqlx::query_as(
            r#"
            SELECT resolved_inputs
            FROM node_execution_details
            WHERE node_execution_id = $1
            FOR UPDATE
            "#,
        )
        .bind(node_execution_id)
        .fetch_optional(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE node_execution_details
            SET resolved_inputs = $1
            WHERE node_execution_id = $2
            "#,
        )
        .bind(resolved_inputs)
        .bind(node_execution_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(previous.and_then(|row| row.0))
    }

    async fn get_resolved_inputs(
        &self,
        plan_execution_id: &str,
        node_execution_id: &str,
    ) -> Result<Option<Vec<u8>>, TrackerError> {
        let row: Option<(Option<Vec<u8>>,)> = sqlx::query_as(
            r#"
            SELECT resolved_inputs
            FROM node_execution_details
            WHERE node_execution_id = $1
              AND plan_execution_id = $2
            "#,
        )
        .bind(node_execution_id)
        .bind(plan_execution_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(|r| r.0))
    }

    async fn put_concurrent_child_instance(
        &self,
        node_execution_id: &str,
        instance: &ConcurrentChildInstance,
    ) -> Result<(), TrackerError> {
        let children_json = serde_json::to_string(&instance.children_node_execution_ids)
            .map_err(|e| TrackerError::PayloadError {
                node_execution_id: node_execution_id.to_string(),
                details: format!("child id list is not serializable: {}", e),
            })?;

        // Wholesale replace of the sub-record; the plan id stays NULL until
        // a plan-scoped write supplies it.
        sqlx::query(
            r#"
            INSERT INTO node_execution_details
                (uuid, node_execution_id, child_cursor, child_node_execution_ids, created_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (node_execution_id) DO UPDATE SET
                child_cursor = EXCLUDED.child_cursor,
                child_node_execution_ids = EXCLUDED.child_node_execution_ids
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(node_execution_id)
        .bind(instance.cursor)
        .bind(&children_json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_concurrent_child_instance(
        &self,
        node_execution_id: &str,
    ) -> Result<Option<ConcurrentChildInstance>, TrackerError> {
        let row: Option<(Option<i64>, Option<String>)> = sqlx::query_as(
            r#"
            SELECT child_cursor, child_node_execution_ids
            FROM node_execution_details
            WHERE node_execution_id = $1
            "#,
        )
        .bind(node_execution_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((cursor, children_json)) => {
                child_instance_from_columns(node_execution_id, cursor, children_json.as_deref())
            }
            None => Ok(None),
        }
    }

    async fn increment_child_cursor(
        &self,
        node_execution_id: &str,
    ) -> Result<Option<ConcurrentChildInstance>, TrackerError> {
        // Single-statement atomic increment; PostgreSQL row locking makes
        // concurrent increments serialize without lost updates.
        let row: Option<(i64, Option<String>)> = sqlx::query_as(
            r#"
            UPDATE node_execution_details
            SET child_cursor = child_cursor + 1
            WHERE node_execution_id = $1
              AND child_cursor IS NOT NULL
            RETURNING child_cursor, child_node_execution_ids
            "#,
        )
        .bind(node_execution_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((cursor, children_json)) => child_instance_from_columns(
                node_execution_id,
                Some(cursor),
                children_json.as_deref(),
            ),
            None => Ok(None),
        }
    }

    async fn delete_records(&self, node_execution_ids: &[String]) -> Result<u64, TrackerError> {
        if node_execution_ids.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM step_details WHERE node_execution_id = ANY($1)")
            .bind(node_execution_ids)
            .execute(&mut *tx)
            .await?;

        let result =
            sqlx::query("DELETE FROM node_execution_details WHERE node_execution_id = ANY($1)")
                .bind(node_execution_ids)
                .execute(&mut *tx)
                .await?;

        tx.commit().await?;
        Ok(result.rows_affected())
    }

    async fn update_valid_until_for_plan(
        &self,
        plan_execution_id: &str,
        valid_until: DateTime<Utc>,
    ) -> Result<u64, TrackerError> {
        let result = sqlx::query(
            r#"
            UPDATE node_execution_details
            SET valid_until = $1
            WHERE plan_execution_id = $2
            "#,
        )
        .bind(valid_until)
        .bind(plan_execution_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn health_check_db(&self) -> Result<bool, TrackerError> {
        let result: std::result::Result<(i32,), _> =
            sqlx::query_as("SELECT 1").fetch_one(&self.pool).await;
        Ok(result.is_ok())
    }
}
