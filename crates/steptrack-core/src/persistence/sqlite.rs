//! SQLite-backed persistence implementation.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use uuid::Uuid;

use crate::error::TrackerError;

use super::{
    ConcurrentChildInstance, NodeExecutionRecord, Persistence, StepDetailRecord,
    child_instance_from_columns,
};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

/// Attempts for statements that must not lose updates when SQLite reports
/// the database busy.
const BUSY_RETRY_LIMIT: u32 = 5;

/// SQLite-backed persistence provider.
#[derive(Clone)]
pub struct SqlitePersistence {
    pool: SqlitePool,
}

impl SqlitePersistence {
    /// Create a new SQLite persistence provider from an existing pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create and initialize a new SQLite persistence from a file path.
    ///
    /// This convenience constructor handles all setup:
    /// - Creates parent directories if they don't exist
    /// - Creates the database file if it doesn't exist
    /// - Connects to the database with sensible defaults
    /// - Runs all migrations
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file (e.g., ".data/tracker.db")
    ///
    /// # Example
    ///
    /// ```ignore
    /// let persistence = SqlitePersistence::from_path(".data/tracker.db").await?;
    /// ```
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, TrackerError> {
        let path = path.as_ref();

        // Create parent directories if needed
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| TrackerError::DatabaseError {
                operation: "create_dir".to_string(),
                details: format!("Failed to create directory {:?}: {}", parent, e),
            })?;
        }

        let path_str = path.to_string_lossy();
        let url = format!("sqlite:{}?mode=rwc", path_str);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .map_err(|e| TrackerError::DatabaseError {
                operation: "connect".to_string(),
                details: format!("Failed to connect to SQLite at {:?}: {}", path, e),
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

/// Whether an error is SQLite reporting a busy/locked database, i.e. worth
/// retrying rather than surfacing.
fn is_busy(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            let msg = db.message();
            msg.contains("locked") || msg.contains("busy")
        }
        _ => false,
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

impl DetailsRow {
    fn into_record(
        self,
        step_details: Vec<StepDetailRecord>,
    ) -> Result<NodeExecutionRecord, TrackerError> {
        let concurrent_child_instance = child_instance_from_columns(
            &self.node_execution_id,
            self.child_cursor,
            self.child_node_execution_ids.as_deref(),
        )?;

        Ok(NodeExecutionRecord {
            uuid: self.uuid,
            node_execution_id: self.node_execution_id,
            plan_execution_id: self.plan_execution_id,
            step_details,
            resolved_inputs: self.resolved_inputs,
            concurrent_child_instance,
            valid_until: self.valid_until,
            created_at: self.created_at,
        })
    }
}

#[async_trait::async_trait]
impl Persistence for SqlitePersistence {
    async fn create_record(
        &self,
        node_execution_id: &str,
        plan_execution_id: &str,
    ) -> Result<(), TrackerError> {
        sqlx::query(
            r#"
            INSERT INTO node_execution_details (uuid, node_execution_id, plan_execution_id, created_at)
            VALUES (?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(node_execution_id) DO UPDATE SET
                plan_execution_id = COALESCE(node_execution_details.plan_execution_id, excluded.plan_execution_id)
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
            WHERE node_execution_id = ?
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
            WHERE node_execution_id = ?
            ORDER BY name
            "#,
        )
        .bind(node_execution_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(row.into_record(step_details)?))
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
            VALUES (?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(node_execution_id) DO UPDATE SET
                plan_execution_id = COALESCE(node_execution_details.plan_execution_id, excluded.plan_execution_id)
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
            VALUES (?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(node_execution_id, name) DO UPDATE SET
                detail=excluded.detail,
                created_at=excluded.created_at
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
            WHERE sd.node_execution_id = ?1
              AND ned.plan_execution_id = ?2
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
            VALUES (?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(node_execution_id) DO UPDATE SET
                plan_execution_id = COALESCE(node_execution_details.plan_execution_id, excluded.plan_execution_id)
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
            WHERE node_execution_id = ?
            "#,
        )
        .bind(node_execution_id)
        .fetch_optional(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE node_execution_details
            SET resolved_inputs = ?
            WHERE node_execution_id = ?
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
            WHERE node_execution_id = ?1
              AND plan_execution_id = ?2
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
            VALUES (?, ?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(node_execution_id) DO UPDATE SET
                child_cursor=excluded.child_cursor,
                child_node_execution_ids=excluded.child_node_execution_ids
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
            WHERE node_execution_id = ?
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
        // Single-statement atomic increment. Lost updates here would stall
        // or prematurely finish the owning fan-out node, so busy errors are
        // retried with backoff rather than surfaced.
        let mut attempt = 0;
        let row: Option<(i64, Option<String>)> = loop {
            attempt += 1;
            let result: std::result::Result<Option<(i64, Option<String>)>, sqlx::Error> =
                sqlx::query_as(
                    r#"
                    UPDATE node_execution_details
                    SET child_cursor = child_cursor + 1
                    WHERE node_execution_id = ?
                      AND child_cursor IS NOT NULL
                    RETURNING child_cursor, child_node_execution_ids
                    "#,
                )
                .bind(node_execution_id)
                .fetch_optional(&self.pool)
                .await;

            match result {
                Ok(row) => break row,
                Err(e) if is_busy(&e) && attempt < BUSY_RETRY_LIMIT => {
                    tokio::time::sleep(Duration::from_millis(10 * u64::from(attempt))).await;
                }
                Err(e) => return Err(e.into()),
            }
        };

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

        // SQLite has no array bind; expand placeholders for the id set.
        let placeholders = vec!["?"; node_execution_ids.len()].join(", ");

        let mut tx = self.pool.begin().await?;

        let details_query = format!(
            "DELETE FROM step_details WHERE node_execution_id IN ({})",
            placeholders
        );
        let mut query = sqlx::query(&details_query);
        for id in node_execution_ids {
            query = query.bind(id);
        }
        query.execute(&mut *tx).await?;

        let records_query = format!(
            "DELETE FROM node_execution_details WHERE node_execution_id IN ({})",
            placeholders
        );
        let mut query = sqlx::query(&records_query);
        for id in node_execution_ids {
            query = query.bind(id);
        }
        let result = query.execute(&mut *tx).await?;

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
            SET valid_until = ?
            WHERE plan_execution_id = ?
            "#,
        )
        .bind(valid_until)
        .bind(plan_execution_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn health_check_db(&self) -> Result<bool, TrackerError> {
        let result: std::result::Result<(i64,), _> =
            sqlx::query_as("SELECT 1").fetch_one(&self.pool).await;
        Ok(result.is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Create an in-memory SQLite pool for testing.
    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create in-memory SQLite pool");

        MIGRATOR.run(&pool).await.expect("Failed to run migrations");

        pool
    }

    async fn test_persistence() -> SqlitePersistence {
        SqlitePersistence::new(test_pool().await)
    }

    fn child_instance(cursor: i64, children: &[&str]) -> ConcurrentChildInstance {
        ConcurrentChildInstance {
            cursor,
            children_node_execution_ids: children.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_create_record_is_idempotent() {
        let persistence = test_persistence().await;

        persistence
            .create_record("node-1", "plan-1")
            .await
            .expect("Failed to create record");
        persistence
            .create_record("node-1", "plan-2")
            .await
            .expect("Second create should succeed");

        let record = persistence
            .get_record("node-1")
            .await
            .expect("Failed to get record")
            .expect("Record should exist");

        // First write wins on the plan id
        assert_eq!(record.plan_execution_id, Some("plan-1".to_string()));
        assert_eq!(record.node_execution_id, "node-1");
        assert!(record.step_details.is_empty());
        assert!(record.resolved_inputs.is_none());
        assert!(record.concurrent_child_instance.is_none());
    }

    #[tokio::test]
    async fn test_create_record_assigns_distinct_uuids() {
        let persistence = test_persistence().await;

        persistence.create_record("node-1", "plan-1").await.unwrap();
        persistence.create_record("node-2", "plan-1").await.unwrap();

        let first = persistence.get_record("node-1").await.unwrap().unwrap();
        let second = persistence.get_record("node-2").await.unwrap().unwrap();

        assert_ne!(first.uuid, second.uuid);
    }

    #[tokio::test]
    async fn test_get_record_not_found() {
        let persistence = test_persistence().await;

        let result = persistence
            .get_record("nonexistent")
            .await
            .expect("Query should succeed");

        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_put_step_detail_creates_parent() {
        let persistence = test_persistence().await;

        persistence
            .put_step_detail("node-1", "plan-1", "http", br#"{"status":200}"#)
            .await
            .expect("Failed to put step detail");

        let record = persistence
            .get_record("node-1")
            .await
            .unwrap()
            .expect("Parent record should have been created");

        assert_eq!(record.plan_execution_id, Some("plan-1".to_string()));
        assert_eq!(record.step_details.len(), 1);
        assert_eq!(record.step_details[0].name, "http");
        assert_eq!(record.step_details[0].detail, br#"{"status":200}"#.to_vec());
    }

    #[tokio::test]
    async fn test_step_details_accumulate_across_names() {
        let persistence = test_persistence().await;

        persistence
            .put_step_detail("node-1", "plan-1", "a", b"1")
            .await
            .unwrap();
        persistence
            .put_step_detail("node-1", "plan-1", "b", b"2")
            .await
            .unwrap();

        let details = persistence
            .get_step_details("plan-1", "node-1")
            .await
            .expect("Failed to get step details");

        assert_eq!(details.len(), 2);
        assert_eq!(details[0].name, "a");
        assert_eq!(details[1].name, "b");
    }

    #[tokio::test]
    async fn test_step_detail_same_name_last_write_wins() {
        let persistence = test_persistence().await;

        persistence
            .put_step_detail("node-1", "plan-1", "a", b"old")
            .await
            .unwrap();
        persistence
            .put_step_detail("node-1", "plan-1", "a", b"new")
            .await
            .unwrap();

        let details = persistence
            .get_step_details("plan-1", "node-1")
            .await
            .unwrap();

        assert_eq!(details.len(), 1);
        assert_eq!(details[0].detail, b"new".to_vec());
    }

    #[tokio::test]
    async fn test_get_step_details_wrong_plan_is_empty() {
        let persistence = test_persistence().await;

        persistence
            .put_step_detail("node-1", "plan-1", "a", b"1")
            .await
            .unwrap();

        let details = persistence
            .get_step_details("plan-other", "node-1")
            .await
            .unwrap();

        assert!(details.is_empty());
    }

    #[tokio::test]
    async fn test_set_resolved_inputs_returns_previous() {
        let persistence = test_persistence().await;

        let previous = persistence
            .set_resolved_inputs("node-1", "plan-1", b"first")
            .await
            .expect("Failed to set inputs");
        assert!(previous.is_none());

        let previous = persistence
            .set_resolved_inputs("node-1", "plan-1", b"second")
            .await
            .unwrap();
        assert_eq!(previous, Some(b"first".to_vec()));

        let inputs = persistence
            .get_resolved_inputs("plan-1", "node-1")
            .await
            .unwrap();
        assert_eq!(inputs, Some(b"second".to_vec()));
    }

    #[tokio::test]
    async fn test_get_resolved_inputs_not_found() {
        let persistence = test_persistence().await;

        let inputs = persistence
            .get_resolved_inputs("plan-1", "nonexistent")
            .await
            .expect("Query should succeed");

        assert!(inputs.is_none());
    }

    #[tokio::test]
    async fn test_put_and_get_concurrent_child_instance() {
        let persistence = test_persistence().await;

        let instance = child_instance(0, &["child-1", "child-2"]);
        persistence
            .put_concurrent_child_instance("node-1", &instance)
            .await
            .expect("Failed to put child instance");

        let fetched = persistence
            .get_concurrent_child_instance("node-1")
            .await
            .unwrap()
            .expect("Child instance should exist");

        assert_eq!(fetched, instance);
    }

    #[tokio::test]
    async fn test_put_concurrent_child_instance_replaces_wholesale() {
        let persistence = test_persistence().await;

        persistence
            .put_concurrent_child_instance("node-1", &child_instance(3, &["a", "b", "c"]))
            .await
            .unwrap();
        persistence
            .put_concurrent_child_instance("node-1", &child_instance(0, &["x"]))
            .await
            .unwrap();

        let fetched = persistence
            .get_concurrent_child_instance("node-1")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(fetched, child_instance(0, &["x"]));
    }

    #[tokio::test]
    async fn test_get_concurrent_child_instance_absent() {
        let persistence = test_persistence().await;

        // No record at all
        let fetched = persistence
            .get_concurrent_child_instance("nonexistent")
            .await
            .unwrap();
        assert!(fetched.is_none());

        // Record exists but is not a fan-out node
        persistence.create_record("node-1", "plan-1").await.unwrap();
        let fetched = persistence
            .get_concurrent_child_instance("node-1")
            .await
            .unwrap();
        assert!(fetched.is_none());
    }

    #[tokio::test]
    async fn test_increment_child_cursor() {
        let persistence = test_persistence().await;

        persistence
            .put_concurrent_child_instance("node-1", &child_instance(0, &["a", "b"]))
            .await
            .unwrap();

        let updated = persistence
            .increment_child_cursor("node-1")
            .await
            .unwrap()
            .expect("Should return updated instance");
        assert_eq!(updated.cursor, 1);
        assert_eq!(updated.children_node_execution_ids, vec!["a", "b"]);

        let updated = persistence
            .increment_child_cursor("node-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.cursor, 2);
    }

    #[tokio::test]
    async fn test_increment_child_cursor_non_fan_out() {
        let persistence = test_persistence().await;

        // Missing record
        let result = persistence
            .increment_child_cursor("nonexistent")
            .await
            .expect("Query should succeed");
        assert!(result.is_none());

        // Record without a fan-out sub-record
        persistence.create_record("node-1", "plan-1").await.unwrap();
        let result = persistence.increment_child_cursor("node-1").await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_plan_backfill_after_fan_out_registration() {
        let persistence = test_persistence().await;

        // Fan-out registration happens first and knows no plan id
        persistence
            .put_concurrent_child_instance("node-1", &child_instance(0, &["a"]))
            .await
            .unwrap();

        let record = persistence.get_record("node-1").await.unwrap().unwrap();
        assert!(record.plan_execution_id.is_none());

        // The first plan-scoped write backfills the plan id
        persistence
            .put_step_detail("node-1", "plan-1", "a", b"1")
            .await
            .unwrap();

        let record = persistence.get_record("node-1").await.unwrap().unwrap();
        assert_eq!(record.plan_execution_id, Some("plan-1".to_string()));

        // And plan-scoped reads now see the details
        let details = persistence
            .get_step_details("plan-1", "node-1")
            .await
            .unwrap();
        assert_eq!(details.len(), 1);

        // The fan-out sub-record survived the backfill
        let fetched = persistence
            .get_concurrent_child_instance("node-1")
            .await
            .unwrap();
        assert!(fetched.is_some());
    }

    #[tokio::test]
    async fn test_delete_records_removes_details_too() {
        let persistence = test_persistence().await;

        for node in ["node-a", "node-b", "node-c"] {
            persistence
                .put_step_detail(node, "plan-1", "d", b"x")
                .await
                .unwrap();
        }

        let deleted = persistence
            .delete_records(&["node-a".to_string(), "node-c".to_string()])
            .await
            .expect("Failed to delete records");
        assert_eq!(deleted, 2);

        assert!(persistence.get_record("node-a").await.unwrap().is_none());
        assert!(persistence.get_record("node-b").await.unwrap().is_some());
        assert!(persistence.get_record("node-c").await.unwrap().is_none());

        // Detail rows went with their records
        let details = persistence
            .get_step_details("plan-1", "node-a")
            .await
            .unwrap();
        assert!(details.is_empty());
    }

    #[tokio::test]
    async fn test_delete_records_missing_ids_are_noop() {
        let persistence = test_persistence().await;

        persistence.create_record("node-1", "plan-1").await.unwrap();

        let deleted = persistence
            .delete_records(&["node-1".to_string(), "ghost".to_string()])
            .await
            .unwrap();
        assert_eq!(deleted, 1);

        let deleted = persistence.delete_records(&[]).await.unwrap();
        assert_eq!(deleted, 0);
    }

    #[tokio::test]
    async fn test_update_valid_until_scoped_to_plan() {
        let persistence = test_persistence().await;

        persistence.create_record("node-x", "plan-1").await.unwrap();
        persistence.create_record("node-y", "plan-1").await.unwrap();
        persistence.create_record("node-z", "plan-2").await.unwrap();

        let valid_until = Utc::now() + chrono::Duration::days(7);
        let touched = persistence
            .update_valid_until_for_plan("plan-1", valid_until)
            .await
            .expect("Failed to update TTL");
        assert_eq!(touched, 2);

        let x = persistence.get_record("node-x").await.unwrap().unwrap();
        let y = persistence.get_record("node-y").await.unwrap().unwrap();
        let z = persistence.get_record("node-z").await.unwrap().unwrap();

        assert!(x.valid_until.is_some());
        assert!(y.valid_until.is_some());
        assert!(z.valid_until.is_none());
    }

    #[tokio::test]
    async fn test_health_check_db() {
        let persistence = test_persistence().await;

        let healthy = persistence
            .health_check_db()
            .await
            .expect("Health check failed");

        assert!(healthy);
    }
}
