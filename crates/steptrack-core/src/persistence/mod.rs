//! Persistence interfaces and backends for steptrack-core.
//!
//! This module defines the persistence abstraction and backend implementations.

pub mod postgres;
pub mod sqlite;

pub use self::postgres::PostgresPersistence;
pub use self::sqlite::SqlitePersistence;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TrackerError;

/// Fan-out sub-record for a node that dispatched concurrent children.
///
/// Present only on fan-out nodes. The cursor counts children that have
/// reported in and is only ever moved by the atomic increment operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcurrentChildInstance {
    /// How many children have reported progress so far.
    pub cursor: i64,
    /// Node execution ids of the dispatched children, in dispatch order.
    pub children_node_execution_ids: Vec<String>,
}

/// A single named detail blob accumulated for a node execution.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StepDetailRecord {
    /// Caller-supplied detail name, unique per node execution.
    pub name: String,
    /// Serialized JSON payload.
    pub detail: Vec<u8>,
    /// When this detail was last written.
    pub created_at: DateTime<Utc>,
}

/// Auxiliary execution metadata for one node execution attempt.
#[derive(Debug, Clone)]
pub struct NodeExecutionRecord {
    /// Storage-assigned identity, independent of `node_execution_id`.
    pub uuid: String,
    /// Caller identity; unique across the collection.
    pub node_execution_id: String,
    /// Owning pipeline run. `None` until the first plan-scoped write; a
    /// fan-out registration alone does not carry the plan id.
    pub plan_execution_id: Option<String>,
    /// Accumulated detail blobs, one per name.
    pub step_details: Vec<StepDetailRecord>,
    /// Serialized resolved input parameters, if recorded.
    pub resolved_inputs: Option<Vec<u8>>,
    /// Fan-out child state, if this node dispatched concurrent children.
    pub concurrent_child_instance: Option<ConcurrentChildInstance>,
    /// When set and elapsed, the record is eligible for external sweeping.
    pub valid_until: Option<DateTime<Utc>>,
    /// When the record was first created.
    pub created_at: DateTime<Utc>,
}

/// Rebuild the fan-out sub-record from its two storage columns.
///
/// Both columns are written together; a lone cursor means the row predates
/// the sub-record and is treated as absent.
pub(crate) fn child_instance_from_columns(
    node_execution_id: &str,
    cursor: Option<i64>,
    children_json: Option<&str>,
) -> Result<Option<ConcurrentChildInstance>, TrackerError> {
    match (cursor, children_json) {
        (Some(cursor), Some(json)) => {
            let children_node_execution_ids: Vec<String> =
                serde_json::from_str(json).map_err(|e| TrackerError::PayloadError {
                    node_execution_id: node_execution_id.to_string(),
                    details: format!("invalid child id list: {}", e),
                })?;
            Ok(Some(ConcurrentChildInstance {
                cursor,
                children_node_execution_ids,
            }))
        }
        _ => Ok(None),
    }
}

/// Persistence interface used by the tracker service.
///
/// Implementations must guarantee:
/// - `create_record` is an upsert by `node_execution_id`; racing first
///   writes never produce two records, and the loser's uuid/plan are
///   discarded (first-write-wins).
/// - `increment_child_cursor` is a single atomic read-increment-write;
///   concurrent increments never lose updates.
#[async_trait]
pub trait Persistence: Send + Sync {
    /// Create the record for a node execution if absent. Idempotent.
    ///
    /// If the record exists with no plan id yet (created by a fan-out
    /// registration), the plan id is backfilled; an existing plan id wins.
    async fn create_record(
        &self,
        node_execution_id: &str,
        plan_execution_id: &str,
    ) -> Result<(), TrackerError>;

    /// Fetch the full record including accumulated step details.
    async fn get_record(
        &self,
        node_execution_id: &str,
    ) -> Result<Option<NodeExecutionRecord>, TrackerError>;

    /// Upsert one named detail blob, creating the parent record if absent.
    ///
    /// Distinct names accumulate; a re-write of an existing name replaces it.
    async fn put_step_detail(
        &self,
        node_execution_id: &str,
        plan_execution_id: &str,
        name: &str,
        detail: &[u8],
    ) -> Result<(), TrackerError>;

    /// Fetch accumulated details for a node within a plan.
    ///
    /// Returns an empty list when no record exists or the plan id does not
    /// match.
    async fn get_step_details(
        &self,
        plan_execution_id: &str,
        node_execution_id: &str,
    ) -> Result<Vec<StepDetailRecord>, TrackerError>;

    /// Set the resolved inputs blob, creating the parent record if absent.
    ///
    /// Returns the previous blob, if any (callers log replacement).
    async fn set_resolved_inputs(
        &self,
        node_execution_id: &str,
        plan_execution_id: &str,
        resolved_inputs: &[u8],
    ) -> Result<Option<Vec<u8>>, TrackerError>;

    /// Fetch the resolved inputs blob for a node within a plan.
    async fn get_resolved_inputs(
        &self,
        plan_execution_id: &str,
        node_execution_id: &str,
    ) -> Result<Option<Vec<u8>>, TrackerError>;

    /// Set or replace the fan-out sub-record wholesale.
    async fn put_concurrent_child_instance(
        &self,
        node_execution_id: &str,
        instance: &ConcurrentChildInstance,
    ) -> Result<(), TrackerError>;

    /// Fetch the fan-out sub-record, if present.
    async fn get_concurrent_child_instance(
        &self,
        node_execution_id: &str,
    ) -> Result<Option<ConcurrentChildInstance>, TrackerError>;

    /// Atomically increment the child cursor and return the updated
    /// sub-record.
    ///
    /// Returns `None` when the record or the sub-record is absent (the node
    /// is not a fan-out node); this is not an error.
    async fn increment_child_cursor(
        &self,
        node_execution_id: &str,
    ) -> Result<Option<ConcurrentChildInstance>, TrackerError>;

    /// Hard-delete records (and their details) by id. Missing ids are
    /// skipped. Returns the number of records deleted.
    async fn delete_records(&self, node_execution_ids: &[String]) -> Result<u64, TrackerError>;

    /// Set `valid_until` on every record of a plan. Returns the number of
    /// records touched.
    async fn update_valid_until_for_plan(
        &self,
        plan_execution_id: &str,
        valid_until: DateTime<Utc>,
    ) -> Result<u64, TrackerError>;

    /// Probe the backing store with a trivial query.
    ///
    /// Embedder-facing readiness check; a store that does not answer is
    /// reported as `Ok(false)`, not an error.
    async fn health_check_db(&self) -> Result<bool, TrackerError>;
}
