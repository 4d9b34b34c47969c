// Copyright (C) 2026 Steptrack Maintainers
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Node execution details tracker service.
//!
//! [`NodeExecutionInfoService`] is the public facade the orchestration
//! engine calls whenever a node starts, produces output, forks children, or
//! is retried. Every mutation persists first and then notifies registered
//! observers; reads treat missing records as empty results, never errors.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::error::{Result, TrackerError};
use crate::observer::{NodeExecutionEventKind, NodeExecutionUpdate, ObserverSubject};
use crate::persistence::{ConcurrentChildInstance, NodeExecutionRecord, Persistence};

/// Tracker for auxiliary, high-churn node execution metadata.
///
/// Holds its store handle, observer subject, and retention window as
/// explicit constructor arguments; the service itself is stateless across
/// calls except through the store.
pub struct NodeExecutionInfoService {
    persistence: Arc<dyn Persistence>,
    observers: Arc<ObserverSubject>,
    retention: Duration,
}

impl NodeExecutionInfoService {
    /// Create a new tracker service.
    ///
    /// `retention` is the window applied by [`extend_ttl_for_plan`] when a
    /// completed plan is archived.
    ///
    /// [`extend_ttl_for_plan`]: NodeExecutionInfoService::extend_ttl_for_plan
    pub fn new(
        persistence: Arc<dyn Persistence>,
        observers: Arc<ObserverSubject>,
        retention: Duration,
    ) -> Self {
        Self {
            persistence,
            observers,
            retention,
        }
    }

    fn require_non_empty(value: &str, field: &str) -> Result<()> {
        if value.is_empty() {
            return Err(TrackerError::ValidationError {
                field: field.to_string(),
                message: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    // ========================================================================
    // Step Detail Accumulator
    // ========================================================================

    /// Append a named detail blob to a node's record.
    ///
    /// Creates the record if absent. Distinct names accumulate; re-writing
    /// an existing name replaces that entry only.
    #[instrument(skip(self, detail), fields(node_execution_id = %node_execution_id, name = %name))]
    pub async fn add_step_detail(
        &self,
        node_execution_id: &str,
        plan_execution_id: &str,
        detail: &Value,
        name: &str,
    ) -> Result<()> {
        Self::require_non_empty(node_execution_id, "node_execution_id")?;
        Self::require_non_empty(plan_execution_id, "plan_execution_id")?;
        Self::require_non_empty(name, "name")?;

        let payload = serde_json::to_vec(detail).map_err(|e| TrackerError::PayloadError {
            node_execution_id: node_execution_id.to_string(),
            details: format!("detail '{}' is not serializable: {}", name, e),
        })?;
        self.persistence
            .put_step_detail(node_execution_id, plan_execution_id, name, &payload)
            .await?;

        debug!(payload_size = payload.len(), "Step detail persisted");
        self.observers.notify(&NodeExecutionUpdate {
            node_execution_id: node_execution_id.to_string(),
            kind: NodeExecutionEventKind::StepDetailAdded,
        });
        Ok(())
    }

    /// Save the resolved input parameters for a node execution.
    ///
    /// Creates the record if absent. Inputs are written at most once per
    /// node execution in practice; a repeated save replaces the blob.
    #[instrument(skip(self, resolved_inputs), fields(node_execution_id = %node_execution_id))]
    pub async fn save_node_execution_inputs(
        &self,
        node_execution_id: &str,
        plan_execution_id: &str,
        resolved_inputs: &Value,
    ) -> Result<()> {
        Self::require_non_empty(node_execution_id, "node_execution_id")?;
        Self::require_non_empty(plan_execution_id, "plan_execution_id")?;

        let payload =
            serde_json::to_vec(resolved_inputs).map_err(|e| TrackerError::PayloadError {
                node_execution_id: node_execution_id.to_string(),
                details: format!("resolved inputs are not serializable: {}", e),
            })?;
        let previous = self
            .persistence
            .set_resolved_inputs(node_execution_id, plan_execution_id, &payload)
            .await?;

        if previous.is_some() {
            debug!("Replacing previously saved resolved inputs");
        }
        self.observers.notify(&NodeExecutionUpdate {
            node_execution_id: node_execution_id.to_string(),
            kind: NodeExecutionEventKind::StepInputsSaved,
        });
        Ok(())
    }

    /// Fetch the accumulated details for a node as a name-to-payload map.
    ///
    /// Returns an empty map when no record exists.
    pub async fn get_step_details(
        &self,
        plan_execution_id: &str,
        node_execution_id: &str,
    ) -> Result<HashMap<String, Value>> {
        let rows = self
            .persistence
            .get_step_details(plan_execution_id, node_execution_id)
            .await?;

        let mut details = HashMap::with_capacity(rows.len());
        for row in rows {
            let value: Value =
                serde_json::from_slice(&row.detail).map_err(|e| TrackerError::PayloadError {
                    node_execution_id: node_execution_id.to_string(),
                    details: format!("detail '{}' is not valid JSON: {}", row.name, e),
                })?;
            details.insert(row.name, value);
        }
        Ok(details)
    }

    /// Fetch the resolved inputs for a node execution.
    ///
    /// Returns `None` when no record exists or no inputs were saved.
    pub async fn get_step_inputs(
        &self,
        plan_execution_id: &str,
        node_execution_id: &str,
    ) -> Result<Option<Value>> {
        let payload = self
            .persistence
            .get_resolved_inputs(plan_execution_id, node_execution_id)
            .await?;

        match payload {
            Some(bytes) => {
                let value =
                    serde_json::from_slice(&bytes).map_err(|e| TrackerError::PayloadError {
                        node_execution_id: node_execution_id.to_string(),
                        details: format!("resolved inputs are not valid JSON: {}", e),
                    })?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    // ========================================================================
    // Concurrent Child Cursor Manager
    // ========================================================================

    /// Set or replace the fan-out sub-record for a node, wholesale.
    ///
    /// Called once when a fan-out node dispatches its children.
    #[instrument(skip(self, instance), fields(node_execution_id = %node_execution_id, children = instance.children_node_execution_ids.len()))]
    pub async fn add_concurrent_child_information(
        &self,
        instance: ConcurrentChildInstance,
        node_execution_id: &str,
    ) -> Result<()> {
        Self::require_non_empty(node_execution_id, "node_execution_id")?;

        self.persistence
            .put_concurrent_child_instance(node_execution_id, &instance)
            .await?;

        self.observers.notify(&NodeExecutionUpdate {
            node_execution_id: node_execution_id.to_string(),
            kind: NodeExecutionEventKind::ConcurrentChildrenSet,
        });
        Ok(())
    }

    /// Atomically increment the child cursor and return the updated
    /// sub-record.
    ///
    /// Returns `None` when the node has no fan-out sub-record; callers
    /// treat that as "not a fan-out node", not a failure. `status` is
    /// audit-only: it is recorded on the tracing span and does not affect
    /// cursor arithmetic.
    #[instrument(skip(self), fields(node_execution_id = %node_execution_id, status = %status))]
    pub async fn increment_cursor(
        &self,
        node_execution_id: &str,
        status: &str,
    ) -> Result<Option<ConcurrentChildInstance>> {
        let updated = self
            .persistence
            .increment_child_cursor(node_execution_id)
            .await?;

        match &updated {
            Some(instance) => debug!(cursor = instance.cursor, "Child cursor advanced"),
            None => debug!("No fan-out sub-record to advance"),
        }
        Ok(updated)
    }

    /// Fetch the fan-out sub-record, if present.
    pub async fn fetch_concurrent_child_instance(
        &self,
        node_execution_id: &str,
    ) -> Result<Option<ConcurrentChildInstance>> {
        self.persistence
            .get_concurrent_child_instance(node_execution_id)
            .await
    }

    // ========================================================================
    // Retry-Copy Operator
    // ========================================================================

    /// Carry a node's lineage forward to a retry attempt.
    ///
    /// Creates a fresh record under `new_node_execution_id` with the same
    /// plan lineage but no accumulated details, inputs, or fan-out state.
    /// A missing original record is a silent no-op: a node that never got
    /// far enough to record anything is a valid retry source.
    #[instrument(skip(self), fields(original = %original_node_execution_id, new = %new_node_execution_id))]
    pub async fn copy_step_details_for_retry(
        &self,
        plan_execution_id: &str,
        original_node_execution_id: &str,
        new_node_execution_id: &str,
    ) -> Result<()> {
        Self::require_non_empty(new_node_execution_id, "new_node_execution_id")?;

        let original = self
            .persistence
            .get_record(original_node_execution_id)
            .await?;
        if original.is_none() {
            debug!("No record for original node execution; nothing to copy");
            return Ok(());
        }

        self.persistence
            .create_record(new_node_execution_id, plan_execution_id)
            .await?;

        info!("Node execution record carried forward for retry");
        self.observers.notify(&NodeExecutionUpdate {
            node_execution_id: new_node_execution_id.to_string(),
            kind: NodeExecutionEventKind::DetailsCopiedForRetry,
        });
        Ok(())
    }

    // ========================================================================
    // Lifecycle / Sweep Interface
    // ========================================================================

    /// Fetch the full record for a node execution, or `None` if absent.
    pub async fn get_node_execution_info(
        &self,
        node_execution_id: &str,
    ) -> Result<Option<NodeExecutionRecord>> {
        self.persistence.get_record(node_execution_id).await
    }

    /// Hard-delete the records for the given node execution ids.
    ///
    /// Missing ids are skipped. Returns the number of records deleted.
    #[instrument(skip(self, node_execution_ids), fields(count = node_execution_ids.len()))]
    pub async fn delete_node_execution_info(
        &self,
        node_execution_ids: &[String],
    ) -> Result<u64> {
        let deleted = self.persistence.delete_records(node_execution_ids).await?;
        info!(deleted, "Node execution records deleted");
        Ok(deleted)
    }

    /// Set `valid_until` on every record of a plan.
    ///
    /// Returns the number of records touched. Sweeping expired records is
    /// owned by an external process; this only marks them.
    #[instrument(skip(self), fields(plan_execution_id = %plan_execution_id))]
    pub async fn update_ttl_for_plan(
        &self,
        plan_execution_id: &str,
        valid_until: DateTime<Utc>,
    ) -> Result<u64> {
        let touched = self
            .persistence
            .update_valid_until_for_plan(plan_execution_id, valid_until)
            .await?;
        info!(touched, %valid_until, "Plan TTL updated");
        Ok(touched)
    }

    /// Apply the configured retention window to every record of a plan.
    ///
    /// The archival path: sets `valid_until = now + retention`.
    pub async fn extend_ttl_for_plan(&self, plan_execution_id: &str) -> Result<u64> {
        let valid_until = Utc::now() + self.retention;
        self.update_ttl_for_plan(plan_execution_id, valid_until)
            .await
    }

    /// Probe the backing store.
    ///
    /// For embedders wiring the tracker into a readiness endpoint. A store
    /// that does not answer yields `Ok(false)`.
    pub async fn health_check(&self) -> Result<bool> {
        self.persistence.health_check_db().await
    }
}
