// Copyright (C) 2026 Steptrack Maintainers
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Steptrack Core - Node Execution Details Tracker
//!
//! This crate tracks auxiliary, mutable execution metadata for each node
//! (step) in a running pipeline graph: named detail blobs, resolved step
//! inputs, fan-out child cursor state, and retention timestamps. The data
//! lives apart from the orchestration engine's primary status records
//! because it is high-churn and variably shaped and must not contend with
//! the engine's hot state-transition path.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Orchestration Engine                        │
//! │   (node start / step output / fan-out dispatch / retry)     │
//! └─────────────────────────────────────────────────────────────┘
//!                             │ synchronous calls
//!                             ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              NodeExecutionInfoService (This Crate)           │
//! │   details · inputs · child cursors · retry lineage · TTL    │
//! └─────────────────────────────────────────────────────────────┘
//!          │ persist first                 │ then notify
//!          ▼                               ▼
//! ┌───────────────────────┐      ┌─────────────────────────────┐
//! │  SQLite / PostgreSQL  │      │    Registered Observers      │
//! │   (sqlx, migrated)    │      │  (e.g. live graph streamer)  │
//! └───────────────────────┘      └─────────────────────────────┘
//! ```
//!
//! # Operations
//!
//! | Operation | Description |
//! |-----------|-------------|
//! | `add_step_detail` | Accumulate a named detail blob (create record if absent) |
//! | `save_node_execution_inputs` | Save resolved step inputs |
//! | `get_step_details` / `get_step_inputs` | Plan-scoped reads; missing records read as empty |
//! | `add_concurrent_child_information` | Set the fan-out sub-record wholesale |
//! | `increment_cursor` | Atomic child-cursor advance; `None` for non-fan-out nodes |
//! | `fetch_concurrent_child_instance` | Read the fan-out sub-record |
//! | `copy_step_details_for_retry` | Carry lineage (not runtime state) to a retry attempt |
//! | `get_node_execution_info` | Full record lookup |
//! | `delete_node_execution_info` | Bulk hard-delete by id set |
//! | `update_ttl_for_plan` / `extend_ttl_for_plan` | Mark a plan's records for external sweeping |
//! | `health_check` | Readiness probe of the backing store |
//!
//! # Semantics
//!
//! - **Not-found is not an error.** Every read, the retry copy, and the
//!   cursor increment treat a missing record as an empty result.
//! - **Cursor increments never lose updates.** The increment is a single
//!   atomic statement in the store; concurrently completing children each
//!   advance the cursor exactly once.
//! - **Observers fire after the commit.** Each mutating operation notifies
//!   every registered observer exactly once, synchronously, before
//!   returning; observer behavior never affects the write.
//!
//! # Modules
//!
//! - [`config`]: Construction-time configuration from environment variables
//! - [`error`]: Error types with stable error code strings
//! - [`migrations`]: Embedded schema migrations for both backends
//! - [`observer`]: Synchronous observer registration and fan-out
//! - [`persistence`]: Store trait plus SQLite and PostgreSQL backends
//! - [`tracker`]: The `NodeExecutionInfoService` facade

#![deny(missing_docs)]

/// Construction-time configuration loaded from environment variables.
pub mod config;

/// Error types for tracker operations.
pub mod error;

/// Embedded database migrations for SQLite and PostgreSQL.
pub mod migrations;

/// Observer registration and synchronous mutation fan-out.
pub mod observer;

/// Persistence trait and backend implementations.
pub mod persistence;

/// The node execution details tracker service.
pub mod tracker;

pub use config::Config;
pub use error::TrackerError;
pub use observer::{NodeExecutionEventKind, NodeExecutionObserver, NodeExecutionUpdate, ObserverSubject};
pub use persistence::{ConcurrentChildInstance, NodeExecutionRecord, Persistence};
pub use tracker::NodeExecutionInfoService;
