// Copyright (C) 2026 Steptrack Maintainers
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Synchronous observer fan-out for tracker mutations.
//!
//! Consumers (e.g. a live execution-graph streamer) register observers on an
//! [`ObserverSubject`]; the tracker notifies each registered observer once
//! per mutation, after the persistence write commits and before the mutating
//! call returns. Notification is best-effort side-signaling: an observer
//! cannot fail or roll back the write it is told about.

use std::sync::{Arc, RwLock};

use tracing::debug;

/// What kind of mutation an update describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeExecutionEventKind {
    /// A named step detail blob was added or replaced.
    StepDetailAdded,
    /// The resolved step inputs were saved.
    StepInputsSaved,
    /// The fan-out child sub-record was set or replaced.
    ConcurrentChildrenSet,
    /// A retry created a fresh record carrying the original's lineage.
    DetailsCopiedForRetry,
}

/// A single mutation notification.
#[derive(Debug, Clone)]
pub struct NodeExecutionUpdate {
    /// The node execution that was mutated. For retry copies this is the
    /// new node execution id.
    pub node_execution_id: String,
    /// What happened.
    pub kind: NodeExecutionEventKind,
}

/// Receives tracker mutation notifications.
///
/// Implementations run synchronously on the mutating call path and should
/// return quickly; anything slow belongs behind a channel on the observer's
/// side. Observers that can fail are expected to handle and log their own
/// errors.
pub trait NodeExecutionObserver: Send + Sync {
    /// Called once per mutation, after the write commits.
    fn on_update(&self, update: &NodeExecutionUpdate);
}

/// Registry of observers notified on every tracker mutation.
#[derive(Default)]
pub struct ObserverSubject {
    observers: RwLock<Vec<Arc<dyn NodeExecutionObserver>>>,
}

impl ObserverSubject {
    /// Create an empty subject.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer. Observers are notified in registration order.
    pub fn register(&self, observer: Arc<dyn NodeExecutionObserver>) {
        self.observers
            .write()
            .expect("observer registry lock poisoned")
            .push(observer);
    }

    /// Number of registered observers.
    pub fn len(&self) -> usize {
        self.observers
            .read()
            .expect("observer registry lock poisoned")
            .len()
    }

    /// Whether no observers are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Notify every registered observer of one update.
    pub fn notify(&self, update: &NodeExecutionUpdate) {
        let observers = self
            .observers
            .read()
            .expect("observer registry lock poisoned");

        debug!(
            node_execution_id = %update.node_execution_id,
            kind = ?update.kind,
            observers = observers.len(),
            "Notifying observers"
        );

        for observer in observers.iter() {
            observer.on_update(update);
        }
    }
}
