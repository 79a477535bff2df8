//! Per-aggregate critical sections.
//!
//! Mutating operations against one aggregate are serialized through a lock
//! keyed by aggregate identity; operations against different aggregates
//! proceed fully in parallel. A single global lock would needlessly serialize
//! unrelated bookings.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use haulflow_core::AggregateId;

/// Registry of one mutex per aggregate, created on demand.
///
/// Usage:
///
/// ```ignore
/// let section = locks.handle(aggregate_id);
/// let _guard = section.lock().expect("aggregate lock poisoned");
/// // load / decide / append under the guard
/// ```
#[derive(Debug, Default)]
pub struct AggregateLocks {
    registry: Mutex<HashMap<AggregateId, Arc<Mutex<()>>>>,
}

impl AggregateLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock handle for one aggregate. Cloning the `Arc` is cheap; the
    /// caller locks it for the duration of the critical section.
    pub fn handle(&self, aggregate_id: AggregateId) -> Arc<Mutex<()>> {
        let mut registry = self.registry.lock().expect("lock registry poisoned");
        registry.entry(aggregate_id).or_default().clone()
    }
}
